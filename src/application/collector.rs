// Collector - Drain a snapshot stream into storage
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::snapshot::TelemetrySnapshot;
use futures::stream::Stream;
use futures::StreamExt;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSummary {
    pub generated: usize,
    pub stored: usize,
    pub failed: usize,
}

/// Write every snapshot from `stream`. A failed write is logged and skipped.
pub async fn collect_and_store<S>(
    repository: &dyn TelemetryRepository,
    vehicle_id: &str,
    stream: S,
) -> CollectionSummary
where
    S: Stream<Item = TelemetrySnapshot>,
{
    let mut summary = CollectionSummary::default();
    let mut stream = std::pin::pin!(stream);

    while let Some(snapshot) = stream.next().await {
        summary.generated += 1;

        if let Err(e) = repository.write_snapshot(vehicle_id, &snapshot).await {
            tracing::error!("DB write error: {:#}", e);
            summary.failed += 1;
            continue;
        }
        summary.stored += 1;

        log_reading(summary.generated, &snapshot);
    }

    tracing::info!(
        "Completed: {} readings stored ({} failed)",
        summary.stored,
        summary.failed
    );
    summary
}

fn log_reading(index: usize, snapshot: &TelemetrySnapshot) {
    let dtc_info = if snapshot.dtc_count > 0 {
        format!(", DTCs: {}", snapshot.dtc_count)
    } else {
        String::new()
    };

    if snapshot.mil_status {
        tracing::warn!(
            "[{:03}] [CHECK ENGINE] RPM: {:4}, Speed: {:3} km/h, Coolant: {:3}°C{}",
            index,
            snapshot.rpm,
            snapshot.speed,
            snapshot.coolant_temp,
            dtc_info
        );
        for dtc in &snapshot.dtcs {
            tracing::warn!("      └─ {}: {}", dtc.code, dtc.description);
        }
    } else {
        tracing::info!(
            "[{:03}] [OK] RPM: {:4}, Speed: {:3} km/h, Coolant: {:3}°C",
            index,
            snapshot.rpm,
            snapshot.speed,
            snapshot.coolant_temp
        );
    }
}

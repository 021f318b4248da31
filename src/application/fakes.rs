// In-memory collaborators for service tests
use crate::application::llm_client::LlmClient;
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::snapshot::{Reading, TelemetrySnapshot};
use crate::domain::telemetry::{DtcEvent, FieldStats, MilStatus, TimeSeriesPoint};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Stores snapshots in insertion order. Time ranges and limits other than
/// `recent_readings`' limit are ignored.
#[derive(Default)]
pub struct InMemoryRepository {
    snapshots: Mutex<Vec<(String, TelemetrySnapshot)>>,
    unavailable: bool,
    fail_every: Option<usize>,
    writes: AtomicUsize,
}

impl InMemoryRepository {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Reject every `n`th write
    pub fn failing_every(n: usize) -> Self {
        Self {
            fail_every: Some(n),
            ..Self::default()
        }
    }

    pub fn stored(&self) -> Vec<TelemetrySnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.unavailable {
            anyhow::bail!("storage unavailable");
        }
        Ok(())
    }

    fn for_vehicle(&self, vehicle_id: &str) -> Vec<TelemetrySnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|(v, _)| v == vehicle_id)
            .map(|(_, s)| s.clone())
            .collect()
    }

    fn reading(vehicle_id: &str, snapshot: &TelemetrySnapshot) -> Reading {
        let mut reading = Reading::from(snapshot);
        reading
            .values
            .insert("vehicle_id".to_string(), Value::from(vehicle_id));
        reading
    }

    fn values(&self, vehicle_id: &str, field: &str) -> Vec<(i64, f64)> {
        self.for_vehicle(vehicle_id)
            .iter()
            .filter_map(|s| {
                s.numeric_fields()
                    .into_iter()
                    .find(|(name, _)| *name == field)
                    .map(|(_, v)| (s.timestamp.timestamp_millis(), v.as_f64()))
            })
            .collect()
    }
}

#[async_trait]
impl TelemetryRepository for InMemoryRepository {
    async fn write_snapshot(&self, vehicle_id: &str, snapshot: &TelemetrySnapshot) -> anyhow::Result<()> {
        self.check()?;
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(every) = self.fail_every {
            if n % every == 0 {
                anyhow::bail!("write {} rejected", n);
            }
        }
        self.snapshots
            .lock()
            .unwrap()
            .push((vehicle_id.to_string(), snapshot.clone()));
        Ok(())
    }

    async fn latest_reading(&self, vehicle_id: &str) -> anyhow::Result<Option<Reading>> {
        self.check()?;
        Ok(self
            .for_vehicle(vehicle_id)
            .last()
            .map(|s| Self::reading(vehicle_id, s)))
    }

    async fn recent_readings(&self, vehicle_id: &str, _hours: u32, limit: usize) -> anyhow::Result<Vec<Reading>> {
        self.check()?;
        let snapshots = self.for_vehicle(vehicle_id);
        let skip = snapshots.len().saturating_sub(limit);
        Ok(snapshots[skip..]
            .iter()
            .map(|s| Self::reading(vehicle_id, s))
            .collect())
    }

    async fn field_stats(&self, vehicle_id: &str, field: &str, _hours: u32) -> anyhow::Result<Option<FieldStats>> {
        self.check()?;
        let values: Vec<f64> = self.values(vehicle_id, field).into_iter().map(|(_, v)| v).collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(FieldStats {
            field: field.to_string(),
            min: values.iter().cloned().fold(f64::INFINITY, f64::min),
            max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            mean: values.iter().sum::<f64>() / values.len() as f64,
            count: values.len() as u64,
        }))
    }

    async fn aggregated_series(
        &self,
        vehicle_id: &str,
        field: &str,
        _hours: u32,
        _window: &str,
        max_points: usize,
    ) -> anyhow::Result<Vec<TimeSeriesPoint>> {
        self.check()?;
        Ok(self
            .values(vehicle_id, field)
            .into_iter()
            .take(max_points)
            .map(|(t, v)| TimeSeriesPoint::new(t, v))
            .collect())
    }

    async fn mil_status_history(&self, vehicle_id: &str, _hours: u32) -> anyhow::Result<Vec<MilStatus>> {
        self.check()?;
        Ok(self
            .for_vehicle(vehicle_id)
            .iter()
            .map(|s| MilStatus {
                time: Some(s.timestamp.to_rfc3339()),
                mil_status: s.mil_status,
                dtc_count: s.dtc_count,
                codes: Vec::new(),
            })
            .collect())
    }

    async fn dtc_events(&self, vehicle_id: &str, _hours: u32) -> anyhow::Result<Vec<DtcEvent>> {
        self.check()?;
        Ok(self
            .for_vehicle(vehicle_id)
            .iter()
            .flat_map(|s| {
                s.dtcs.iter().map(move |dtc| DtcEvent {
                    time: s.timestamp.to_rfc3339(),
                    code: dtc.code.clone(),
                    severity: dtc.severity().as_str().to_string(),
                    description: dtc.description.clone(),
                    rpm: Some(s.rpm as f64),
                    speed: Some(s.speed as f64),
                    coolant_temp: Some(s.coolant_temp as f64),
                    engine_load: Some(s.engine_load),
                })
            })
            .collect())
    }

    async fn field_averages(&self, vehicle_id: &str, _hours: u32) -> anyhow::Result<Vec<(String, f64)>> {
        self.check()?;
        let snapshots = self.for_vehicle(vehicle_id);
        let Some(first) = snapshots.first() else {
            return Ok(Vec::new());
        };

        Ok(first
            .numeric_fields()
            .into_iter()
            .map(|(name, _)| {
                let sum: f64 = snapshots
                    .iter()
                    .flat_map(|s| s.numeric_fields())
                    .filter(|(n, _)| *n == name)
                    .map(|(_, v)| v.as_f64())
                    .sum();
                (name.to_string(), sum / snapshots.len() as f64)
            })
            .collect())
    }
}

/// Records prompts and answers with a canned reply
#[derive(Default)]
pub struct RecordingLlm {
    pub prompts: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

#[async_trait]
impl LlmClient for RecordingLlm {
    async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        if self.fail {
            anyhow::bail!("model offline");
        }
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), prompt.to_string()));
        Ok("canned analysis".to_string())
    }
}

// Telemetry service - Dashboard use cases with explicit synthetic fallback
use crate::application::stream::snapshot_stream;
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::generator::{generate_sample, generate_sample_at, GeneratorProfile};
use crate::domain::snapshot::{Reading, TelemetrySnapshot};
use crate::domain::telemetry::{
    validate_field, validate_window, DtcEvent, FieldStats, MilStatus, TimeSeriesPoint,
};
use crate::infrastructure::config::DashboardSettings;
use chrono::{TimeDelta, Utc};
use futures::stream::Stream;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CHART_FALLBACK_POINTS: i64 = 24;

/// Data from storage, or a generated placeholder with the reason storage
/// could not supply it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Sourced<T> {
    Stored { data: T },
    Fallback { data: T, reason: String },
}

impl<T> Sourced<T> {
    pub fn stored(data: T) -> Self {
        Sourced::Stored { data }
    }

    pub fn fallback(data: T, reason: impl Display) -> Self {
        Sourced::Fallback {
            data,
            reason: reason.to_string(),
        }
    }

    #[cfg(test)]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Sourced::Fallback { .. })
    }

    #[cfg(test)]
    pub fn data(&self) -> &T {
        match self {
            Sourced::Stored { data } | Sourced::Fallback { data, .. } => data,
        }
    }

    #[cfg(test)]
    pub fn into_data(self) -> T {
        match self {
            Sourced::Stored { data } | Sourced::Fallback { data, .. } => data,
        }
    }
}

#[derive(Clone)]
pub struct TelemetryService {
    repository: Option<Arc<dyn TelemetryRepository>>,
    vehicle_id: String,
    profile: Arc<GeneratorProfile>,
    rng: Arc<Mutex<StdRng>>,
    dashboard: DashboardSettings,
}

impl TelemetryService {
    pub fn new(
        repository: Option<Arc<dyn TelemetryRepository>>,
        vehicle_id: String,
        profile: GeneratorProfile,
        rng: StdRng,
        dashboard: DashboardSettings,
    ) -> Self {
        Self {
            repository,
            vehicle_id,
            profile: Arc::new(profile),
            rng: Arc::new(Mutex::new(rng)),
            dashboard,
        }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn profile(&self) -> &GeneratorProfile {
        &self.profile
    }

    /// A freshly generated snapshot, independent of storage
    pub fn sample(&self) -> TelemetrySnapshot {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        generate_sample(&mut *rng, &self.profile)
    }

    /// Real-time paced stream of generated snapshots on its own RNG handle
    pub fn sample_stream(
        &self,
        duration: Duration,
        interval: Duration,
    ) -> impl Stream<Item = TelemetrySnapshot> + Send + use<> {
        let rng = {
            let mut shared = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            StdRng::from_rng(&mut *shared)
        };
        snapshot_stream(rng, GeneratorProfile::clone(&self.profile), duration, interval)
    }

    /// Latest stored reading, or a generated one
    pub async fn current_reading(&self) -> Sourced<Reading> {
        let Some(repo) = &self.repository else {
            return Sourced::fallback(self.sample_reading(), "storage not configured");
        };

        match repo.latest_reading(&self.vehicle_id).await {
            Ok(Some(reading)) => Sourced::stored(reading),
            Ok(None) => Sourced::fallback(self.sample_reading(), "no readings in the last 24h"),
            Err(e) => {
                tracing::warn!("Falling back to generated reading: {:#}", e);
                Sourced::fallback(self.sample_reading(), e)
            }
        }
    }

    /// Recent readings for charts, or a day of generated hourly points
    pub async fn chart_data(&self) -> Sourced<Vec<Reading>> {
        let Some(repo) = &self.repository else {
            return Sourced::fallback(self.generated_chart(), "storage not configured");
        };

        match repo
            .recent_readings(&self.vehicle_id, self.dashboard.chart_hours, self.dashboard.chart_limit)
            .await
        {
            Ok(readings) => Sourced::stored(readings),
            Err(e) => {
                tracing::warn!("Falling back to generated chart data: {:#}", e);
                Sourced::fallback(self.generated_chart(), e)
            }
        }
    }

    /// Current check engine light state and the codes raised with it
    pub async fn mil_status(&self) -> Sourced<MilStatus> {
        let Some(repo) = &self.repository else {
            return Sourced::fallback(self.sample_mil_status(), "storage not configured");
        };

        let hours = self.dashboard.chart_hours;
        let history = match repo.mil_status_history(&self.vehicle_id, hours).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("Falling back to generated MIL status: {:#}", e);
                return Sourced::fallback(self.sample_mil_status(), e);
            }
        };

        let Some(mut latest) = history.into_iter().last() else {
            return Sourced::stored(MilStatus::clear());
        };

        if latest.mil_status {
            match repo.dtc_events(&self.vehicle_id, hours).await {
                Ok(events) => {
                    latest.codes = events
                        .into_iter()
                        .filter(|e| Some(&e.time) == latest.time.as_ref())
                        .map(|e| e.code)
                        .collect();
                }
                Err(e) => tracing::warn!("Could not load DTC events: {:#}", e),
            }
        }

        Sourced::stored(latest)
    }

    pub async fn dtc_events(&self, hours: u32) -> anyhow::Result<Vec<DtcEvent>> {
        self.require_repository()?
            .dtc_events(&self.vehicle_id, hours)
            .await
    }

    pub async fn field_stats(&self, field: &str, hours: u32) -> anyhow::Result<Option<FieldStats>> {
        validate_field(field)?;
        self.require_repository()?
            .field_stats(&self.vehicle_id, field, hours)
            .await
    }

    pub async fn series(
        &self,
        field: &str,
        hours: u32,
        window: &str,
        max_points: usize,
    ) -> anyhow::Result<Vec<TimeSeriesPoint>> {
        validate_field(field)?;
        validate_window(window)?;
        self.require_repository()?
            .aggregated_series(&self.vehicle_id, field, hours, window, max_points)
            .await
    }

    fn require_repository(&self) -> anyhow::Result<&Arc<dyn TelemetryRepository>> {
        self.repository
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("storage not configured"))
    }

    fn sample_reading(&self) -> Reading {
        let mut reading = Reading::from(&self.sample());
        reading
            .values
            .insert("vehicle_id".to_string(), Value::String(self.vehicle_id.clone()));
        reading
    }

    fn sample_mil_status(&self) -> MilStatus {
        let snapshot = self.sample();
        MilStatus {
            time: Some(snapshot.timestamp.to_rfc3339()),
            mil_status: snapshot.mil_status,
            dtc_count: snapshot.dtc_count,
            codes: snapshot.dtcs.into_iter().map(|d| d.code).collect(),
        }
    }

    /// RNG for one chart refresh. A configured seed makes every refresh identical.
    fn chart_rng(&self) -> StdRng {
        match self.dashboard.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => {
                let mut shared = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                StdRng::from_rng(&mut *shared)
            }
        }
    }

    fn generated_chart(&self) -> Vec<Reading> {
        let mut rng = self.chart_rng();
        let now = Utc::now();

        (0..CHART_FALLBACK_POINTS)
            .map(|i| {
                let at = now - TimeDelta::hours(CHART_FALLBACK_POINTS - 1 - i);
                Reading::from(&generate_sample_at(&mut rng, &self.profile, at))
            })
            .collect()
    }
}

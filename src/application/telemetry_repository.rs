// Repository trait for telemetry data access
use crate::domain::snapshot::{Reading, TelemetrySnapshot};
use crate::domain::telemetry::{DtcEvent, FieldStats, MilStatus, TimeSeriesPoint};
use async_trait::async_trait;

#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    /// Persist one snapshot as an `obd_readings` point plus one
    /// `obd_dtc_events` point per active DTC
    async fn write_snapshot(&self, vehicle_id: &str, snapshot: &TelemetrySnapshot) -> anyhow::Result<()>;

    /// Most recent reading within the last 24 hours
    async fn latest_reading(&self, vehicle_id: &str) -> anyhow::Result<Option<Reading>>;

    /// Readings from the last `hours`, oldest first, at most `limit`
    async fn recent_readings(&self, vehicle_id: &str, hours: u32, limit: usize) -> anyhow::Result<Vec<Reading>>;

    /// Min, max, mean and count of a numeric field
    async fn field_stats(&self, vehicle_id: &str, field: &str, hours: u32) -> anyhow::Result<Option<FieldStats>>;

    /// Windowed means of a numeric field, downsampled to `max_points`
    async fn aggregated_series(
        &self,
        vehicle_id: &str,
        field: &str,
        hours: u32,
        window: &str,
        max_points: usize,
    ) -> anyhow::Result<Vec<TimeSeriesPoint>>;

    /// Check engine light history, oldest first. `codes` are left empty.
    async fn mil_status_history(&self, vehicle_id: &str, hours: u32) -> anyhow::Result<Vec<MilStatus>>;

    /// Stored DTC occurrences, oldest first
    async fn dtc_events(&self, vehicle_id: &str, hours: u32) -> anyhow::Result<Vec<DtcEvent>>;

    /// Mean of every numeric field
    async fn field_averages(&self, vehicle_id: &str, hours: u32) -> anyhow::Result<Vec<(String, f64)>>;
}

// Telemetry query domain models
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric fields stored on every `obd_readings` point.
pub const NUMERIC_FIELDS: &[&str] = &[
    "rpm",
    "speed",
    "throttle_position",
    "engine_load",
    "coolant_temp",
    "intake_temp",
    "oil_temp",
    "fuel_level",
    "fuel_pressure",
    "fuel_rate",
    "maf",
    "intake_pressure",
    "battery_voltage",
    "ambient_temp",
    "barometric_pressure",
    "distance",
    "runtime",
    "dtc_count",
];

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("unknown telemetry field: {0}")]
    UnknownField(String),
    #[error("invalid aggregation window: {0}")]
    InvalidWindow(String),
}

pub fn validate_field(field: &str) -> Result<(), QueryError> {
    if NUMERIC_FIELDS.contains(&field) {
        Ok(())
    } else {
        Err(QueryError::UnknownField(field.to_string()))
    }
}

/// Windows look like `10m`, `1h`, `30s`, `1d`.
pub fn validate_window(window: &str) -> Result<(), QueryError> {
    let valid = match window.chars().last() {
        Some(unit) => {
            let digits = &window[..window.len() - unit.len_utf8()];
            !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
                && matches!(unit, 's' | 'm' | 'h' | 'd')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(QueryError::InvalidWindow(window.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStats {
    pub field: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: u64,
}

/// Check engine light state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilStatus {
    pub time: Option<String>,
    pub mil_status: bool,
    pub dtc_count: u32,
    pub codes: Vec<String>,
}

impl MilStatus {
    pub fn clear() -> Self {
        Self {
            time: None,
            mil_status: false,
            dtc_count: 0,
            codes: Vec::new(),
        }
    }
}

/// A stored DTC occurrence with the engine conditions it was raised under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DtcEvent {
    pub time: String,
    pub code: String,
    pub severity: String,
    pub description: String,
    pub rpm: Option<f64>,
    pub speed: Option<f64>,
    pub coolant_temp: Option<f64>,
    pub engine_load: Option<f64>,
}

// Telemetry snapshot domain model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A diagnostic trouble code: short identifier plus human description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiagnosticCode {
    pub code: String,
    pub description: String,
}

impl DiagnosticCode {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        if self.description.to_lowercase().contains("misfire") {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
        }
    }
}

/// Codes commonly behind a lit check engine light.
pub fn default_catalog() -> Vec<DiagnosticCode> {
    [
        ("P0300", "Random/Multiple Cylinder Misfire Detected"),
        ("P0420", "Catalyst System Efficiency Below Threshold"),
        ("P0171", "System Too Lean (Bank 1)"),
        ("P0128", "Coolant Thermostat Temperature Below Regulating Temperature"),
        ("P0442", "EVAP System Leak Detected (small leak)"),
        ("P0455", "EVAP System Leak Detected (large leak)"),
        ("P0301", "Cylinder 1 Misfire Detected"),
        ("P0401", "EGR System Flow Insufficient"),
        ("P0507", "Idle Control System RPM Higher Than Expected"),
        ("P0113", "Intake Air Temperature Sensor Circuit High"),
    ]
    .into_iter()
    .map(|(code, description)| DiagnosticCode::new(code, description))
    .collect()
}

/// One instant of vehicle state. Built by the generator, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    // Engine
    pub rpm: u32,
    pub speed: u32,
    pub throttle_position: f64,
    pub engine_load: f64,

    // Temperatures (°C)
    pub coolant_temp: i32,
    pub intake_temp: i32,
    pub oil_temp: i32,

    // Fuel system
    pub fuel_level: f64,
    pub fuel_pressure: f64,
    pub fuel_rate: f64,

    // Air flow
    pub maf: f64,
    pub intake_pressure: f64,

    // Other sensors
    pub battery_voltage: f64,
    pub ambient_temp: i32,
    pub barometric_pressure: f64,

    pub distance: f64,
    pub runtime: u32,

    // Diagnostics
    pub mil_status: bool,
    pub dtc_count: u32,
    pub dtcs: Vec<DiagnosticCode>,

    pub timestamp: DateTime<Utc>,
    pub unix_timestamp: i64,
}

impl TelemetrySnapshot {
    /// Every numeric value under the name it is stored with.
    pub fn numeric_fields(&self) -> Vec<(&'static str, NumericValue)> {
        use NumericValue::{Float, Int};

        vec![
            ("rpm", Int(self.rpm as i64)),
            ("speed", Int(self.speed as i64)),
            ("throttle_position", Float(self.throttle_position)),
            ("engine_load", Float(self.engine_load)),
            ("coolant_temp", Int(self.coolant_temp as i64)),
            ("intake_temp", Int(self.intake_temp as i64)),
            ("oil_temp", Int(self.oil_temp as i64)),
            ("fuel_level", Float(self.fuel_level)),
            ("fuel_pressure", Float(self.fuel_pressure)),
            ("fuel_rate", Float(self.fuel_rate)),
            ("maf", Float(self.maf)),
            ("intake_pressure", Float(self.intake_pressure)),
            ("battery_voltage", Float(self.battery_voltage)),
            ("ambient_temp", Int(self.ambient_temp as i64)),
            ("barometric_pressure", Float(self.barometric_pressure)),
            ("distance", Float(self.distance)),
            ("runtime", Int(self.runtime as i64)),
            ("dtc_count", Int(self.dtc_count as i64)),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericValue {
    Int(i64),
    Float(f64),
}

impl NumericValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            NumericValue::Int(v) => v as f64,
            NumericValue::Float(v) => v,
        }
    }
}

/// A row as returned by the storage collaborator: a timestamp plus a flat
/// field map. Synthesized snapshots convert into the same shape so API
/// consumers see one format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub time: String,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl Reading {
    pub fn new(time: String, values: Map<String, Value>) -> Self {
        Self { time, values }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.values.get(field).and_then(Value::as_f64)
    }

    /// Render a field for display, "Unknown" when absent.
    pub fn display(&self, field: &str) -> String {
        match self.values.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "Unknown".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

impl From<&TelemetrySnapshot> for Reading {
    fn from(snapshot: &TelemetrySnapshot) -> Self {
        let mut values = Map::new();
        for (name, value) in snapshot.numeric_fields() {
            let json = match value {
                NumericValue::Int(v) => Value::from(v),
                NumericValue::Float(v) => Value::from(v),
            };
            values.insert(name.to_string(), json);
        }
        values.insert("mil_status".to_string(), Value::Bool(snapshot.mil_status));
        values.insert(
            "dtcs".to_string(),
            Value::Array(
                snapshot
                    .dtcs
                    .iter()
                    .map(|d| Value::String(d.code.clone()))
                    .collect(),
            ),
        );

        Reading::new(snapshot.timestamp.to_rfc3339(), values)
    }
}

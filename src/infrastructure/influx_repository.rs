// InfluxDB repository implementation
//
// Writes go through the InfluxDB 2 client as line protocol. Reads use the
// InfluxQL compatibility endpoint with the bucket mapped as the database.
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::snapshot::{NumericValue, Reading, TelemetrySnapshot};
use crate::domain::telemetry::{validate_field, validate_window, DtcEvent, FieldStats, MilStatus, TimeSeriesPoint};
use crate::infrastructure::config::{prepare_query, InfluxSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use influxdb2::models::DataPoint;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

const READINGS_MEASUREMENT: &str = "obd_readings";
const DTC_MEASUREMENT: &str = "obd_dtc_events";

const LATEST_QUERY: &str = "SELECT * FROM obd_readings WHERE vehicle_id = '${vehicle}' \
    AND time >= now() - 24h ORDER BY time DESC LIMIT 1";
const RECENT_QUERY: &str = "SELECT * FROM obd_readings WHERE vehicle_id = '${vehicle}' \
    AND time >= now() - ${hours}h ORDER BY time DESC LIMIT ${limit}";
const STATS_QUERY: &str = "SELECT MIN(\"${field}\") AS min, MAX(\"${field}\") AS max, \
    MEAN(\"${field}\") AS mean, COUNT(\"${field}\") AS count FROM obd_readings \
    WHERE vehicle_id = '${vehicle}' AND time >= now() - ${hours}h";
const SERIES_QUERY: &str = "SELECT MEAN(\"${field}\") AS value FROM obd_readings \
    WHERE vehicle_id = '${vehicle}' AND time >= now() - ${hours}h GROUP BY time(${window}) fill(none)";
const MIL_QUERY: &str = "SELECT \"dtc_count\", \"mil_status\" FROM obd_readings \
    WHERE vehicle_id = '${vehicle}' AND time >= now() - ${hours}h ORDER BY time ASC";
const DTC_QUERY: &str = "SELECT * FROM obd_dtc_events WHERE vehicle_id = '${vehicle}' \
    AND time >= now() - ${hours}h ORDER BY time ASC";
const AVERAGES_QUERY: &str = "SELECT MEAN(*) FROM obd_readings WHERE vehicle_id = '${vehicle}' \
    AND time >= now() - ${hours}h";

pub struct InfluxRepository {
    host: String,
    token: String,
    bucket: String,
    client: influxdb2::Client,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    #[allow(dead_code)]
    name: String,
    columns: Vec<String>,
    values: Vec<Vec<Value>>,
}

impl InfluxQLResponse {
    fn series(&self) -> impl Iterator<Item = &InfluxQLSeries> {
        self.results
            .first()
            .and_then(|r| r.series.as_ref())
            .into_iter()
            .flatten()
    }

    /// Every row as a column → value map
    fn rows(&self) -> impl Iterator<Item = Map<String, Value>> + '_ {
        self.series().flat_map(|s| {
            s.values.iter().map(move |row| {
                s.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
        })
    }
}

impl InfluxRepository {
    pub fn new(settings: &InfluxSettings) -> Self {
        let host = settings.url.trim_end_matches('/').to_string();
        Self {
            client: influxdb2::Client::new(host.clone(), settings.org.clone(), settings.token.clone()),
            http: reqwest::Client::new(),
            host,
            token: settings.token.clone(),
            bucket: settings.bucket.clone(),
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!("{}/query?db={}&q={}", self.host, self.bucket, encoded_query)
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        tracing::debug!("Executing InfluxQL query: {}", query);
        let url = self.build_query_url(query);

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(error) = data.results.first().and_then(|r| r.error.as_ref()) {
            anyhow::bail!("InfluxDB query error: {}", error);
        }

        Ok(data)
    }

    async fn run(&self, template: &str, vars: &HashMap<String, String>) -> Result<InfluxQLResponse> {
        self.execute_query(&prepare_query(template, vars)).await
    }
}

fn query_vars(vehicle_id: &str, hours: u32) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("vehicle".to_string(), escape_literal(vehicle_id));
    vars.insert("hours".to_string(), hours.to_string());
    vars
}

/// Escape a value placed inside a single-quoted InfluxQL string literal
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// The `obd_readings` point plus one `obd_dtc_events` point per active code,
/// all sharing the snapshot timestamp
fn snapshot_points(vehicle_id: &str, snapshot: &TelemetrySnapshot) -> Result<Vec<DataPoint>> {
    let timestamp = snapshot.timestamp.timestamp_nanos_opt();

    let mut builder = DataPoint::builder(READINGS_MEASUREMENT)
        .tag("vehicle_id", vehicle_id)
        .tag("mil_status", snapshot.mil_status.to_string());
    for (name, value) in snapshot.numeric_fields() {
        builder = match value {
            NumericValue::Int(v) => builder.field(name, v),
            NumericValue::Float(v) => builder.field(name, v),
        };
    }
    if let Some(ts) = timestamp {
        builder = builder.timestamp(ts);
    }

    let mut points = vec![builder.build().context("Failed to build reading point")?];

    for dtc in &snapshot.dtcs {
        let mut builder = DataPoint::builder(DTC_MEASUREMENT)
            .tag("vehicle_id", vehicle_id)
            .tag("dtc_code", dtc.code.as_str())
            .tag("severity", dtc.severity().as_str())
            .field("description", dtc.description.clone())
            .field("rpm", snapshot.rpm as i64)
            .field("speed", snapshot.speed as i64)
            .field("coolant_temp", snapshot.coolant_temp as i64)
            .field("engine_load", snapshot.engine_load);
        if let Some(ts) = timestamp {
            builder = builder.timestamp(ts);
        }
        points.push(builder.build().context("Failed to build DTC event point")?);
    }

    Ok(points)
}

/// `mil_status` is a tag and comes back as a string
fn normalize_value(column: &str, value: Value) -> Value {
    match (column, value) {
        ("mil_status", Value::String(s)) => Value::Bool(s.eq_ignore_ascii_case("true")),
        (_, value) => value,
    }
}

fn readings_from(response: &InfluxQLResponse) -> Vec<Reading> {
    response
        .rows()
        .filter_map(|mut row| {
            let time = row.remove("time")?.as_str()?.to_string();
            let values = row
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| {
                    let v = normalize_value(&k, v);
                    (k, v)
                })
                .collect();
            Some(Reading::new(time, values))
        })
        .collect()
}

fn stats_from(response: &InfluxQLResponse, field: &str) -> Option<FieldStats> {
    let row = response.rows().next()?;
    let count = row.get("count").and_then(Value::as_u64).unwrap_or(0);
    if count == 0 {
        return None;
    }

    Some(FieldStats {
        field: field.to_string(),
        min: row.get("min").and_then(Value::as_f64)?,
        max: row.get("max").and_then(Value::as_f64)?,
        mean: row.get("mean").and_then(Value::as_f64)?,
        count,
    })
}

fn points_from(response: &InfluxQLResponse) -> Vec<TimeSeriesPoint> {
    let mut points = Vec::new();
    for s in response.series() {
        let time_idx = s.columns.iter().position(|c| c == "time").unwrap_or(0);
        let value_idx = s.columns.iter().position(|c| c == "value").unwrap_or(1);

        for value_row in &s.values {
            if let (Some(time_str), Some(value)) = (
                value_row.get(time_idx).and_then(Value::as_str),
                value_row.get(value_idx).and_then(Value::as_f64),
            ) {
                if let Ok(time) = chrono::DateTime::parse_from_rfc3339(time_str) {
                    points.push(TimeSeriesPoint::new(time.timestamp_millis(), value));
                }
            }
        }
    }
    points
}

fn mil_history_from(response: &InfluxQLResponse) -> Vec<MilStatus> {
    response
        .rows()
        .map(|row| MilStatus {
            time: row.get("time").and_then(Value::as_str).map(str::to_string),
            mil_status: matches!(
                row.get("mil_status").cloned().map(|v| normalize_value("mil_status", v)),
                Some(Value::Bool(true))
            ),
            dtc_count: row.get("dtc_count").and_then(Value::as_u64).unwrap_or(0) as u32,
            codes: Vec::new(),
        })
        .collect()
}

fn dtc_events_from(response: &InfluxQLResponse) -> Vec<DtcEvent> {
    let text = |row: &Map<String, Value>, key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    response
        .rows()
        .map(|row| DtcEvent {
            time: text(&row, "time"),
            code: text(&row, "dtc_code"),
            severity: text(&row, "severity"),
            description: text(&row, "description"),
            rpm: row.get("rpm").and_then(Value::as_f64),
            speed: row.get("speed").and_then(Value::as_f64),
            coolant_temp: row.get("coolant_temp").and_then(Value::as_f64),
            engine_load: row.get("engine_load").and_then(Value::as_f64),
        })
        .collect()
}

fn averages_from(response: &InfluxQLResponse) -> Vec<(String, f64)> {
    let Some(row) = response.rows().next() else {
        return Vec::new();
    };

    let mut averages: Vec<(String, f64)> = row
        .iter()
        .filter_map(|(column, value)| {
            let field = column.strip_prefix("mean_")?;
            Some((field.to_string(), value.as_f64()?))
        })
        .collect();
    averages.sort_by(|a, b| a.0.cmp(&b.0));
    averages
}

#[async_trait]
impl TelemetryRepository for InfluxRepository {
    async fn write_snapshot(&self, vehicle_id: &str, snapshot: &TelemetrySnapshot) -> Result<()> {
        let points = snapshot_points(vehicle_id, snapshot)?;
        let count = points.len();

        self.client
            .write(&self.bucket, futures::stream::iter(points))
            .await
            .context("Failed to write points to InfluxDB")?;

        tracing::debug!("Wrote {} points for {}", count, vehicle_id);
        Ok(())
    }

    async fn latest_reading(&self, vehicle_id: &str) -> Result<Option<Reading>> {
        let response = self.run(LATEST_QUERY, &query_vars(vehicle_id, 24)).await?;
        Ok(readings_from(&response).into_iter().next())
    }

    async fn recent_readings(&self, vehicle_id: &str, hours: u32, limit: usize) -> Result<Vec<Reading>> {
        let mut vars = query_vars(vehicle_id, hours);
        vars.insert("limit".to_string(), limit.to_string());

        let response = self.run(RECENT_QUERY, &vars).await?;
        let mut readings = readings_from(&response);
        readings.reverse();
        Ok(readings)
    }

    async fn field_stats(&self, vehicle_id: &str, field: &str, hours: u32) -> Result<Option<FieldStats>> {
        validate_field(field)?;
        let mut vars = query_vars(vehicle_id, hours);
        vars.insert("field".to_string(), field.to_string());

        let response = self.run(STATS_QUERY, &vars).await?;
        Ok(stats_from(&response, field))
    }

    async fn aggregated_series(
        &self,
        vehicle_id: &str,
        field: &str,
        hours: u32,
        window: &str,
        max_points: usize,
    ) -> Result<Vec<TimeSeriesPoint>> {
        validate_field(field)?;
        validate_window(window)?;
        let mut vars = query_vars(vehicle_id, hours);
        vars.insert("field".to_string(), field.to_string());
        vars.insert("window".to_string(), window.to_string());

        let response = self.run(SERIES_QUERY, &vars).await?;
        Ok(downsample_points(points_from(&response), max_points))
    }

    async fn mil_status_history(&self, vehicle_id: &str, hours: u32) -> Result<Vec<MilStatus>> {
        let response = self.run(MIL_QUERY, &query_vars(vehicle_id, hours)).await?;
        Ok(mil_history_from(&response))
    }

    async fn dtc_events(&self, vehicle_id: &str, hours: u32) -> Result<Vec<DtcEvent>> {
        let response = self.run(DTC_QUERY, &query_vars(vehicle_id, hours)).await?;
        Ok(dtc_events_from(&response))
    }

    async fn field_averages(&self, vehicle_id: &str, hours: u32) -> Result<Vec<(String, f64)>> {
        let response = self.run(AVERAGES_QUERY, &query_vars(vehicle_id, hours)).await?;
        Ok(averages_from(&response))
    }
}

/// Downsample time series points using bucket averaging
fn downsample_points(points: Vec<TimeSeriesPoint>, max_points: usize) -> Vec<TimeSeriesPoint> {
    if points.is_empty() || max_points == 0 || points.len() <= max_points {
        return points;
    }

    let bucket_size = (points.len() as f64 / max_points as f64).ceil() as usize;
    let mut downsampled = Vec::with_capacity(max_points);

    for chunk in points.chunks(bucket_size) {
        // Middle point's timestamp, average value
        let mid_idx = chunk.len() / 2;
        let avg_value = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;

        downsampled.push(TimeSeriesPoint::new(chunk[mid_idx].time_ms, avg_value));
    }

    downsampled
}

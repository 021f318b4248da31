// Diagnostics service - LLM questions over stored telemetry
use crate::application::llm_client::LlmClient;
use crate::application::telemetry_repository::TelemetryRepository;
use crate::domain::snapshot::Reading;
use crate::domain::telemetry::{validate_field, DtcEvent};
use std::collections::BTreeMap;
use std::sync::Arc;

const DIAGNOSTIC_FIELDS: &[&str] = &["rpm", "coolant_temp", "engine_load", "fuel_rate", "battery_voltage"];
const TREND_WINDOW: &str = "10m";
const TREND_POINTS: usize = 20;

const REASONING: &str = "Reason step by step before giving your final answer.";

const QUERY_SYSTEM: &str = "You analyze OBD-II vehicle data and provide insights. \
    Give a detailed analysis and answer to the question.";
const DIAGNOSE_SYSTEM: &str = "You diagnose potential vehicle issues from OBD-II data. \
    Give a diagnostic assessment, potential issues, and recommendations.";
const TREND_SYSTEM: &str = "You analyze trends in vehicle sensor data over time. \
    Give a trend analysis and insights.";
const MAINTENANCE_SYSTEM: &str = "You provide maintenance recommendations based on OBD-II data.";

#[derive(Clone)]
pub struct DiagnosticsService {
    repository: Arc<dyn TelemetryRepository>,
    llm: Arc<dyn LlmClient>,
    vehicle_id: String,
}

impl DiagnosticsService {
    pub fn new(repository: Arc<dyn TelemetryRepository>, llm: Arc<dyn LlmClient>, vehicle_id: String) -> Self {
        Self {
            repository,
            llm,
            vehicle_id,
        }
    }

    /// Answer a free-form question about the last `hours` of readings
    pub async fn query(&self, question: &str, hours: u32) -> anyhow::Result<String> {
        let readings = self.repository.recent_readings(&self.vehicle_id, hours, 100).await?;
        let prompt = format!(
            "Raw OBD data from vehicle sensors:\n{}\n\nQuestion about the vehicle data:\n{}",
            format_readings(&readings, &self.vehicle_id),
            question
        );
        self.ask(QUERY_SYSTEM, &prompt).await
    }

    /// Assess vehicle health from the latest reading and key field statistics
    pub async fn diagnose(&self, hours: u32) -> anyhow::Result<String> {
        let latest = self.repository.latest_reading(&self.vehicle_id).await?;

        let mut stats = BTreeMap::new();
        for field in DIAGNOSTIC_FIELDS {
            if let Some(field_stats) = self.repository.field_stats(&self.vehicle_id, field, hours).await? {
                stats.insert(*field, field_stats);
            }
        }

        let prompt = format!(
            "Current OBD sensor readings:\n{}\n\nStatistical summary of recent readings:\n{}",
            format_reading(latest.as_ref(), &self.vehicle_id),
            serde_json::to_string_pretty(&stats)?
        );
        self.ask(DIAGNOSE_SYSTEM, &prompt).await
    }

    /// Describe how one field has moved over the last `hours`
    pub async fn analyze_trend(&self, field: &str, hours: u32) -> anyhow::Result<String> {
        validate_field(field)?;

        let stats = self.repository.field_stats(&self.vehicle_id, field, hours).await?;
        let series = self
            .repository
            .aggregated_series(&self.vehicle_id, field, hours, TREND_WINDOW, usize::MAX)
            .await?;

        let Some(stats) = stats.filter(|_| !series.is_empty()) else {
            return Ok(format!("No data available for {}", field));
        };

        let prompt = format!(
            "Name of the sensor/field being analyzed:\n{}\n\nMin, max, mean values over time period:\n{}\n\nTime-series data points:\n{}",
            field,
            serde_json::to_string_pretty(&stats)?,
            serde_json::to_string_pretty(&series[..series.len().min(TREND_POINTS)])?
        );
        self.ask(TREND_SYSTEM, &prompt).await
    }

    /// Maintenance recommendations from the latest reading
    pub async fn maintenance_advice(&self) -> anyhow::Result<String> {
        let Some(latest) = self.repository.latest_reading(&self.vehicle_id).await? else {
            return Ok("No recent data available".to_string());
        };

        let dtc_info = format!(
            "MIL Status: {}\nDTC Count: {}",
            latest.display("mil_status"),
            latest.get("dtc_count").map(|v| v.to_string()).unwrap_or_else(|| "0".to_string())
        );
        let mileage = latest.get_f64("distance").unwrap_or(0.0);

        let prompt = format!(
            "Current vehicle sensor readings:\n{}\n\nDiagnostic trouble code information:\n{}\n\nTotal distance traveled:\n{} km",
            format_reading(Some(&latest), &self.vehicle_id),
            dtc_info,
            mileage
        );
        self.ask(MAINTENANCE_SYSTEM, &prompt).await
    }

    async fn ask(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        tracing::debug!("LLM prompt ({} chars)", prompt.len());
        let system = format!("{} {}", system, REASONING);
        self.llm.complete(&system, prompt).await
    }
}

/// Plain-text summary of average conditions and DTC events. No LLM involved.
pub async fn vehicle_context(
    repository: &dyn TelemetryRepository,
    vehicle_id: &str,
    hours: u32,
) -> anyhow::Result<String> {
    let averages = repository.field_averages(vehicle_id, hours).await?;
    let events = repository.dtc_events(vehicle_id, hours).await?;
    Ok(format_context(vehicle_id, hours, &averages, &events))
}

pub fn format_context(vehicle_id: &str, hours: u32, averages: &[(String, f64)], events: &[DtcEvent]) -> String {
    let conditions: String = averages
        .iter()
        .map(|(field, value)| format!("- {}: {:.2}\n", field, value))
        .collect();
    let mut context = format!(
        "Vehicle {} - Last {} hours:\n\nAverage Conditions:\n{}",
        vehicle_id, hours, conditions
    );

    if !events.is_empty() {
        context.push_str("\nDiagnostic Events:\n");
        context.extend(
            events
                .iter()
                .map(|event| format!("- [{}] {}: {}\n", event.time, event.code, event.description)),
        );
    }

    context
}

/// Prompt sections: heading, then (label, field, unit) per line
const READING_SECTIONS: &[(&str, &[(&str, &str, &str)])] = &[
    (
        "Engine",
        &[
            ("RPM", "rpm", " rpm"),
            ("Speed", "speed", " km/h"),
            ("Throttle Position", "throttle_position", "%"),
            ("Engine Load", "engine_load", "%"),
            ("Runtime", "runtime", " seconds"),
        ],
    ),
    (
        "Temperatures",
        &[
            ("Coolant", "coolant_temp", "°C"),
            ("Intake Air", "intake_temp", "°C"),
            ("Oil", "oil_temp", "°C"),
            ("Ambient", "ambient_temp", "°C"),
        ],
    ),
    (
        "Fuel System",
        &[
            ("Fuel Level", "fuel_level", "%"),
            ("Fuel Pressure", "fuel_pressure", " kPa"),
            ("Fuel Rate", "fuel_rate", " L/h"),
        ],
    ),
    (
        "Air Flow",
        &[
            ("MAF", "maf", " g/s"),
            ("Intake Pressure", "intake_pressure", " kPa"),
            ("Barometric Pressure", "barometric_pressure", " kPa"),
        ],
    ),
    (
        "Other",
        &[
            ("Battery Voltage", "battery_voltage", " V"),
            ("Distance", "distance", " km"),
            ("MIL Status", "mil_status", ""),
            ("DTC Count", "dtc_count", ""),
        ],
    ),
];

/// Format a single reading for a prompt
pub fn format_reading(reading: Option<&Reading>, vehicle_id: &str) -> String {
    let Some(r) = reading else {
        return "No data available".to_string();
    };

    let vehicle = match r.get("vehicle_id") {
        Some(_) => r.display("vehicle_id"),
        None => vehicle_id.to_string(),
    };

    let sections: Vec<String> = READING_SECTIONS
        .iter()
        .map(|(heading, lines)| {
            let body: String = lines
                .iter()
                .map(|(label, field, unit)| format!("  - {}: {}{}\n", label, r.display(field), unit))
                .collect();
            format!("{}:\n{}", heading, body)
        })
        .collect();

    format!(
        "Current Vehicle Readings:\nTime: {}\nVehicle ID: {}\n\n{}",
        r.time,
        vehicle,
        sections.join("\n")
    )
}

/// Format a batch of readings; only the latest is shown in detail
pub fn format_readings(readings: &[Reading], vehicle_id: &str) -> String {
    let Some(latest) = readings.last() else {
        return "No data available".to_string();
    };

    format!(
        "Vehicle Data ({} readings):\n\nLatest Reading:\n{}",
        readings.len(),
        format_reading(Some(latest), vehicle_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fakes::{InMemoryRepository, RecordingLlm};
    use crate::domain::generator::{generate_sample, GeneratorProfile};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    async fn seeded_repository(count: usize, fault_probability: f64) -> Arc<InMemoryRepository> {
        let repo = Arc::new(InMemoryRepository::default());
        let profile = GeneratorProfile {
            fault_probability,
            ..GeneratorProfile::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..count {
            repo.write_snapshot("vehicle_001", &generate_sample(&mut rng, &profile))
                .await
                .unwrap();
        }
        repo
    }

    fn service(repo: Arc<InMemoryRepository>, llm: Arc<RecordingLlm>) -> DiagnosticsService {
        DiagnosticsService::new(repo, llm, "vehicle_001".to_string())
    }

    #[test]
    fn test_format_reading_without_data() {
        assert_eq!(format_reading(None, "vehicle_001"), "No data available");
        assert_eq!(format_readings(&[], "vehicle_001"), "No data available");
    }

    #[test]
    fn test_format_reading_sections() {
        let snapshot = generate_sample(&mut StdRng::seed_from_u64(1), &GeneratorProfile::default());
        let reading = Reading::from(&snapshot);
        let text = format_reading(Some(&reading), "vehicle_001");

        assert!(text.starts_with("Current Vehicle Readings:\n"));
        assert!(text.contains("Vehicle ID: vehicle_001"));
        assert!(text.contains(&format!("  - RPM: {} rpm", snapshot.rpm)));
        assert!(text.contains(&format!("  - Coolant: {}°C", snapshot.coolant_temp)));
        assert!(text.contains(&format!("  - MIL Status: {}", snapshot.mil_status)));
        assert!(text.contains(" seconds\n\nTemperatures:\n"));
        assert!(text.contains(" kPa\n\nOther:\n  - Battery Voltage: "));
        assert!(text.ends_with(&format!("  - DTC Count: {}\n", snapshot.dtc_count)));
    }

    #[test]
    fn test_format_readings_counts() {
        let mut rng = StdRng::seed_from_u64(1);
        let readings: Vec<_> = (0..3)
            .map(|_| Reading::from(&generate_sample(&mut rng, &GeneratorProfile::default())))
            .collect();

        let text = format_readings(&readings, "vehicle_001");
        assert!(text.starts_with("Vehicle Data (3 readings):"));
        assert!(text.contains(&format!("Time: {}", readings[2].time)));
    }

    #[test]
    fn test_format_context() {
        let averages = vec![("rpm".to_string(), 1500.0), ("speed".to_string(), 42.126)];
        let events = vec![DtcEvent {
            time: "2025-01-01T00:00:00+00:00".to_string(),
            code: "P0420".to_string(),
            severity: "medium".to_string(),
            description: "Catalyst System Efficiency Below Threshold".to_string(),
            rpm: None,
            speed: None,
            coolant_temp: None,
            engine_load: None,
        }];

        let context = format_context("vehicle_001", 24, &averages, &events);

        assert_eq!(
            context,
            "Vehicle vehicle_001 - Last 24 hours:\n\nAverage Conditions:\n- rpm: 1500.00\n- speed: 42.13\n\n\
             Diagnostic Events:\n- [2025-01-01T00:00:00+00:00] P0420: Catalyst System Efficiency Below Threshold\n"
        );
    }

    #[test]
    fn test_format_context_without_events() {
        let context = format_context("vehicle_001", 6, &[], &[]);
        assert!(!context.contains("Diagnostic Events"));
    }

    #[tokio::test]
    async fn test_query_sends_question_and_data() {
        let llm = Arc::new(RecordingLlm::default());
        let svc = service(seeded_repository(5, 0.0).await, llm.clone());

        let answer = svc.query("what is causing the check engine light?", 24).await.unwrap();

        assert_eq!(answer, "canned analysis");
        let prompts = llm.prompts.lock().unwrap();
        let (system, prompt) = &prompts[0];
        assert!(system.contains("step by step"));
        assert!(prompt.contains("Vehicle Data (5 readings)"));
        assert!(prompt.ends_with("what is causing the check engine light?"));
    }

    #[tokio::test]
    async fn test_diagnose_includes_stats() {
        let llm = Arc::new(RecordingLlm::default());
        let svc = service(seeded_repository(3, 0.0).await, llm.clone());

        svc.diagnose(24).await.unwrap();

        let prompts = llm.prompts.lock().unwrap();
        for field in DIAGNOSTIC_FIELDS {
            assert!(prompts[0].1.contains(&format!("\"{}\"", field)));
        }
    }

    #[tokio::test]
    async fn test_trend_without_data_skips_llm() {
        let llm = Arc::new(RecordingLlm::default());
        let svc = service(Arc::new(InMemoryRepository::default()), llm.clone());

        let answer = svc.analyze_trend("rpm", 24).await.unwrap();

        assert_eq!(answer, "No data available for rpm");
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trend_limits_points() {
        let llm = Arc::new(RecordingLlm::default());
        let svc = service(seeded_repository(30, 0.0).await, llm.clone());

        svc.analyze_trend("coolant_temp", 24).await.unwrap();

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts[0].1.matches("\"time_ms\"").count(), TREND_POINTS);
    }

    #[tokio::test]
    async fn test_trend_rejects_unknown_field() {
        let svc = service(seeded_repository(1, 0.0).await, Arc::new(RecordingLlm::default()));
        assert!(svc.analyze_trend("warp_factor", 24).await.is_err());
    }

    #[tokio::test]
    async fn test_maintenance_without_data() {
        let svc = service(Arc::new(InMemoryRepository::default()), Arc::new(RecordingLlm::default()));
        assert_eq!(svc.maintenance_advice().await.unwrap(), "No recent data available");
    }

    #[tokio::test]
    async fn test_maintenance_reports_mil_and_mileage() {
        let llm = Arc::new(RecordingLlm::default());
        let repo = seeded_repository(2, 1.0).await;
        let latest = repo.stored().last().cloned().unwrap();
        let svc = service(repo, llm.clone());

        svc.maintenance_advice().await.unwrap();

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].1.contains("MIL Status: true"));
        assert!(prompts[0].1.contains(&format!("DTC Count: {}", latest.dtc_count)));
        assert!(prompts[0].1.contains(&format!("{} km", latest.distance)));
    }

    #[tokio::test]
    async fn test_llm_failure_propagates() {
        let llm = Arc::new(RecordingLlm {
            fail: true,
            ..RecordingLlm::default()
        });
        let svc = service(seeded_repository(1, 0.0).await, llm);

        let err = svc.query("anything", 1).await.unwrap_err();
        assert_eq!(err.to_string(), "model offline");
    }

    #[tokio::test]
    async fn test_vehicle_context_from_repository() {
        let repo = seeded_repository(4, 1.0).await;
        let context = vehicle_context(repo.as_ref(), "vehicle_001", 24).await.unwrap();

        assert!(context.contains("- rpm: "));
        assert!(context.contains("Diagnostic Events:"));
    }
}

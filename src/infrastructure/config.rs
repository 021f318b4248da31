use crate::domain::generator::{GeneratorProfile, ProfileError};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{section} section is not configured")]
    SectionMissing { section: &'static str },
    #[error("invalid generator profile: {0}")]
    InvalidProfile(#[from] ProfileError),
    #[error("collector interval must be greater than zero")]
    ZeroInterval,
    #[error("collector interval of {0} seconds is out of range")]
    IntervalOutOfRange(f64),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_vehicle_id")]
    pub vehicle_id: String,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub influx: Option<InfluxSettings>,
    #[serde(default)]
    pub llm: Option<LlmSettings>,
    #[serde(default)]
    pub collector: CollectorSettings,
    #[serde(default)]
    pub dashboard: DashboardSettings,
    #[serde(default)]
    pub generator: GeneratorProfile,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_addr")]
    pub addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { addr: default_addr() }
    }
}

/// Connection parameters for InfluxDB. Every field is required; a section
/// that exists but misses one is rejected by [`InfluxSettings::validate`].
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InfluxSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub bucket: String,
}

impl InfluxSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Missing("INFLUXDB_URL"));
        }
        if self.token.is_empty() {
            return Err(ConfigError::Missing("INFLUXDB_TOKEN"));
        }
        if self.org.is_empty() {
            return Err(ConfigError::Missing("INFLUXDB_ORG"));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::Missing("INFLUXDB_BUCKET"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmSettings {
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,
    #[serde(default = "default_llm_api_key")]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorSettings {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl CollectorSettings {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn interval(&self) -> Result<Duration, ConfigError> {
        if !(self.interval_secs > 0.0) {
            return Err(ConfigError::ZeroInterval);
        }
        Duration::try_from_secs_f64(self.interval_secs)
            .map_err(|_| ConfigError::IntervalOutOfRange(self.interval_secs))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardSettings {
    /// Reseed chart fallbacks with this value on every refresh
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_chart_hours")]
    pub chart_hours: u32,
    #[serde(default = "default_chart_limit")]
    pub chart_limit: usize,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            seed: None,
            chart_hours: default_chart_hours(),
            chart_limit: default_chart_limit(),
        }
    }
}

fn default_vehicle_id() -> String {
    "vehicle_001".to_string()
}

fn default_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_llm_api_base() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_api_key() -> String {
    "ollama".to_string()
}

fn default_llm_model() -> String {
    "tinyllama".to_string()
}

fn default_duration_secs() -> u64 {
    60
}

fn default_interval_secs() -> f64 {
    2.0
}

fn default_chart_hours() -> u32 {
    24
}

fn default_chart_limit() -> usize {
    100
}

/// Environment variables understood without the `OBD__` prefix.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("VEHICLE_ID", "vehicle_id"),
    ("INFLUXDB_URL", "influx.url"),
    ("INFLUXDB_TOKEN", "influx.token"),
    ("INFLUXDB_ORG", "influx.org"),
    ("INFLUXDB_BUCKET", "influx.bucket"),
    ("LLM_API_BASE", "llm.api_base"),
    ("LLM_API_KEY", "llm.api_key"),
    ("LLM_API_MODEL", "llm.model"),
    ("OBD_DURATION", "collector.duration_secs"),
    ("OBD_INTERVAL", "collector.interval_secs"),
];

pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let env: HashMap<String, String> = std::env::vars().collect();
    build_app_config(config::File::with_name("config/obd").required(false), &env)
}

fn build_app_config<S>(file: S, env: &HashMap<String, String>) -> anyhow::Result<AppConfig>
where
    S: config::Source + Send + Sync + 'static,
{
    let mut builder = config::Config::builder().add_source(file).add_source(
        config::Environment::with_prefix("OBD")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(Some(env.clone())),
    );

    for (var, key) in LEGACY_ENV {
        builder = builder.set_override_option(*key, env.get(*var).cloned())?;
    }

    let app_config: AppConfig = builder.build()?.try_deserialize()?;
    app_config.validate()?;
    Ok(app_config)
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(influx) = &self.influx {
            influx.validate()?;
        }
        self.collector.interval()?;
        self.generator.validate()?;
        Ok(())
    }

    pub fn require_influx(&self) -> Result<&InfluxSettings, ConfigError> {
        self.influx
            .as_ref()
            .ok_or(ConfigError::SectionMissing { section: "influx" })
    }

    pub fn require_llm(&self) -> Result<&LlmSettings, ConfigError> {
        self.llm
            .as_ref()
            .ok_or(ConfigError::SectionMissing { section: "llm" })
    }
}

/// Replace template variables in a query string
pub fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::generator::Interval;
    use config::{File, FileFormat};

    fn load(toml: &str, env: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let env = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        build_app_config(File::from_str(toml, FileFormat::Toml), &env)
    }

    #[test]
    fn test_prepare_query() {
        let mut vars = HashMap::new();
        vars.insert("vehicle".to_string(), "vehicle_001".to_string());
        vars.insert("hours".to_string(), "12".to_string());

        let query = "SELECT * FROM obd_readings WHERE vehicle_id='${vehicle}' AND time >= now() - ${hours}h";
        let result = prepare_query(query, &vars);

        assert_eq!(
            result,
            "SELECT * FROM obd_readings WHERE vehicle_id='vehicle_001' AND time >= now() - 12h"
        );
    }

    #[test]
    fn test_defaults_without_any_source() {
        let config = load("", &[]).unwrap();

        assert_eq!(config.vehicle_id, "vehicle_001");
        assert_eq!(config.server.addr, "0.0.0.0:8000");
        assert!(config.influx.is_none());
        assert!(config.llm.is_none());
        assert_eq!(config.collector.duration_secs, 60);
        assert_eq!(config.collector.interval().unwrap(), Duration::from_secs(2));
        assert_eq!(config.dashboard.chart_limit, 100);
        assert_eq!(config.generator, GeneratorProfile::default());
    }

    #[test]
    fn test_legacy_environment_variables() {
        let config = load(
            "",
            &[
                ("INFLUXDB_URL", "http://localhost:8086"),
                ("INFLUXDB_TOKEN", "secret"),
                ("INFLUXDB_ORG", "garage"),
                ("INFLUXDB_BUCKET", "obd"),
                ("VEHICLE_ID", "truck_7"),
                ("OBD_INTERVAL", "0.5"),
            ],
        )
        .unwrap();

        let influx = config.require_influx().unwrap();
        assert_eq!(influx.url, "http://localhost:8086");
        assert_eq!(influx.bucket, "obd");
        assert_eq!(config.vehicle_id, "truck_7");
        assert_eq!(config.collector.interval().unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_missing_influx_parameter_is_loud() {
        let err = load(
            "",
            &[
                ("INFLUXDB_URL", "http://localhost:8086"),
                ("INFLUXDB_ORG", "garage"),
                ("INFLUXDB_BUCKET", "obd"),
            ],
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "INFLUXDB_TOKEN is required");
    }

    #[test]
    fn test_file_sections_and_generator_overrides() {
        let config = load(
            r#"
            vehicle_id = "van_2"

            [llm]
            model = "openai/gpt-4o"

            [dashboard]
            seed = 42

            [generator]
            fault_probability = 0.0
            rpm = { min = 900, max = 2500 }
            "#,
            &[],
        )
        .unwrap();

        assert_eq!(config.vehicle_id, "van_2");
        let llm = config.require_llm().unwrap();
        assert_eq!(llm.model, "openai/gpt-4o");
        assert_eq!(llm.api_key, "ollama");
        assert_eq!(config.dashboard.seed, Some(42));
        assert_eq!(config.generator.fault_probability, 0.0);
        assert_eq!(config.generator.rpm, Interval::new(900, 2500));
    }

    #[test]
    fn test_invalid_generator_profile_rejected() {
        let err = load(
            r#"
            [generator]
            speed = { min = 120, max = 0 }
            "#,
            &[],
        )
        .unwrap_err();

        assert!(err.to_string().contains("speed"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = load("[collector]\ninterval_secs = 0", &[]).unwrap_err();
        assert!(err.to_string().contains("interval"));
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let settings = CollectorSettings {
            duration_secs: 60,
            interval_secs: 1e20,
        };
        assert!(matches!(settings.interval(), Err(ConfigError::IntervalOutOfRange(_))));

        let err = load("", &[("OBD_INTERVAL", "1e20")]).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_nan_and_infinite_intervals_rejected() {
        for interval_secs in [f64::NAN, f64::INFINITY, -1.0] {
            let settings = CollectorSettings {
                duration_secs: 60,
                interval_secs,
            };
            assert!(settings.interval().is_err());
        }
    }

    #[test]
    fn test_sample_config_keeps_default_profile() {
        let config = load(include_str!("../../config/obd.toml"), &[]).unwrap();
        assert_eq!(config.generator, GeneratorProfile::default());
        assert_eq!(config.server.addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_require_missing_section() {
        let config = load("", &[]).unwrap();
        assert!(matches!(
            config.require_influx(),
            Err(ConfigError::SectionMissing { section: "influx" })
        ));
    }
}

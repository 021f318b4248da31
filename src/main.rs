// Main entry point - Dependency injection, CLI and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tower_http::compression::predicate::{DefaultPredicate, NotForContentType, Predicate};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::collector::collect_and_store;
use crate::application::diagnostics_service::{vehicle_context, DiagnosticsService};
use crate::application::telemetry_repository::TelemetryRepository;
use crate::application::telemetry_service::TelemetryService;
use crate::domain::generator::generate_sample;
use crate::infrastructure::chunked_json::NDJSON_CONTENT_TYPE;
use crate::infrastructure::config::{load_app_config, AppConfig};
use crate::infrastructure::influx_repository::InfluxRepository;
use crate::infrastructure::openai_client::OpenAiClient;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_chart_data, get_dtc_events, get_field_stats, get_mil_status, get_obd_data, get_profile,
    get_sample, get_series, health_check, llm_diagnose, llm_maintenance, llm_query, llm_trend,
    stream_samples,
};

#[derive(Parser, Debug)]
#[command(version, about = "Synthetic OBD-II telemetry generator, collector and dashboard API", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Generate readings in real time and write them to InfluxDB
    Collect {
        /// Seconds to run for, overrides collector.duration_secs
        #[arg(short, long)]
        duration: Option<u64>,
        /// Seconds between readings, overrides collector.interval_secs
        #[arg(short, long)]
        interval: Option<f64>,
    },
    /// Print generated snapshots as JSON lines
    Sample {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        #[arg(short, long)]
        seed: Option<u64>,
    },
    /// Print average conditions and DTC events from storage
    Summary {
        #[arg(long, default_value_t = 1)]
        hours: u32,
    },
    /// Ask the LLM a question about recent telemetry
    Ask {
        question: String,
        #[arg(long, default_value_t = 1)]
        hours: u32,
    },
    /// Ask the LLM for a diagnostic report
    Diagnose {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    /// Ask the LLM to analyze one field's trend
    Trend {
        field: String,
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    /// Ask the LLM for maintenance advice
    Maintenance,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = load_app_config().context("Failed to load configuration")?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Collect { duration, interval } => {
            if let Some(duration) = duration {
                config.collector.duration_secs = duration;
            }
            if let Some(interval) = interval {
                config.collector.interval_secs = interval;
            }
            collect(config).await
        }
        Command::Sample { count, seed } => sample(&config, count, seed),
        Command::Summary { hours } => {
            let repository = InfluxRepository::new(config.require_influx()?);
            println!("{}", vehicle_context(&repository, &config.vehicle_id, hours).await?);
            Ok(())
        }
        Command::Ask { question, hours } => {
            let answer = require_diagnostics(&config)?.query(&question, hours).await?;
            println!("{}", answer);
            Ok(())
        }
        Command::Diagnose { hours } => {
            println!("{}", require_diagnostics(&config)?.diagnose(hours).await?);
            Ok(())
        }
        Command::Trend { field, hours } => {
            println!("{}", require_diagnostics(&config)?.analyze_trend(&field, hours).await?);
            Ok(())
        }
        Command::Maintenance => {
            println!("{}", require_diagnostics(&config)?.maintenance_advice().await?);
            Ok(())
        }
    }
}

/// Repository when storage is configured
fn repository(config: &AppConfig) -> Option<Arc<dyn TelemetryRepository>> {
    config
        .influx
        .as_ref()
        .map(|settings| Arc::new(InfluxRepository::new(settings)) as Arc<dyn TelemetryRepository>)
}

fn diagnostics(
    config: &AppConfig,
    repository: Option<Arc<dyn TelemetryRepository>>,
) -> Option<DiagnosticsService> {
    let repository = repository?;
    let llm = config.llm.as_ref()?;
    Some(DiagnosticsService::new(
        repository,
        Arc::new(OpenAiClient::new(llm)),
        config.vehicle_id.clone(),
    ))
}

fn require_diagnostics(config: &AppConfig) -> anyhow::Result<DiagnosticsService> {
    let repository: Arc<dyn TelemetryRepository> = Arc::new(InfluxRepository::new(config.require_influx()?));
    let llm = config.require_llm()?;
    Ok(DiagnosticsService::new(
        repository,
        Arc::new(OpenAiClient::new(llm)),
        config.vehicle_id.clone(),
    ))
}

fn telemetry_service(config: &AppConfig, repository: Option<Arc<dyn TelemetryRepository>>) -> TelemetryService {
    TelemetryService::new(
        repository,
        config.vehicle_id.clone(),
        config.generator.clone(),
        StdRng::from_os_rng(),
        config.dashboard.clone(),
    )
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    // Create repository (infrastructure layer)
    let repository = repository(&config);
    if repository.is_none() {
        tracing::warn!("InfluxDB is not configured, dashboard endpoints serve generated data");
    }

    // Create services (application layer)
    let diagnostics_service = diagnostics(&config, repository.clone());
    if diagnostics_service.is_none() {
        tracing::warn!("LLM diagnostics disabled, they need both [influx] and [llm] settings");
    }

    let state = Arc::new(AppState {
        telemetry_service: telemetry_service(&config, repository),
        diagnostics_service,
    });

    // NDJSON streams are flushed per line, so they stay uncompressed
    let compression = CompressionLayer::new().compress_when(
        DefaultPredicate::new().and(NotForContentType::const_new(NDJSON_CONTENT_TYPE)),
    );

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/api/sample", get(get_sample))
        .route("/api/profile", get(get_profile))
        .route("/api/obd-data", get(get_obd_data))
        .route("/api/chart-data", get(get_chart_data))
        .route("/api/mil-status", get(get_mil_status))
        .route("/api/dtc-events", get(get_dtc_events))
        .route("/api/stats/:field", get(get_field_stats))
        .route("/api/series/:field", get(get_series))
        .route("/api/stream", get(stream_samples))
        .route("/api/llm/query", post(llm_query))
        .route("/api/llm/diagnose", get(llm_diagnose))
        .route("/api/llm/trend/:field", get(llm_trend))
        .route("/api/llm/maintenance", get(llm_maintenance))
        .layer(compression)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .addr
        .parse()
        .with_context(|| format!("Invalid server address {}", config.server.addr))?;
    tracing::info!("Starting obd-telemetry service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}

async fn collect(config: AppConfig) -> anyhow::Result<()> {
    let repository = InfluxRepository::new(config.require_influx()?);
    let duration = config.collector.duration();
    let interval = config.collector.interval()?;

    tracing::info!(
        "Collecting for {}s every {:.1}s as {}",
        duration.as_secs(),
        interval.as_secs_f64(),
        config.vehicle_id
    );

    let service = telemetry_service(&config, None);
    let summary = collect_and_store(
        &repository,
        service.vehicle_id(),
        service.sample_stream(duration, interval),
    )
    .await;

    if summary.stored == 0 && summary.generated > 0 {
        anyhow::bail!("none of {} readings could be stored", summary.generated);
    }
    Ok(())
}

fn sample(config: &AppConfig, count: usize, seed: Option<u64>) -> anyhow::Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    for _ in 0..count {
        let snapshot = generate_sample(&mut rng, &config.generator);
        println!("{}", serde_json::to_string(&snapshot)?);
    }
    Ok(())
}

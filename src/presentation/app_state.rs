// Application state for HTTP handlers
use crate::application::diagnostics_service::DiagnosticsService;
use crate::application::telemetry_service::TelemetryService;

#[derive(Clone)]
pub struct AppState {
    pub telemetry_service: TelemetryService,
    /// Present only when both storage and an LLM are configured
    pub diagnostics_service: Option<DiagnosticsService>,
}

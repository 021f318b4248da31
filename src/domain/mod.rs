// Domain layer - Telemetry models and the sample generator
pub mod generator;
pub mod snapshot;
pub mod telemetry;

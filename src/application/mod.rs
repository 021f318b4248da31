// Application layer - Use cases and collaborator traits
pub mod collector;
pub mod diagnostics_service;
pub mod llm_client;
pub mod stream;
pub mod telemetry_repository;
pub mod telemetry_service;

#[cfg(test)]
pub mod fakes;

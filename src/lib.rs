pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod timezone;
pub mod types;

// Use cases and the ports they depend on
pub mod app;
// Store adapters
pub mod infra;

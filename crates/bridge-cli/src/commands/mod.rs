pub mod budget_guard;
pub mod circuit_breaker;
pub mod config_snapshot;
pub mod error_aggregator;
pub mod lifecycle;
pub mod preflight_cmd;
pub mod telemetry_dashboard;

/// Error types for the observability pipeline
pub mod error;

/// Core data model: events, health verdicts, alerts, snapshots
pub mod events;

/// Event store and rolling metrics aggregation
pub mod aggregator;

/// Health probes and the check orchestrator
pub mod health;

/// Dashboard assembly, alerting and subscriber fan-out
pub mod dashboard;

/// Configuration management
pub mod config;

/// Process and system sampling helpers
pub mod sysinfo;

// Re-export commonly used types
pub use error::{ConfigError, DashboardError, HealthError};

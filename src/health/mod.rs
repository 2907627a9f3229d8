/// Probe contract and built-in probes
pub mod probe;

/// Polling, reduction and alerting policy
pub mod orchestrator;

pub use orchestrator::HealthOrchestrator;
pub use probe::{ExternalApiCheck, HealthProbe, HttpHealthProbe, StaticProbe};

use thiserror::Error;

/// Errors that can occur while probing subordinate services
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("Probe '{0}' failed: {1}")]
    ProbeFailed(String, String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur in the dashboard publisher
#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Snapshot refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Subscriber failed: {0}")]
    SubscriberFailed(String),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

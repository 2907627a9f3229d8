//! Configuration management
//!
//! TOML-backed configuration for the three periodic tasks and their
//! thresholds. Every field has a default so a missing or partial file
//! still yields a runnable configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub metrics: MetricsConfig,
    pub health: HealthConfig,
    pub dashboard: DashboardConfig,
}

/// Aggregator retention and sweep settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// How long entries are retained, in seconds
    pub retention_secs: u64,
    /// How often the cleanup sweep runs, in seconds
    pub cleanup_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
            cleanup_interval_secs: 300,
        }
    }
}

/// Health orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// How often the full check battery runs, in seconds
    pub poll_interval_secs: u64,
    /// Health URL of the database service; always-healthy stub if unset
    pub database_url: Option<String>,
    /// Health URL of the session service; always-healthy stub if unset
    pub session_service_url: Option<String>,
    /// Health URL of the wallet service; always-healthy stub if unset
    pub wallet_service_url: Option<String>,
    /// External HTTP endpoints probed by the external-API check
    pub endpoints: Vec<String>,
    /// Memory used/total ratio above which the check is degraded
    pub memory_degraded_ratio: f64,
    /// Memory used/total ratio above which the check is critical
    pub memory_critical_ratio: f64,
    /// Disk used/total ratio above which the check is degraded
    pub disk_degraded_ratio: f64,
    /// Disk used/total ratio above which the check is critical
    pub disk_critical_ratio: f64,
    /// Path whose filesystem is measured by the disk check
    pub disk_path: String,
    /// Bounded history length
    pub history_limit: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            database_url: None,
            session_service_url: None,
            wallet_service_url: None,
            endpoints: Vec::new(),
            memory_degraded_ratio: 0.75,
            memory_critical_ratio: 0.90,
            disk_degraded_ratio: 0.75,
            disk_critical_ratio: 0.90,
            disk_path: "/".to_string(),
            history_limit: 1000,
        }
    }
}

/// Dashboard publisher settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    /// How often the snapshot is refreshed, in seconds
    pub refresh_interval_secs: u64,
    /// Most-recent alerts kept in the ring
    pub max_alerts: usize,
    /// Seconds after which an informational alert auto-resolves
    pub info_resolve_secs: u64,
    /// Fused alert rule: error rate above this triggers a warning
    pub error_rate_threshold: f64,
    /// Fused alert rule: average response time (ms) above this triggers a warning
    pub response_time_threshold_ms: f64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 10,
            max_alerts: 10,
            info_resolve_secs: 300,
            error_rate_threshold: 0.05,
            response_time_threshold_ms: 1000.0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it cannot be parsed, and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.retention_secs == 0 {
            return Err(ConfigError::ValidationError(
                "metrics.retention_secs must be positive".to_string(),
            ));
        }
        if self.metrics.cleanup_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "metrics.cleanup_interval_secs must be positive".to_string(),
            ));
        }
        if self.health.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "health.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.dashboard.refresh_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dashboard.refresh_interval_secs must be positive".to_string(),
            ));
        }
        for (label, ratio) in [
            ("health.memory_degraded_ratio", self.health.memory_degraded_ratio),
            ("health.memory_critical_ratio", self.health.memory_critical_ratio),
            ("health.disk_degraded_ratio", self.health.disk_degraded_ratio),
            ("health.disk_critical_ratio", self.health.disk_critical_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be between 0.0 and 1.0",
                    label
                )));
            }
        }
        if self.health.memory_degraded_ratio > self.health.memory_critical_ratio {
            return Err(ConfigError::ValidationError(
                "health.memory_degraded_ratio must not exceed memory_critical_ratio".to_string(),
            ));
        }
        if self.health.disk_degraded_ratio > self.health.disk_critical_ratio {
            return Err(ConfigError::ValidationError(
                "health.disk_degraded_ratio must not exceed disk_critical_ratio".to_string(),
            ));
        }
        if self.dashboard.max_alerts == 0 {
            return Err(ConfigError::ValidationError(
                "dashboard.max_alerts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

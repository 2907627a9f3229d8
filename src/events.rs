//! Core data model for the observability pipeline
//!
//! This module defines the fundamental data structures shared by the
//! aggregator, the health orchestrator and the dashboard: metric events,
//! aggregated statistics, health verdicts and alert records.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Convert epoch milliseconds (the producer-facing wire form) to a [`Timestamp`]
pub fn timestamp_from_millis(millis: i64) -> Timestamp {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Kind of observation carried by a [`MetricEvent`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An action taken by a chat user (command, button press, ...)
    UserAction,
    /// An internal system occurrence (startup, config reload, ...)
    SystemEvent,
    /// A caught error from any subsystem
    Error,
    /// A timing or throughput sample
    Performance,
}

impl EventKind {
    /// Stable string form used in aggregation keys
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::UserAction => "user_action",
            EventKind::SystemEvent => "system_event",
            EventKind::Error => "error",
            EventKind::Performance => "performance",
        }
    }
}

/// Identity of the user behind a [`MetricEvent`], when one exists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Actor {
    /// Chat platform the user arrived from (e.g. "telegram", "discord")
    pub platform: String,
    /// Platform-scoped user identifier
    pub user_id: String,
}

impl Actor {
    pub fn new(platform: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            user_id: user_id.into(),
        }
    }

    /// Key form used in the active-actor set: `platform:user_id`
    pub fn key(&self) -> String {
        format!("{}:{}", self.platform, self.user_id)
    }
}

/// Immutable unit of observation emitted by producers
///
/// Events are trusted and never validated; the aggregation key is derived
/// as `kind:category:action`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricEvent {
    /// Kind of observation
    pub kind: EventKind,
    /// Free-form grouping, e.g. "trade", "wallet", "timing"
    pub category: String,
    /// Free-form action name within the category
    pub action: String,
    /// User behind the event, if any
    pub actor: Option<Actor>,
    /// Opaque structured data, commonly carrying a numeric `duration` or `value`
    pub payload: serde_json::Value,
    /// Caller-supplied event time
    pub timestamp: Timestamp,
}

impl MetricEvent {
    /// Aggregation key for this event: `kind:category:action`
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.kind.as_str(), self.category, self.action)
    }
}

/// A [`MetricEvent`] wrapped with collection-time metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    /// The observed event
    pub event: MetricEvent,
    /// Process resident memory sampled at ingestion, in bytes
    pub memory_bytes: u64,
    /// Trace-correlation identifier (time-based plus random suffix)
    pub correlation_id: String,
}

/// Windowed percentile triple over retained sample values
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Rolling statistics for one aggregation key
///
/// `count`, `sum`, `average`, `min` and `max` are cumulative since process
/// start and never decremented; `percentiles` are computed over the
/// currently retained entries only. The asymmetry is deliberate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedMetric {
    pub count: u64,
    pub sum: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub last_updated: Timestamp,
    pub percentiles: Percentiles,
}

/// Three-level health verdict with worst-of ordering
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is operating normally
    Healthy,
    /// Service is impaired but functional
    Degraded,
    /// Service is failing
    Critical,
}

/// Verdict for a single subordinate service or local resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    /// How long the probe took, in milliseconds
    pub response_time_ms: f64,
    pub last_checked: Timestamp,
    pub error_count: u32,
    /// Free-text explanation of the verdict
    pub details: String,
    /// Optional structured measurements backing the verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

impl ServiceHealth {
    /// A healthy verdict with the given details
    pub fn healthy(response_time_ms: f64, details: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms,
            last_checked: Utc::now(),
            error_count: 0,
            details: details.into(),
            metrics: None,
        }
    }

    /// A critical verdict with one counted error, used for failed probes
    pub fn critical(details: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Critical,
            response_time_ms: 0.0,
            last_checked: Utc::now(),
            error_count: 1,
            details: details.into(),
            metrics: None,
        }
    }
}

/// Per-service verdicts for the six monitored areas
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceReports {
    pub database: ServiceHealth,
    pub session_service: ServiceHealth,
    pub wallet_service: ServiceHealth,
    pub external_apis: ServiceHealth,
    pub memory: ServiceHealth,
    pub disk: ServiceHealth,
}

impl ServiceReports {
    fn statuses(&self) -> [HealthStatus; 6] {
        [
            self.database.status,
            self.session_service.status,
            self.wallet_service.status,
            self.external_apis.status,
            self.memory.status,
            self.disk.status,
        ]
    }

    /// Worst verdict across all six sub-reports
    pub fn worst(&self) -> HealthStatus {
        self.statuses()
            .into_iter()
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Number of sub-reports that are not healthy
    pub fn unhealthy_count(&self) -> usize {
        self.statuses()
            .into_iter()
            .filter(|s| *s != HealthStatus::Healthy)
            .count()
    }
}

/// Fused performance numbers recorded with each health check
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSummary {
    /// Mean probe response time, in milliseconds
    pub response_time_ms: f64,
    /// Sub-checks completed in the tick
    pub throughput: u32,
    /// Fraction of sub-reports that are not healthy (0.0 - 1.0)
    pub error_rate: f64,
}

/// System-wide health verdict produced by one orchestration tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemHealth {
    /// Worst of the six sub-verdicts
    pub overall: HealthStatus,
    pub services: ServiceReports,
    pub timestamp: Timestamp,
    pub performance: PerformanceSummary,
}

/// Alert severity level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// A generated alert; delivery is a collaborator concern
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRecord {
    /// Process-local monotonically increasing identifier
    pub id: u64,
    pub level: AlertLevel,
    pub message: String,
    pub timestamp: Timestamp,
    /// Set when the alert was auto-resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Timestamp>,
}

/// Per-action statistics in the realtime view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionStats {
    pub action: String,
    pub count: u64,
    pub avg_duration_ms: f64,
    pub error_rate: f64,
}

/// Per-platform breakdown in the realtime view
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlatformStats {
    pub active_users: u64,
    pub actions: u64,
    pub errors: u64,
    pub avg_duration_ms: f64,
}

/// 1-minute-window view of recent activity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RealtimeStats {
    /// Distinct active actors overall
    pub active_users: u64,
    /// `user_action` events in the last 60 seconds
    pub actions_last_minute: u64,
    /// Errors per user action in the last minute (0.0 if no actions)
    pub error_rate: f64,
    /// Average duration across timed events in the last minute
    pub avg_duration_ms: f64,
    /// Top-10 actions by count
    pub top_actions: Vec<ActionStats>,
    /// Per-platform breakdown
    pub platforms: BTreeMap<String, PlatformStats>,
    /// Current process resident memory, in bytes
    pub memory_bytes: u64,
    /// Process uptime, in seconds
    pub uptime_secs: u64,
}

/// Per-actor activity count in the behavior view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserActivity {
    pub platform: String,
    pub user_id: String,
    pub actions: u64,
}

/// Per-platform totals in the behavior view
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlatformUsage {
    pub users: u64,
    pub actions: u64,
}

/// User-behavior summary derived from the full retained log
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserBehaviorInsights {
    pub total_users: u64,
    pub new_users_24h: u64,
    pub active_users_24h: u64,
    /// Day-over-day retention: |today ∩ yesterday| / |today ∪ yesterday|
    pub retention_rate: f64,
    /// Top-10 most active actors by action count
    pub top_users: Vec<UserActivity>,
    pub platforms: BTreeMap<String, PlatformUsage>,
}

/// Response-time distribution over retained timing entries
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseTimeStats {
    pub average: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Process performance summary over the retention window
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemPerformance {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub response_times: ResponseTimeStats,
    /// Errors per user action over the full retention window
    pub error_rate: f64,
}

/// Point-in-time fusion published to dashboard subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub timestamp: Timestamp,
    pub health: SystemHealth,
    pub realtime: RealtimeStats,
    pub behavior: UserBehaviorInsights,
    pub performance: SystemPerformance,
    /// Unresolved alerts, most recent first
    pub alerts: Vec<AlertRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_event_key() {
        let event = MetricEvent {
            kind: EventKind::UserAction,
            category: "trade".to_string(),
            action: "buy".to_string(),
            actor: Some(Actor::new("telegram", "u1")),
            payload: serde_json::json!({}),
            timestamp: Utc::now(),
        };
        assert_eq!(event.key(), "user_action:trade:buy");
    }

    #[test]
    fn test_actor_key() {
        let actor = Actor::new("discord", "12345");
        assert_eq!(actor.key(), "discord:12345");
    }

    #[test]
    fn test_metric_event_serialization() {
        let event = MetricEvent {
            kind: EventKind::Performance,
            category: "timing".to_string(),
            action: "quote_fetch".to_string(),
            actor: None,
            payload: serde_json::json!({ "duration": 42.0 }),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: MetricEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_event_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&EventKind::UserAction).unwrap(),
            "\"user_action\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::SystemEvent).unwrap(),
            "\"system_event\""
        );
        assert_eq!(serde_json::to_string(&EventKind::Error).unwrap(), "\"error\"");
        assert_eq!(
            serde_json::to_string(&EventKind::Performance).unwrap(),
            "\"performance\""
        );
    }

    #[test]
    fn test_health_status_ordering() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Critical);
        assert!(HealthStatus::Healthy < HealthStatus::Critical);
    }

    #[test]
    fn test_health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn test_alert_level_ordering() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Critical);
    }

    #[test]
    fn test_worst_of_reports() {
        let healthy = ServiceHealth::healthy(1.0, "ok");
        let mut reports = ServiceReports {
            database: healthy.clone(),
            session_service: healthy.clone(),
            wallet_service: healthy.clone(),
            external_apis: healthy.clone(),
            memory: healthy.clone(),
            disk: healthy,
        };
        assert_eq!(reports.worst(), HealthStatus::Healthy);

        reports.wallet_service.status = HealthStatus::Degraded;
        assert_eq!(reports.worst(), HealthStatus::Degraded);
        assert_eq!(reports.unhealthy_count(), 1);

        reports.database.status = HealthStatus::Critical;
        assert_eq!(reports.worst(), HealthStatus::Critical);
        assert_eq!(reports.unhealthy_count(), 2);
    }

    #[test]
    fn test_timestamp_from_millis() {
        let ts = timestamp_from_millis(1_700_000_000_000);
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
    }
}

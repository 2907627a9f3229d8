//! Presentation helpers for the dashboard
//!
//! Stateless rendering of a snapshot into a fixed-width console view, plus a
//! minimal machine-readable health summary for external status surfaces.

use crate::events::{DashboardSnapshot, HealthStatus, SystemHealth};
use serde_json::json;
use std::fmt::Write;

const WIDTH: usize = 62;

fn status_tag(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "OK  ",
        HealthStatus::Degraded => "WARN",
        HealthStatus::Critical => "CRIT",
    }
}

fn rule(out: &mut String) {
    let _ = writeln!(out, "+{}+", "-".repeat(WIDTH - 2));
}

fn line(out: &mut String, text: &str) {
    // Truncate by characters, not bytes; details and alert messages are
    // free-form text and may be multibyte
    let text: String = text.chars().take(WIDTH - 4).collect();
    let _ = writeln!(out, "| {:<width$} |", text, width = WIDTH - 4);
}

/// Render a snapshot as a fixed-width text dashboard
pub fn render_dashboard(snapshot: &DashboardSnapshot) -> String {
    let mut out = String::new();

    rule(&mut out);
    line(
        &mut out,
        &format!(
            "SYSTEM DASHBOARD  {}",
            snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    );
    rule(&mut out);

    line(
        &mut out,
        &format!(
            "Overall: {}  (checked {})",
            status_tag(snapshot.health.overall).trim(),
            snapshot.health.timestamp.format("%H:%M:%S")
        ),
    );
    let services = [
        ("database", &snapshot.health.services.database),
        ("session-service", &snapshot.health.services.session_service),
        ("wallet-service", &snapshot.health.services.wallet_service),
        ("external-apis", &snapshot.health.services.external_apis),
        ("memory", &snapshot.health.services.memory),
        ("disk", &snapshot.health.services.disk),
    ];
    for (name, health) in services {
        line(
            &mut out,
            &format!(
                "  [{}] {:<16} {:>7.1}ms  {}",
                status_tag(health.status),
                name,
                health.response_time_ms,
                health.details
            ),
        );
    }

    rule(&mut out);
    line(
        &mut out,
        &format!(
            "Activity: {} active users, {} actions/min, {:.1}% errors",
            snapshot.realtime.active_users,
            snapshot.realtime.actions_last_minute,
            snapshot.realtime.error_rate * 100.0
        ),
    );
    for stats in snapshot.realtime.top_actions.iter().take(5) {
        line(&mut out, &format!("  {:<24} {:>6}", stats.action, stats.count));
    }

    rule(&mut out);
    line(
        &mut out,
        &format!(
            "Users: {} total, {} new 24h, {:.0}% retention",
            snapshot.behavior.total_users,
            snapshot.behavior.new_users_24h,
            snapshot.behavior.retention_rate * 100.0
        ),
    );
    line(
        &mut out,
        &format!(
            "Perf: avg {:.0}ms p50 {:.0}ms p95 {:.0}ms p99 {:.0}ms",
            snapshot.performance.response_times.average,
            snapshot.performance.response_times.p50,
            snapshot.performance.response_times.p95,
            snapshot.performance.response_times.p99
        ),
    );
    line(
        &mut out,
        &format!(
            "Proc: cpu {:.1}%  rss {:.1} MB  uptime {}s",
            snapshot.performance.cpu_percent,
            snapshot.performance.memory_bytes as f64 / (1024.0 * 1024.0),
            snapshot.realtime.uptime_secs
        ),
    );

    rule(&mut out);
    if snapshot.alerts.is_empty() {
        line(&mut out, "Alerts: none");
    } else {
        line(&mut out, &format!("Alerts ({}):", snapshot.alerts.len()));
        for alert in &snapshot.alerts {
            line(
                &mut out,
                &format!(
                    "  {} [{:?}] {}",
                    alert.timestamp.format("%H:%M:%S"),
                    alert.level,
                    alert.message
                ),
            );
        }
    }
    rule(&mut out);

    out
}

/// Minimal machine-readable health summary (single-line JSON)
pub fn render_health_summary(health: &SystemHealth) -> String {
    json!({
        "status": health.overall,
        "timestamp": health.timestamp.to_rfc3339(),
        "services": {
            "database": health.services.database.status,
            "session_service": health.services.session_service.status,
            "wallet_service": health.services.wallet_service.status,
            "external_apis": health.services.external_apis.status,
            "memory": health.services.memory.status,
            "disk": health.services.disk.status,
        },
        "error_rate": health.performance.error_rate,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        AlertLevel, AlertRecord, PerformanceSummary, RealtimeStats, ServiceHealth, ServiceReports,
        SystemPerformance, UserBehaviorInsights,
    };
    use chrono::Utc;

    fn sample_health(overall: HealthStatus) -> SystemHealth {
        let healthy = || ServiceHealth::healthy(1.5, "ok");
        SystemHealth {
            overall,
            services: ServiceReports {
                database: healthy(),
                session_service: healthy(),
                wallet_service: ServiceHealth::critical("connection refused"),
                external_apis: healthy(),
                memory: healthy(),
                disk: healthy(),
            },
            timestamp: Utc::now(),
            performance: PerformanceSummary {
                response_time_ms: 3.2,
                throughput: 6,
                error_rate: 1.0 / 6.0,
            },
        }
    }

    fn sample_snapshot() -> DashboardSnapshot {
        DashboardSnapshot {
            timestamp: Utc::now(),
            health: sample_health(HealthStatus::Critical),
            realtime: RealtimeStats::default(),
            behavior: UserBehaviorInsights::default(),
            performance: SystemPerformance::default(),
            alerts: vec![AlertRecord {
                id: 1,
                level: AlertLevel::Critical,
                message: "wallet-service down".to_string(),
                timestamp: Utc::now(),
                resolved: None,
            }],
        }
    }

    #[test]
    fn test_dashboard_lines_are_fixed_width() {
        let rendered = render_dashboard(&sample_snapshot());
        for line in rendered.lines() {
            assert_eq!(line.chars().count(), WIDTH, "uneven line: {:?}", line);
        }
    }

    #[test]
    fn test_dashboard_truncates_multibyte_text() {
        let mut snapshot = sample_snapshot();
        // Long multibyte details guarantee the cut lands inside the text,
        // whatever prefix the service row adds
        snapshot.health.services.wallet_service.details = "é".repeat(200);
        snapshot.alerts[0].message = "наблюдение ".repeat(20);

        let rendered = render_dashboard(&snapshot);
        for line in rendered.lines() {
            assert_eq!(line.chars().count(), WIDTH, "uneven line: {:?}", line);
        }
    }

    #[test]
    fn test_dashboard_mentions_services_and_alerts() {
        let rendered = render_dashboard(&sample_snapshot());
        assert!(rendered.contains("wallet-service"));
        assert!(rendered.contains("CRIT"));
        assert!(rendered.contains("wallet-service down"));
    }

    #[test]
    fn test_dashboard_without_alerts() {
        let mut snapshot = sample_snapshot();
        snapshot.alerts.clear();
        let rendered = render_dashboard(&snapshot);
        assert!(rendered.contains("Alerts: none"));
    }

    #[test]
    fn test_health_summary_is_json() {
        let summary = render_health_summary(&sample_health(HealthStatus::Degraded));
        let parsed: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(parsed["status"], "degraded");
        assert_eq!(parsed["services"]["wallet_service"], "critical");
        assert!(!summary.contains('\n'));
    }
}

//! Health-check orchestration: polling, reduction and alert hysteresis
//!
//! The orchestrator runs the full check battery on a timer, reduces the six
//! sub-verdicts to one system-wide verdict (worst-of), keeps a bounded
//! history, and raises an alert only when the overall verdict regresses
//! versus the immediately preceding one. It never propagates a failure out
//! of its polling tick.

use crate::config::HealthConfig;
use crate::events::{
    AlertLevel, HealthStatus, PerformanceSummary, ServiceHealth, ServiceReports, SystemHealth,
};
use crate::health::probe::{self, ExternalApiCheck, HealthProbe};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receiver for alerts generated by the orchestrator
///
/// Delivery (paging, chat, email) is a collaborator concern; the sink is
/// typically wired to the dashboard's alert ring.
pub type AlertSink = Box<dyn Fn(AlertLevel, String) + Send + Sync>;

#[derive(Default)]
struct OrchestratorState {
    /// Verdict from the previous tick, for transition comparison only
    previous: Option<SystemHealth>,
    /// Bounded record of past ticks, oldest first
    history: VecDeque<SystemHealth>,
}

struct PollTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Health-check orchestrator with injected probes
///
/// Cloning is cheap and all clones observe the same state.
#[derive(Clone)]
pub struct HealthOrchestrator {
    database: Arc<dyn HealthProbe>,
    session_service: Arc<dyn HealthProbe>,
    wallet_service: Arc<dyn HealthProbe>,
    external_apis: ExternalApiCheck,
    config: HealthConfig,
    state: Arc<Mutex<OrchestratorState>>,
    alert_sink: Arc<Mutex<Option<AlertSink>>>,
    task: Arc<Mutex<Option<PollTask>>>,
}

impl HealthOrchestrator {
    /// Create an orchestrator over the given probes
    ///
    /// Probes are capability references resolved once at startup; the
    /// orchestrator owns only the polling, reduction and alerting policy.
    pub fn new(
        database: Arc<dyn HealthProbe>,
        session_service: Arc<dyn HealthProbe>,
        wallet_service: Arc<dyn HealthProbe>,
        external_apis: ExternalApiCheck,
        config: HealthConfig,
    ) -> Self {
        Self {
            database,
            session_service,
            wallet_service,
            external_apis,
            config,
            state: Arc::new(Mutex::new(OrchestratorState::default())),
            alert_sink: Arc::new(Mutex::new(None)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Install the alert receiver
    pub fn set_alert_sink(&self, sink: AlertSink) {
        if let Ok(mut slot) = self.alert_sink.lock() {
            *slot = Some(sink);
        }
    }

    /// Run the full check battery once
    ///
    /// Remote probes run concurrently; each failure is isolated to its own
    /// service verdict. Never fails: if the tick itself cannot complete, a
    /// fully-critical synthetic report is recorded and returned instead.
    pub async fn run_health_checks(&self) -> SystemHealth {
        let start = Instant::now();

        let (database, session_service, wallet_service, external_apis) = tokio::join!(
            run_probe(self.database.as_ref()),
            run_probe(self.session_service.as_ref()),
            run_probe(self.wallet_service.as_ref()),
            self.external_apis.check(),
        );
        let memory = probe::memory_check(
            self.config.memory_degraded_ratio,
            self.config.memory_critical_ratio,
        );
        let disk = probe::disk_check(
            &self.config.disk_path,
            self.config.disk_degraded_ratio,
            self.config.disk_critical_ratio,
        );

        let services = ServiceReports {
            database,
            session_service,
            wallet_service,
            external_apis,
            memory,
            disk,
        };

        let remote_times = [
            services.database.response_time_ms,
            services.session_service.response_time_ms,
            services.wallet_service.response_time_ms,
            services.external_apis.response_time_ms,
        ];
        let performance = PerformanceSummary {
            response_time_ms: remote_times.iter().sum::<f64>() / remote_times.len() as f64,
            throughput: 6,
            error_rate: services.unhealthy_count() as f64 / 6.0,
        };

        let health = SystemHealth {
            overall: services.worst(),
            services,
            timestamp: Utc::now(),
            performance,
        };

        debug!(
            "Health check battery completed in {:.0}ms: {:?}",
            start.elapsed().as_secs_f64() * 1000.0,
            health.overall
        );

        self.record_and_alert(health)
    }

    /// Record a tick, apply alert hysteresis, and return the stored verdict
    ///
    /// If the internal state cannot be reached the tick degrades to a
    /// fully-critical synthetic report rather than propagating.
    fn record_and_alert(&self, health: SystemHealth) -> SystemHealth {
        let Ok(mut state) = self.state.lock() else {
            error!("Health state lock poisoned; reporting synthetic critical");
            return synthetic_critical("orchestrator state unavailable");
        };

        let alert = regression_alert(state.previous.as_ref(), &health);

        state.history.push_back(health.clone());
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }
        state.previous = Some(health.clone());
        drop(state);

        if let Some((level, message)) = alert {
            warn!("Health regression: {}", message);
            if let Ok(sink) = self.alert_sink.lock() {
                if let Some(sink) = sink.as_ref() {
                    sink(level, message);
                }
            }
        }

        health
    }

    /// The most recent verdict, if any tick has completed
    pub fn current_health(&self) -> Option<SystemHealth> {
        self.state.lock().ok().and_then(|s| s.previous.clone())
    }

    /// Past verdicts, oldest first
    pub fn health_history(&self) -> Vec<SystemHealth> {
        self.state
            .lock()
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Start the periodic poll
    pub fn start(&self) {
        let Ok(mut slot) = self.task.lock() else {
            error!("start: task slot lock poisoned");
            return;
        };
        if slot.is_some() {
            warn!("Health poll already running");
            return;
        }

        let interval = std::time::Duration::from_secs(self.config.poll_interval_secs);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let orchestrator = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        orchestrator.run_health_checks().await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Health poll stopped");
        });

        *slot = Some(PollTask { shutdown, handle });
        info!("Health poll started (interval {:?})", interval);
    }

    /// Stop the periodic poll
    pub fn stop(&self) {
        let Ok(mut slot) = self.task.lock() else {
            return;
        };
        if let Some(task) = slot.take() {
            if task.shutdown.send(true).is_err() {
                task.handle.abort();
            }
            info!("Health poll stopping");
        }
    }
}

/// Time one probe, mapping an error to a critical verdict
async fn run_probe(probe: &dyn HealthProbe) -> ServiceHealth {
    let start = Instant::now();
    match probe.check().await {
        Ok(health) => health,
        Err(e) => {
            warn!("Probe '{}' failed: {}", probe.name(), e);
            let mut health = ServiceHealth::critical(format!("{} probe failed: {}", probe.name(), e));
            health.response_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            health
        }
    }
}

/// Hysteresis rule: alert only on regression versus the previous verdict,
/// or when the very first verdict is not healthy
fn regression_alert(
    previous: Option<&SystemHealth>,
    current: &SystemHealth,
) -> Option<(AlertLevel, String)> {
    let should_alert = match previous {
        Some(prev) => current.overall > prev.overall,
        None => current.overall != HealthStatus::Healthy,
    };
    if !should_alert {
        return None;
    }

    let level = match current.overall {
        HealthStatus::Critical => AlertLevel::Critical,
        HealthStatus::Degraded => AlertLevel::Warning,
        HealthStatus::Healthy => return None,
    };

    let failing: Vec<&str> = [
        ("database", current.services.database.status),
        ("session-service", current.services.session_service.status),
        ("wallet-service", current.services.wallet_service.status),
        ("external-APIs", current.services.external_apis.status),
        ("memory", current.services.memory.status),
        ("disk", current.services.disk.status),
    ]
    .into_iter()
    .filter(|(_, status)| *status != HealthStatus::Healthy)
    .map(|(name, _)| name)
    .collect();

    Some((
        level,
        format!(
            "System health {:?}: {} degraded/critical ({})",
            current.overall,
            failing.len(),
            failing.join(", ")
        ),
    ))
}

/// Fully-critical report used when a tick cannot complete
fn synthetic_critical(detail: &str) -> SystemHealth {
    let critical = || ServiceHealth::critical(detail);
    let services = ServiceReports {
        database: critical(),
        session_service: critical(),
        wallet_service: critical(),
        external_apis: critical(),
        memory: critical(),
        disk: critical(),
    };
    SystemHealth {
        overall: HealthStatus::Critical,
        services,
        timestamp: Utc::now(),
        performance: PerformanceSummary::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::probe::{MockProbe, StaticProbe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Config with memory/disk thresholds the test machine cannot cross
    fn test_config() -> HealthConfig {
        HealthConfig {
            memory_degraded_ratio: 1.0,
            memory_critical_ratio: 1.0,
            disk_degraded_ratio: 1.0,
            disk_critical_ratio: 1.0,
            ..HealthConfig::default()
        }
    }

    fn orchestrator_with(
        database: Arc<dyn HealthProbe>,
        session: Arc<dyn HealthProbe>,
        wallet: Arc<dyn HealthProbe>,
    ) -> HealthOrchestrator {
        HealthOrchestrator::new(
            database,
            session,
            wallet,
            ExternalApiCheck::new(ExternalApiCheck::default_client(), Vec::new()),
            test_config(),
        )
    }

    fn all_healthy() -> HealthOrchestrator {
        orchestrator_with(
            Arc::new(StaticProbe::unconfigured("database")),
            Arc::new(StaticProbe::unconfigured("session-service")),
            Arc::new(StaticProbe::unconfigured("wallet-service")),
        )
    }

    #[tokio::test]
    async fn test_all_healthy_reduction() {
        let orchestrator = all_healthy();
        let health = orchestrator.run_health_checks().await;
        assert_eq!(health.overall, HealthStatus::Healthy);
        assert_eq!(health.services.database.status, HealthStatus::Healthy);
        assert_eq!(health.performance.throughput, 6);
    }

    #[tokio::test]
    async fn test_single_degraded_service_degrades_overall() {
        let orchestrator = orchestrator_with(
            Arc::new(StaticProbe::unconfigured("database")),
            Arc::new(StaticProbe::unconfigured("session-service")),
            Arc::new(MockProbe::always("wallet-service", HealthStatus::Degraded)),
        );
        let health = orchestrator.run_health_checks().await;
        assert_eq!(health.overall, HealthStatus::Degraded);
        assert_eq!(health.services.wallet_service.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_failed_probe_is_critical_not_fatal() {
        let orchestrator = orchestrator_with(
            Arc::new(MockProbe::new(
                "database",
                vec![Err("connection refused".to_string())],
            )),
            Arc::new(StaticProbe::unconfigured("session-service")),
            Arc::new(StaticProbe::unconfigured("wallet-service")),
        );
        let health = orchestrator.run_health_checks().await;
        assert_eq!(health.overall, HealthStatus::Critical);
        assert_eq!(health.services.database.status, HealthStatus::Critical);
        assert_eq!(health.services.database.error_count, 1);
        assert!(health.services.database.details.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_history_recorded_and_capped() {
        let mut config = test_config();
        config.history_limit = 3;
        let orchestrator = HealthOrchestrator::new(
            Arc::new(StaticProbe::unconfigured("database")),
            Arc::new(StaticProbe::unconfigured("session-service")),
            Arc::new(StaticProbe::unconfigured("wallet-service")),
            ExternalApiCheck::new(ExternalApiCheck::default_client(), Vec::new()),
            config,
        );

        for _ in 0..5 {
            orchestrator.run_health_checks().await;
        }
        assert_eq!(orchestrator.health_history().len(), 3);
        assert!(orchestrator.current_health().is_some());
    }

    #[test]
    fn test_hysteresis_alerts_only_on_regression() {
        let mk = |overall: HealthStatus| {
            let mut health = synthetic_critical("test");
            health.overall = overall;
            health
        };

        // healthy -> degraded -> degraded -> critical -> critical: 2 alerts
        let sequence = [
            HealthStatus::Healthy,
            HealthStatus::Degraded,
            HealthStatus::Degraded,
            HealthStatus::Critical,
            HealthStatus::Critical,
        ];
        let mut previous: Option<SystemHealth> = None;
        let mut alerts = 0;
        for status in sequence {
            let current = mk(status);
            if regression_alert(previous.as_ref(), &current).is_some() {
                alerts += 1;
            }
            previous = Some(current);
        }
        assert_eq!(alerts, 2);

        // critical -> degraded -> healthy: improvements never alert
        let mut previous = Some(mk(HealthStatus::Critical));
        let mut alerts = 0;
        for status in [HealthStatus::Degraded, HealthStatus::Healthy] {
            let current = mk(status);
            if regression_alert(previous.as_ref(), &current).is_some() {
                alerts += 1;
            }
            previous = Some(current);
        }
        assert_eq!(alerts, 0);
    }

    #[test]
    fn test_first_verdict_alerts_unless_healthy() {
        let mut health = synthetic_critical("test");
        let (level, _) = regression_alert(None, &health).unwrap();
        assert_eq!(level, AlertLevel::Critical);

        health.overall = HealthStatus::Degraded;
        let (level, _) = regression_alert(None, &health).unwrap();
        assert_eq!(level, AlertLevel::Warning);

        health.overall = HealthStatus::Healthy;
        assert!(regression_alert(None, &health).is_none());
    }

    #[tokio::test]
    async fn test_alert_sink_receives_regression() {
        let orchestrator = orchestrator_with(
            Arc::new(MockProbe::new(
                "database",
                vec![
                    Ok(ServiceHealth::healthy(1.0, "ok")),
                    Err("down".to_string()),
                    Err("still down".to_string()),
                ],
            )),
            Arc::new(StaticProbe::unconfigured("session-service")),
            Arc::new(StaticProbe::unconfigured("wallet-service")),
        );

        let count = Arc::new(AtomicUsize::new(0));
        let sink_count = Arc::clone(&count);
        orchestrator.set_alert_sink(Box::new(move |_, _| {
            sink_count.fetch_add(1, Ordering::SeqCst);
        }));

        // healthy tick, regression tick, repeated-critical tick
        orchestrator.run_health_checks().await;
        orchestrator.run_health_checks().await;
        orchestrator.run_health_checks().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_synthetic_critical_shape() {
        let health = synthetic_critical("boom");
        assert_eq!(health.overall, HealthStatus::Critical);
        assert_eq!(health.services.database.status, HealthStatus::Critical);
        assert_eq!(health.services.disk.status, HealthStatus::Critical);
        assert_eq!(health.performance, PerformanceSummary::default());
    }

    #[tokio::test]
    async fn test_start_stop_polling() {
        let orchestrator = all_healthy();
        orchestrator.start();
        // Double start is ignored
        orchestrator.start();
        orchestrator.stop();
        orchestrator.stop();
    }
}

//! Dashboard publisher: periodic snapshot fusion, threshold alerts and fan-out
//!
//! The publisher wakes on its own timer, pulls the latest health verdict and
//! the aggregator's derived views, fuses them into a [`DashboardSnapshot`],
//! derives threshold alerts independently of the orchestrator's hysteresis,
//! and notifies every live subscriber. A failed refresh leaves the previous
//! snapshot in place; a failing subscriber is logged and kept.

use crate::aggregator::MetricsAggregator;
use crate::config::DashboardConfig;
use crate::error::DashboardError;
use crate::events::{AlertLevel, AlertRecord, DashboardSnapshot, HealthStatus};
use crate::health::HealthOrchestrator;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Callback invoked with every freshly published snapshot
pub type SnapshotCallback =
    Box<dyn Fn(&DashboardSnapshot) -> Result<(), DashboardError> + Send + Sync>;

/// Opaque token returned by [`DashboardPublisher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Default)]
struct PublisherState {
    /// Most recently published snapshot, kept through failed refreshes
    snapshot: Option<DashboardSnapshot>,
    subscribers: HashMap<u64, Arc<SnapshotCallback>>,
    /// Newest first, capped at the configured ring size
    alerts: VecDeque<AlertRecord>,
    next_subscriber_id: u64,
    next_alert_id: u64,
}

struct RefreshTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Snapshot publisher over the aggregator and the health orchestrator
///
/// Cloning is cheap and all clones observe the same state.
#[derive(Clone)]
pub struct DashboardPublisher {
    aggregator: MetricsAggregator,
    orchestrator: HealthOrchestrator,
    config: DashboardConfig,
    state: Arc<Mutex<PublisherState>>,
    task: Arc<Mutex<Option<RefreshTask>>>,
}

impl DashboardPublisher {
    pub fn new(
        aggregator: MetricsAggregator,
        orchestrator: HealthOrchestrator,
        config: DashboardConfig,
    ) -> Self {
        Self {
            aggregator,
            orchestrator,
            config,
            state: Arc::new(Mutex::new(PublisherState::default())),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Assemble and publish one snapshot
    ///
    /// Runs a fresh health battery, reads the aggregator views, derives
    /// fused threshold alerts and fans the snapshot out to subscribers.
    pub async fn refresh(&self) -> Result<DashboardSnapshot, DashboardError> {
        let health = self.orchestrator.run_health_checks().await;
        let realtime = self.aggregator.realtime_stats();
        let behavior = self.aggregator.user_behavior_insights();
        let performance = self.aggregator.system_performance();

        let triggered = self.evaluate_alert_rules(&health, &realtime, &performance);
        for (level, message) in triggered {
            self.add_alert(level, message);
        }

        let snapshot = {
            let mut state = self.state.lock().map_err(|_| {
                DashboardError::RefreshFailed("publisher state unavailable".to_string())
            })?;
            let snapshot = DashboardSnapshot {
                timestamp: Utc::now(),
                health,
                realtime,
                behavior,
                performance,
                alerts: state
                    .alerts
                    .iter()
                    .filter(|a| a.resolved.is_none())
                    .cloned()
                    .collect(),
            };
            state.snapshot = Some(snapshot.clone());
            snapshot
        };

        self.notify_subscribers(&snapshot);
        debug!(
            "Dashboard refreshed: {:?} overall, {} unresolved alerts",
            snapshot.health.overall,
            snapshot.alerts.len()
        );
        Ok(snapshot)
    }

    /// Threshold rules evaluated on the fused snapshot, independent of the
    /// orchestrator's own regression hysteresis
    fn evaluate_alert_rules(
        &self,
        health: &crate::events::SystemHealth,
        realtime: &crate::events::RealtimeStats,
        performance: &crate::events::SystemPerformance,
    ) -> Vec<(AlertLevel, String)> {
        let mut triggered = Vec::new();

        if realtime.error_rate > self.config.error_rate_threshold {
            triggered.push((
                AlertLevel::Warning,
                format!("High error rate: {:.1}%", realtime.error_rate * 100.0),
            ));
        }
        if performance.response_times.average > self.config.response_time_threshold_ms {
            triggered.push((
                AlertLevel::Warning,
                format!(
                    "Slow responses: {:.0}ms average",
                    performance.response_times.average
                ),
            ));
        }
        match health.services.memory.status {
            HealthStatus::Critical => triggered.push((
                AlertLevel::Critical,
                format!("Memory pressure critical: {}", health.services.memory.details),
            )),
            HealthStatus::Degraded => triggered.push((
                AlertLevel::Warning,
                format!("Memory pressure elevated: {}", health.services.memory.details),
            )),
            HealthStatus::Healthy => {}
        }
        match health.overall {
            HealthStatus::Critical => {
                triggered.push((AlertLevel::Critical, "System health critical".to_string()))
            }
            HealthStatus::Degraded => {
                triggered.push((AlertLevel::Warning, "System health degraded".to_string()))
            }
            HealthStatus::Healthy => {}
        }

        // A rule that keeps firing while its condition persists would flood
        // the ring every tick; suppress while an identical alert is unresolved
        if let Ok(state) = self.state.lock() {
            triggered.retain(|(_, message)| {
                !state
                    .alerts
                    .iter()
                    .any(|a| a.resolved.is_none() && a.message == *message)
            });
        }
        triggered
    }

    fn notify_subscribers(&self, snapshot: &DashboardSnapshot) {
        // Collect the callbacks and release the lock before invoking them:
        // a subscriber is free to read back from the publisher
        let subscribers: Vec<(u64, Arc<SnapshotCallback>)> = {
            let Ok(state) = self.state.lock() else {
                error!("Publisher state lock poisoned; skipping fan-out");
                return;
            };
            state
                .subscribers
                .iter()
                .map(|(id, callback)| (*id, Arc::clone(callback)))
                .collect()
        };
        for (id, callback) in subscribers {
            if let Err(e) = callback(snapshot) {
                warn!("Subscriber {} failed: {}", id, e);
            }
        }
    }

    /// Register a snapshot subscriber
    pub fn subscribe(&self, callback: SnapshotCallback) -> SubscriptionHandle {
        let Ok(mut state) = self.state.lock() else {
            error!("Publisher state lock poisoned; subscription dropped");
            return SubscriptionHandle(u64::MAX);
        };
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.insert(id, Arc::new(callback));
        SubscriptionHandle(id)
    }

    /// Remove a subscriber; unknown handles are ignored
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.remove(&handle.0);
        }
    }

    /// Prepend an alert to the capped ring
    ///
    /// Informational alerts auto-resolve after the configured delay via a
    /// one-shot task; warning and critical alerts stay until displaced.
    pub fn add_alert(&self, level: AlertLevel, message: String) {
        let Ok(mut state) = self.state.lock() else {
            error!("Publisher state lock poisoned; alert dropped: {}", message);
            return;
        };
        let id = state.next_alert_id;
        state.next_alert_id += 1;
        state.alerts.push_front(AlertRecord {
            id,
            level,
            message,
            timestamp: Utc::now(),
            resolved: None,
        });
        state.alerts.truncate(self.config.max_alerts);
        drop(state);

        if level == AlertLevel::Info {
            let state = Arc::clone(&self.state);
            let delay = std::time::Duration::from_secs(self.config.info_resolve_secs);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Ok(mut state) = state.lock() {
                    if let Some(alert) = state.alerts.iter_mut().find(|a| a.id == id) {
                        alert.resolved = Some(Utc::now());
                    }
                }
            });
        }
    }

    /// The full alert ring, newest first
    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.state
            .lock()
            .map(|s| s.alerts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Unresolved alerts only, newest first
    pub fn unresolved_alerts(&self) -> Vec<AlertRecord> {
        self.state
            .lock()
            .map(|s| {
                s.alerts
                    .iter()
                    .filter(|a| a.resolved.is_none())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The most recently published snapshot, if any
    pub fn latest_snapshot(&self) -> Option<DashboardSnapshot> {
        self.state.lock().ok().and_then(|s| s.snapshot.clone())
    }

    /// Start the periodic refresh
    pub fn start(&self) {
        let Ok(mut slot) = self.task.lock() else {
            error!("start: task slot lock poisoned");
            return;
        };
        if slot.is_some() {
            warn!("Dashboard refresh already running");
            return;
        }

        let interval = std::time::Duration::from_secs(self.config.refresh_interval_secs);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let publisher = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = publisher.refresh().await {
                            error!("Dashboard refresh failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Dashboard refresh stopped");
        });

        *slot = Some(RefreshTask { shutdown, handle });
        info!("Dashboard refresh started (interval {:?})", interval);
    }

    /// Stop the periodic refresh
    pub fn stop(&self) {
        let Ok(mut slot) = self.task.lock() else {
            return;
        };
        if let Some(task) = slot.take() {
            if task.shutdown.send(true).is_err() {
                task.handle.abort();
            }
            info!("Dashboard refresh stopping");
        }
    }
}

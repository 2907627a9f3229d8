//! Event store and aggregator with sliding-window retention
//!
//! This module provides the MetricsAggregator which accepts trusted events
//! from producers, keeps per-key append-only logs bounded by a retention
//! window, and maintains derived statistics. Cumulative statistics
//! (count/sum/average/min/max) survive pruning; percentiles are recomputed
//! over the retained window only.

use crate::events::{
    ActionStats, Actor, AggregatedMetric, EventKind, MetricEntry, MetricEvent, Percentiles,
    PlatformStats, PlatformUsage, RealtimeStats, ResponseTimeStats, SystemPerformance, Timestamp,
    UserActivity, UserBehaviorInsights,
};
use crate::sysinfo;
use chrono::{Duration, Utc};
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Internal mutable state, guarded by one mutex
#[derive(Debug, Default)]
struct AggregatorState {
    /// Per-key append-only logs, pruned by the cleanup sweep
    entries: HashMap<String, Vec<MetricEntry>>,
    /// Cumulative per-key statistics, never pruned
    aggregates: HashMap<String, AggregatedMetric>,
    /// Actor keys with at least one retained entry
    active_actors: HashSet<String>,
}

/// Handle for the periodic cleanup task
struct CleanupTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Event store and rolling aggregator shared across tasks
///
/// Cloning is cheap and all clones observe the same state, so producers can
/// hold their own copy and call [`track`](Self::track) fire-and-forget.
#[derive(Clone)]
pub struct MetricsAggregator {
    state: Arc<Mutex<AggregatorState>>,
    cleanup: Arc<Mutex<Option<CleanupTask>>>,
    retention: Duration,
    started_at: Timestamp,
}

impl MetricsAggregator {
    /// Create a new aggregator with the given retention window
    pub fn new(retention: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(AggregatorState::default())),
            cleanup: Arc::new(Mutex::new(None)),
            retention,
            started_at: Utc::now(),
        }
    }

    /// Record an event
    ///
    /// Events are trusted and never validated. Internal failures are logged
    /// and swallowed; tracking must never crash a producer.
    pub fn track(&self, event: MetricEvent) {
        let key = event.key();

        let Ok(mut state) = self.state.lock() else {
            error!("Failed to track event for key '{}': state lock poisoned", key);
            return;
        };
        let state = &mut *state;

        let entry = MetricEntry {
            memory_bytes: sysinfo::process_memory_bytes(),
            correlation_id: generate_correlation_id(),
            event,
        };

        if let Some(actor) = &entry.event.actor {
            state.active_actors.insert(actor.key());
        }

        let value = sample_value(&entry.event.payload);
        let now = Utc::now();
        state.entries.entry(key.clone()).or_default().push(entry);

        let aggregate = state
            .aggregates
            .entry(key.clone())
            .or_insert_with(|| AggregatedMetric {
                count: 0,
                sum: 0.0,
                average: 0.0,
                min: value,
                max: value,
                last_updated: now,
                percentiles: Percentiles::default(),
            });
        aggregate.count += 1;
        aggregate.sum += value;
        aggregate.average = aggregate.sum / aggregate.count as f64;
        aggregate.min = aggregate.min.min(value);
        aggregate.max = aggregate.max.max(value);
        aggregate.last_updated = now;

        // Full-resort percentile computation over the retained sample on
        // every event. O(n log n) per track; a deliberate simplicity trade.
        if let Some(entries) = state.entries.get(&key) {
            let percentiles = compute_percentiles(entries);
            if let Some(aggregate) = state.aggregates.get_mut(&key) {
                aggregate.percentiles = percentiles;
            }
        }
    }

    /// Record a timing sample for `operation`
    pub fn track_timing(&self, operation: &str, duration_ms: f64, actor: Option<Actor>) {
        self.track(MetricEvent {
            kind: EventKind::Performance,
            category: "timing".to_string(),
            action: operation.to_string(),
            actor,
            payload: serde_json::json!({ "duration": duration_ms }),
            timestamp: Utc::now(),
        });
    }

    /// Record a caught error with its context
    pub fn track_error(&self, error: &dyn std::fmt::Display, context: &str, actor: Option<Actor>) {
        self.track(MetricEvent {
            kind: EventKind::Error,
            category: "error".to_string(),
            action: context.to_string(),
            actor,
            payload: serde_json::json!({
                "message": error.to_string(),
                "context": context,
            }),
            timestamp: Utc::now(),
        });
    }

    /// 1-minute-window view of recent activity
    ///
    /// Returns an all-zero structure on internal failure.
    pub fn realtime_stats(&self) -> RealtimeStats {
        let Ok(state) = self.state.lock() else {
            error!("realtime_stats: state lock poisoned, returning empty view");
            return RealtimeStats::default();
        };

        let cutoff = Utc::now() - Duration::seconds(60);
        let window: Vec<&MetricEntry> = state
            .entries
            .values()
            .flatten()
            .filter(|e| e.event.timestamp >= cutoff)
            .collect();

        let actions = window
            .iter()
            .filter(|e| e.event.kind == EventKind::UserAction)
            .count() as u64;
        let errors = window
            .iter()
            .filter(|e| e.event.kind == EventKind::Error)
            .count() as u64;
        let error_rate = if actions > 0 {
            errors as f64 / actions as f64
        } else {
            0.0
        };

        let durations: Vec<f64> = window
            .iter()
            .filter_map(|e| e.event.payload.get("duration").and_then(|v| v.as_f64()))
            .collect();
        let avg_duration_ms = mean(&durations);

        // Per-action rollup for the top-10 list
        #[derive(Default)]
        struct ActionAccum {
            count: u64,
            errors: u64,
            durations: Vec<f64>,
        }
        let mut by_action: HashMap<&str, ActionAccum> = HashMap::new();
        for entry in &window {
            let accum = by_action.entry(entry.event.action.as_str()).or_default();
            accum.count += 1;
            if entry.event.kind == EventKind::Error {
                accum.errors += 1;
            }
            if let Some(d) = entry.event.payload.get("duration").and_then(|v| v.as_f64()) {
                accum.durations.push(d);
            }
        }
        let mut top_actions: Vec<ActionStats> = by_action
            .into_iter()
            .map(|(action, accum)| ActionStats {
                action: action.to_string(),
                count: accum.count,
                avg_duration_ms: mean(&accum.durations),
                error_rate: accum.errors as f64 / accum.count as f64,
            })
            .collect();
        top_actions.sort_by(|a, b| b.count.cmp(&a.count).then(a.action.cmp(&b.action)));
        top_actions.truncate(10);

        // Per-platform rollup
        #[derive(Default)]
        struct PlatformAccum {
            actors: HashSet<String>,
            actions: u64,
            errors: u64,
            durations: Vec<f64>,
        }
        let mut by_platform: HashMap<String, PlatformAccum> = HashMap::new();
        for entry in &window {
            let Some(actor) = &entry.event.actor else {
                continue;
            };
            let accum = by_platform.entry(actor.platform.clone()).or_default();
            accum.actors.insert(actor.key());
            if entry.event.kind == EventKind::UserAction {
                accum.actions += 1;
            }
            if entry.event.kind == EventKind::Error {
                accum.errors += 1;
            }
            if let Some(d) = entry.event.payload.get("duration").and_then(|v| v.as_f64()) {
                accum.durations.push(d);
            }
        }
        let platforms = by_platform
            .into_iter()
            .map(|(platform, accum)| {
                (
                    platform,
                    PlatformStats {
                        active_users: accum.actors.len() as u64,
                        actions: accum.actions,
                        errors: accum.errors,
                        avg_duration_ms: mean(&accum.durations),
                    },
                )
            })
            .collect();

        RealtimeStats {
            active_users: state.active_actors.len() as u64,
            actions_last_minute: actions,
            error_rate,
            avg_duration_ms,
            top_actions,
            platforms,
            memory_bytes: sysinfo::process_memory_bytes(),
            uptime_secs: self.uptime_secs(),
        }
    }

    /// User-behavior summary over the full retained log
    ///
    /// This scan is O(total retained entries); overlapping 24h buckets are
    /// recomputed from scratch on every call.
    pub fn user_behavior_insights(&self) -> UserBehaviorInsights {
        let Ok(state) = self.state.lock() else {
            error!("user_behavior_insights: state lock poisoned, returning empty view");
            return UserBehaviorInsights::default();
        };

        let now = Utc::now();
        let day_ago = now - Duration::hours(24);
        let two_days_ago = now - Duration::hours(48);

        struct ActorAccum {
            platform: String,
            user_id: String,
            first_seen: Timestamp,
            last_seen: Timestamp,
            actions: u64,
        }
        let mut by_actor: HashMap<String, ActorAccum> = HashMap::new();
        let mut today: HashSet<String> = HashSet::new();
        let mut yesterday: HashSet<String> = HashSet::new();

        for entry in state.entries.values().flatten() {
            let Some(actor) = &entry.event.actor else {
                continue;
            };
            let key = actor.key();
            let ts = entry.event.timestamp;

            let accum = by_actor.entry(key.clone()).or_insert_with(|| ActorAccum {
                platform: actor.platform.clone(),
                user_id: actor.user_id.clone(),
                first_seen: ts,
                last_seen: ts,
                actions: 0,
            });
            accum.first_seen = accum.first_seen.min(ts);
            accum.last_seen = accum.last_seen.max(ts);
            if entry.event.kind == EventKind::UserAction {
                accum.actions += 1;
            }

            if ts >= day_ago {
                today.insert(key.clone());
            } else if ts >= two_days_ago {
                yesterday.insert(key);
            }
        }

        let retention_rate = if yesterday.is_empty() {
            0.0
        } else {
            let intersection = today.intersection(&yesterday).count() as f64;
            let union = today.union(&yesterday).count() as f64;
            intersection / union
        };

        let mut platforms: std::collections::BTreeMap<String, PlatformUsage> = Default::default();
        for accum in by_actor.values() {
            let usage = platforms.entry(accum.platform.clone()).or_default();
            usage.users += 1;
            usage.actions += accum.actions;
        }

        let mut top_users: Vec<UserActivity> = by_actor
            .values()
            .map(|a| UserActivity {
                platform: a.platform.clone(),
                user_id: a.user_id.clone(),
                actions: a.actions,
            })
            .collect();
        top_users.sort_by(|a, b| {
            b.actions
                .cmp(&a.actions)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        top_users.truncate(10);

        UserBehaviorInsights {
            total_users: by_actor.len() as u64,
            new_users_24h: by_actor.values().filter(|a| a.first_seen >= day_ago).count() as u64,
            active_users_24h: by_actor.values().filter(|a| a.last_seen >= day_ago).count() as u64,
            retention_rate,
            top_users,
            platforms,
        }
    }

    /// Process-level performance over the retention window
    pub fn system_performance(&self) -> SystemPerformance {
        let Ok(state) = self.state.lock() else {
            error!("system_performance: state lock poisoned, returning empty view");
            return SystemPerformance::default();
        };

        let mut timings: Vec<f64> = state
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with("performance:timing:"))
            .flat_map(|(_, entries)| entries.iter())
            .map(|e| sample_value(&e.event.payload))
            .collect();
        timings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let response_times = if timings.is_empty() {
            ResponseTimeStats::default()
        } else {
            ResponseTimeStats {
                average: mean(&timings),
                p50: percentile_at(&timings, 0.5),
                p95: percentile_at(&timings, 0.95),
                p99: percentile_at(&timings, 0.99),
            }
        };

        let mut actions = 0u64;
        let mut errors = 0u64;
        for entry in state.entries.values().flatten() {
            match entry.event.kind {
                EventKind::UserAction => actions += 1,
                EventKind::Error => errors += 1,
                _ => {}
            }
        }
        let error_rate = if actions > 0 {
            errors as f64 / actions as f64
        } else {
            0.0
        };

        let uptime = self.uptime_secs() as f64;
        SystemPerformance {
            cpu_percent: sysinfo::process_cpu_percent(uptime),
            memory_bytes: sysinfo::process_memory_bytes(),
            response_times,
            error_rate,
        }
    }

    /// Cumulative statistics for one aggregation key
    pub fn aggregated_metric(&self, key: &str) -> Option<AggregatedMetric> {
        let Ok(state) = self.state.lock() else {
            return None;
        };
        state.aggregates.get(key).cloned()
    }

    /// All aggregation keys seen since process start
    pub fn metric_keys(&self) -> Vec<String> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = state.aggregates.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The most recent `limit` retained entries for a key, oldest first
    pub fn raw_metrics(&self, key: &str, limit: usize) -> Vec<MetricEntry> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let Some(entries) = state.entries.get(key) else {
            return Vec::new();
        };
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    /// Drop entries older than the retention window and rebuild the
    /// active-actor set from the survivors
    ///
    /// An actor's "active" status decays exactly when their last retained
    /// entry ages out; there is no independent TTL.
    pub fn cleanup(&self) {
        let Ok(mut state) = self.state.lock() else {
            error!("cleanup: state lock poisoned, skipping sweep");
            return;
        };
        let state = &mut *state;

        let cutoff = Utc::now() - self.retention;
        let before: usize = state.entries.values().map(Vec::len).sum();

        let mut changed_keys = Vec::new();
        for (key, entries) in state.entries.iter_mut() {
            let len = entries.len();
            entries.retain(|e| e.event.timestamp >= cutoff);
            if entries.len() != len {
                changed_keys.push(key.clone());
            }
        }
        state.entries.retain(|_, entries| !entries.is_empty());

        // Windowed percentiles must not keep counting pruned samples
        for key in changed_keys {
            let percentiles = state
                .entries
                .get(&key)
                .map(|entries| compute_percentiles(entries))
                .unwrap_or_default();
            if let Some(aggregate) = state.aggregates.get_mut(&key) {
                aggregate.percentiles = percentiles;
            }
        }

        state.active_actors = state
            .entries
            .values()
            .flatten()
            .filter_map(|e| e.event.actor.as_ref().map(Actor::key))
            .collect();

        let after: usize = state.entries.values().map(Vec::len).sum();
        if before != after {
            info!("Cleanup sweep pruned {} entries ({} retained)", before - after, after);
        } else {
            debug!("Cleanup sweep pruned nothing ({} retained)", after);
        }
    }

    /// Start the periodic cleanup sweep
    pub fn start_cleanup_task(&self, interval: std::time::Duration) {
        let Ok(mut slot) = self.cleanup.lock() else {
            error!("start_cleanup_task: task slot lock poisoned");
            return;
        };
        if slot.is_some() {
            warn!("Cleanup task already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let aggregator = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so the first sweep
            // happens one full interval after start
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => aggregator.cleanup(),
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Cleanup task stopped");
        });

        *slot = Some(CleanupTask { shutdown, handle });
        info!("Cleanup task started (interval {:?})", interval);
    }

    /// Stop the periodic cleanup sweep
    pub fn stop(&self) {
        let Ok(mut slot) = self.cleanup.lock() else {
            return;
        };
        if let Some(task) = slot.take() {
            if task.shutdown.send(true).is_err() {
                task.handle.abort();
            }
            info!("Cleanup task stopping");
        }
    }

    /// Seconds since the aggregator was constructed
    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    /// Retention window in use
    pub fn retention(&self) -> Duration {
        self.retention
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        // Default: 1 hour retention
        Self::new(Duration::seconds(3600))
    }
}

/// Numeric sample for percentile/min/max purposes: `duration`, falling back
/// to `value`, falling back to 1.0
fn sample_value(payload: &serde_json::Value) -> f64 {
    payload
        .get("duration")
        .and_then(|v| v.as_f64())
        .or_else(|| payload.get("value").and_then(|v| v.as_f64()))
        .unwrap_or(1.0)
}

/// Sorted-sample percentile at `floor(len * q)`, no interpolation
fn percentile_at(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

fn compute_percentiles(entries: &[MetricEntry]) -> Percentiles {
    let mut values: Vec<f64> = entries
        .iter()
        .map(|e| sample_value(&e.event.payload))
        .collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Percentiles {
        p50: percentile_at(&values, 0.5),
        p95: percentile_at(&values, 0.95),
        p99: percentile_at(&values, 0.99),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Time-based identifier with a random suffix, for trace correlation only
fn generate_correlation_id() -> String {
    format!("{:x}-{:06x}", Utc::now().timestamp_millis(), rand::random::<u32>() & 0xff_ffff)
}

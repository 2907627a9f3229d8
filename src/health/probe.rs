//! Health probe contract and built-in probes
//!
//! Subordinate services are reached through the [`HealthProbe`] trait: a
//! zero-argument async check returning a [`ServiceHealth`] or an error. The
//! orchestrator owns only polling and reduction; the probes are injected
//! capability references resolved once at startup.

use crate::error::HealthError;
use crate::events::{HealthStatus, ServiceHealth};
use crate::sysinfo;
use chrono::Utc;
use log::{debug, warn};
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

/// An async health source for one subordinate service
///
/// A probe that returns `Err` is treated by the orchestrator as a critical
/// verdict with one counted error; it never aborts the surrounding tick.
pub trait HealthProbe: Send + Sync {
    /// Service name used in reports and logs
    fn name(&self) -> &str;

    /// Run one check
    fn check(&self) -> Pin<Box<dyn Future<Output = Result<ServiceHealth, HealthError>> + Send + '_>>;
}

/// Probe for a service exposing an HTTP health endpoint
///
/// A 2xx response is healthy; any other status is degraded; a transport
/// failure is an error (which the orchestrator maps to critical).
pub struct HttpHealthProbe {
    name: String,
    client: Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(name: impl Into<String>, client: Client, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            url: url.into(),
        }
    }
}

impl HealthProbe for HttpHealthProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = Result<ServiceHealth, HealthError>> + Send + '_>> {
        Box::pin(async move {
            let start = Instant::now();
            let response = self.client.get(&self.url).send().await?;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            let status = response.status();

            if status.is_success() {
                Ok(ServiceHealth::healthy(
                    elapsed_ms,
                    format!("{} responded {}", self.url, status.as_u16()),
                ))
            } else {
                Ok(ServiceHealth {
                    status: HealthStatus::Degraded,
                    response_time_ms: elapsed_ms,
                    last_checked: Utc::now(),
                    error_count: 1,
                    details: format!("{} responded {}", self.url, status.as_u16()),
                    metrics: None,
                })
            }
        })
    }
}

/// Probe with a fixed verdict, for unconfigured services and tests
pub struct StaticProbe {
    name: String,
    health: ServiceHealth,
}

impl StaticProbe {
    pub fn new(name: impl Into<String>, health: ServiceHealth) -> Self {
        Self {
            name: name.into(),
            health,
        }
    }

    /// Always-healthy probe for services without a configured endpoint
    pub fn unconfigured(name: impl Into<String>) -> Self {
        let name = name.into();
        let health = ServiceHealth::healthy(0.0, format!("{} check not configured", name));
        Self { name, health }
    }
}

impl HealthProbe for StaticProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = Result<ServiceHealth, HealthError>> + Send + '_>> {
        let mut health = self.health.clone();
        health.last_checked = Utc::now();
        Box::pin(async move { Ok(health) })
    }
}

/// Outcome of probing one external endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointOutcome {
    /// 2xx response
    Healthy,
    /// Non-2xx response
    Degraded,
    /// Transport failure
    Critical,
}

/// Fan-out check over a fixed list of external HTTP endpoints
///
/// Endpoints are probed in parallel, each failure isolated to its own
/// branch; results are merged after all branches settle. The aggregate
/// verdict follows the endpoint error rate: above 50% failing is critical,
/// above 20% degraded, otherwise healthy.
#[derive(Clone)]
pub struct ExternalApiCheck {
    client: Client,
    endpoints: Vec<String>,
}

impl ExternalApiCheck {
    pub fn new(client: Client, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }

    /// Default client for endpoint probes
    pub fn default_client() -> Client {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client")
    }

    async fn check_endpoint(client: Client, url: String) -> (String, EndpointOutcome, f64) {
        let start = Instant::now();
        let outcome = match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => EndpointOutcome::Healthy,
            Ok(response) => {
                debug!("Endpoint {} returned status {}", url, response.status());
                EndpointOutcome::Degraded
            }
            Err(e) => {
                warn!("Endpoint {} unreachable: {}", url, e);
                EndpointOutcome::Critical
            }
        };
        (url, outcome, start.elapsed().as_secs_f64() * 1000.0)
    }

    /// Probe every endpoint and reduce to a single verdict
    ///
    /// Never fails as a whole: an unreachable endpoint contributes to the
    /// error rate instead of aborting the check.
    pub async fn check(&self) -> ServiceHealth {
        let start = Instant::now();

        if self.endpoints.is_empty() {
            return ServiceHealth::healthy(0.0, "no external endpoints configured");
        }

        let mut handles = Vec::with_capacity(self.endpoints.len());
        for url in &self.endpoints {
            handles.push(tokio::spawn(Self::check_endpoint(
                self.client.clone(),
                url.clone(),
            )));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                // A panicked branch counts as an unreachable endpoint
                Err(e) => {
                    warn!("Endpoint check task failed: {}", e);
                    results.push(("<lost>".to_string(), EndpointOutcome::Critical, 0.0));
                }
            }
        }

        let total = results.len();
        let failing = results
            .iter()
            .filter(|(_, outcome, _)| *outcome != EndpointOutcome::Healthy)
            .count();
        let error_rate = failing as f64 / total as f64;

        let status = if error_rate > 0.5 {
            HealthStatus::Critical
        } else if error_rate > 0.2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let per_endpoint: Vec<serde_json::Value> = results
            .iter()
            .map(|(url, outcome, ms)| {
                serde_json::json!({
                    "url": url,
                    "ok": *outcome == EndpointOutcome::Healthy,
                    "response_time_ms": ms,
                })
            })
            .collect();

        ServiceHealth {
            status,
            response_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            last_checked: Utc::now(),
            error_count: failing as u32,
            details: format!("{}/{} endpoints failing", failing, total),
            metrics: Some(serde_json::json!({
                "error_rate": error_rate,
                "endpoints": per_endpoint,
            })),
        }
    }
}

/// Classify a used/total ratio against degraded/critical thresholds
fn classify_ratio(
    ratio: f64,
    degraded_above: f64,
    critical_above: f64,
    what: &str,
) -> ServiceHealth {
    let status = if ratio > critical_above {
        HealthStatus::Critical
    } else if ratio > degraded_above {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    ServiceHealth {
        status,
        response_time_ms: 0.0,
        last_checked: Utc::now(),
        error_count: if status == HealthStatus::Healthy { 0 } else { 1 },
        details: format!("{} at {:.1}%", what, ratio * 100.0),
        metrics: Some(serde_json::json!({ "usage_ratio": ratio })),
    }
}

/// Local memory check against the configured ratio thresholds
pub fn memory_check(degraded_above: f64, critical_above: f64) -> ServiceHealth {
    classify_ratio(
        sysinfo::memory_usage_ratio(),
        degraded_above,
        critical_above,
        "memory usage",
    )
}

/// Local disk check for the filesystem holding `path`
pub fn disk_check(path: &str, degraded_above: f64, critical_above: f64) -> ServiceHealth {
    classify_ratio(
        sysinfo::disk_usage_ratio(path),
        degraded_above,
        critical_above,
        "disk usage",
    )
}

/// Scripted probe for tests: pops one result per check
#[cfg(test)]
pub(crate) struct MockProbe {
    name: String,
    results: std::sync::Mutex<std::collections::VecDeque<Result<ServiceHealth, String>>>,
}

#[cfg(test)]
impl MockProbe {
    pub fn new(
        name: &str,
        results: Vec<Result<ServiceHealth, String>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            results: std::sync::Mutex::new(results.into()),
        }
    }

    /// Probe that always reports the given status
    pub fn always(name: &str, status: HealthStatus) -> Self {
        let mut health = ServiceHealth::healthy(1.0, "scripted");
        health.status = status;
        Self {
            name: name.to_string(),
            results: std::sync::Mutex::new(
                std::iter::repeat(Ok(health)).take(64).collect(),
            ),
        }
    }
}

#[cfg(test)]
impl HealthProbe for MockProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = Result<ServiceHealth, HealthError>> + Send + '_>> {
        let next = self.results.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Ok(health)) => Ok(health),
                Some(Err(msg)) => Err(HealthError::ProbeFailed("mock".to_string(), msg)),
                None => Ok(ServiceHealth::healthy(1.0, "exhausted script")),
            }
        })
    }
}

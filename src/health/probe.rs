//! HTTP liveness prober

use super::{HealthCheckPolicy, HealthMonitor, HealthStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result of a single probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub url: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// `status` field of a JSON body, when the service reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_status: Option<String>,
    /// Per-dependency states from the body's `services` map
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, String>,
    pub latency_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct HealthProber {
    client: reqwest::Client,
    policy: HealthCheckPolicy,
}

impl HealthProber {
    pub fn new(policy: HealthCheckPolicy) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(policy.timeout).build()?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &HealthCheckPolicy {
        &self.policy
    }

    /// Issues one `GET` against `url`; failures are reported in the outcome, never raised
    pub async fn probe(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();
        let mut outcome = ProbeOutcome {
            url: url.to_string(),
            healthy: false,
            status_code: None,
            reported_status: None,
            services: BTreeMap::new(),
            latency_ms: 0,
            error: None,
        };

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                outcome.latency_ms = start.elapsed().as_millis();
                outcome.error = Some(if e.is_timeout() {
                    format!("timed out after {}s", self.policy.timeout.as_secs())
                } else {
                    e.to_string()
                });
                return outcome;
            }
        };

        let status = response.status();
        outcome.status_code = Some(status.as_u16());
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                outcome.latency_ms = start.elapsed().as_millis();
                outcome.error = Some(format!("failed to read response body: {}", e));
                return outcome;
            }
        };
        outcome.latency_ms = start.elapsed().as_millis();

        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
            outcome.reported_status = json
                .get("status")
                .and_then(|s| s.as_str())
                .map(str::to_string);
            if let Some(services) = json.get("services").and_then(|s| s.as_object()) {
                for (name, state) in services {
                    let state = state
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| state.to_string());
                    outcome.services.insert(name.clone(), state);
                }
            }
        }

        outcome.healthy = status.is_success()
            && outcome
                .reported_status
                .as_deref()
                .map_or(true, |s| s.eq_ignore_ascii_case("healthy"));

        if !outcome.healthy && outcome.error.is_none() {
            outcome.error = Some(match &outcome.reported_status {
                Some(s) if status.is_success() => format!("service reported status '{}'", s),
                _ => format!("HTTP {}", status),
            });
        }

        outcome
    }

    /// Probes every `interval` until the monitor declares the service unhealthy or
    /// `max_probes` have run
    pub async fn watch(&self, url: &str, max_probes: Option<usize>) -> HealthStatus {
        let mut monitor = HealthMonitor::new(self.policy.clone());
        let started = Instant::now();
        let mut probes = 0usize;

        loop {
            tokio::time::sleep(self.policy.interval).await;

            let outcome = self.probe(url).await;
            probes += 1;
            let status = monitor.record(started.elapsed(), outcome.healthy);

            if outcome.healthy {
                debug!(url, latency_ms = outcome.latency_ms as u64, "Probe succeeded");
            } else {
                warn!(
                    url,
                    streak = monitor.failing_streak(),
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Probe failed"
                );
            }

            if status == HealthStatus::Unhealthy {
                info!(url, probes, "Service marked unhealthy");
                return status;
            }
            if max_probes.map_or(false, |max| probes >= max) {
                return status;
            }
        }
    }
}

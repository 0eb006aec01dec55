//! Health-check contract
//!
//! The orchestrator probes `GET <path>` on the resolved port every `interval`, gives each
//! probe `timeout` to answer, ignores failures during the `start_period` grace window and
//! marks the container unhealthy after `retries` consecutive failures. The same
//! [`HealthCheckPolicy`] value is rendered into the image's `HEALTHCHECK` and used by the
//! built-in prober, so the two cannot disagree.

mod probe;

pub use probe::{HealthProber, ProbeError, ProbeOutcome};

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Liveness probe declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckPolicy {
    pub path: String,
    #[serde(serialize_with = "as_secs")]
    pub interval: Duration,
    #[serde(serialize_with = "as_secs")]
    pub timeout: Duration,
    #[serde(serialize_with = "as_secs")]
    pub start_period: Duration,
    pub retries: u32,
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            start_period: Duration::from_secs(5),
            retries: 3,
        }
    }
}

impl HealthCheckPolicy {
    /// Flags for a Dockerfile `HEALTHCHECK` instruction
    pub fn docker_flags(&self) -> String {
        format!(
            "--interval={}s --timeout={}s --start-period={}s --retries={}",
            self.interval.as_secs(),
            self.timeout.as_secs(),
            self.start_period.as_secs(),
            self.retries
        )
    }

    /// Earliest point after start at which the container can be declared unhealthy
    pub fn earliest_unhealthy(&self) -> Duration {
        // First probe landing at or after the end of the grace window
        let interval_ms = self.interval.as_millis().max(1);
        let n = ((self.start_period.as_millis() + interval_ms - 1) / interval_ms).max(1);
        let first_counted = self.interval * n as u32;
        first_counted + self.interval * self.retries.saturating_sub(1)
    }
}

/// Container health as the orchestrator sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Consecutive-failure state machine fed with probe results
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    policy: HealthCheckPolicy,
    status: HealthStatus,
    failing_streak: u32,
}

impl HealthMonitor {
    pub fn new(policy: HealthCheckPolicy) -> Self {
        Self {
            policy,
            status: HealthStatus::Starting,
            failing_streak: 0,
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn failing_streak(&self) -> u32 {
        self.failing_streak
    }

    /// Records one probe result taken `elapsed` after container start
    pub fn record(&mut self, elapsed: Duration, healthy: bool) -> HealthStatus {
        if healthy {
            self.failing_streak = 0;
            self.status = HealthStatus::Healthy;
            return self.status;
        }

        // Failures in the grace window only count once the service has been seen healthy
        if elapsed < self.policy.start_period && self.status == HealthStatus::Starting {
            return self.status;
        }

        self.failing_streak += 1;
        if self.failing_streak >= self.policy.retries {
            self.status = HealthStatus::Unhealthy;
        }
        self.status
    }
}

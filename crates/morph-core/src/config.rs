//! Orchestrator configuration
//!
//! All durations serialise as integer milliseconds so the same structure can
//! be read from TOML or JSON.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum forward-progress time for one step
    #[serde(with = "duration_ms")]
    pub step_timeout: Duration,
    /// Concurrent steps per plan; `None` means unbounded
    pub max_concurrent_steps: Option<usize>,
    /// How often adapter mutation status is polled
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// How long a cancelled step keeps polling a mutation already in flight
    /// before declaring its outcome unknown
    #[serde(with = "duration_ms")]
    pub settle_timeout: Duration,
    /// Forward retry policy for adapter mutations
    pub retry: RetryConfig,
    /// Health verification thresholds
    pub health: HealthConfig,
    /// Published topology snapshots retained for history queries
    pub history_limit: usize,
    /// Compare-and-swap attempts before a topology commit gives up
    pub cas_retry_limit: u32,
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With step timeout
    #[inline]
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// With per-plan step concurrency limit
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_steps(mut self, limit: usize) -> Self {
        self.max_concurrent_steps = Some(limit);
        self
    }

    /// With adapter poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// With in-flight mutation settle limit
    #[inline]
    #[must_use]
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// With health thresholds
    #[inline]
    #[must_use]
    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Check internal consistency
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_timeout.is_zero() {
            return Err(ConfigError::Invalid("step_timeout must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be positive".into()));
        }
        if self.settle_timeout < self.poll_interval {
            return Err(ConfigError::Invalid(
                "settle_timeout must cover at least one poll_interval".into(),
            ));
        }
        if self.max_concurrent_steps == Some(0) {
            return Err(ConfigError::Invalid(
                "max_concurrent_steps must be at least 1".into(),
            ));
        }
        if self.cas_retry_limit == 0 {
            return Err(ConfigError::Invalid("cas_retry_limit must be at least 1".into()));
        }
        self.retry.validate()?;
        self.health.validate()
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(120),
            max_concurrent_steps: None,
            poll_interval: Duration::from_millis(50),
            settle_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            health: HealthConfig::default(),
            history_limit: 100,
            cas_retry_limit: 16,
        }
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1".into()));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Health verification thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Sampling window
    #[serde(with = "duration_ms")]
    pub window: Duration,
    /// Wait before the window opens, letting the mutation settle
    #[serde(with = "duration_ms")]
    pub stabilization_delay: Duration,
    /// Hard limit on one verification, including stabilization
    #[serde(with = "duration_ms")]
    pub verification_timeout: Duration,
    /// Fewer samples than this is `Inconclusive`
    pub min_samples: usize,
    /// Error rate must stay strictly below this
    pub max_error_rate: f64,
    /// p95 latency may be at most this multiple of the baseline
    pub latency_multiple: f64,
    /// Baseline used when telemetry has no history for a service
    pub fallback_baseline_ms: f64,
}

impl HealthConfig {
    /// With sampling window, stretching the timeout to fit
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        let floor = self.stabilization_delay + window;
        if self.verification_timeout < floor {
            self.verification_timeout = floor + window;
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::Invalid("health.window must be positive".into()));
        }
        if self.verification_timeout < self.stabilization_delay + self.window {
            return Err(ConfigError::Invalid(
                "health.verification_timeout must cover stabilization_delay + window".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(ConfigError::Invalid(
                "health.max_error_rate must be within [0, 1]".into(),
            ));
        }
        if !(self.latency_multiple.is_finite() && self.latency_multiple >= 1.0) {
            return Err(ConfigError::Invalid("health.latency_multiple must be >= 1".into()));
        }
        Ok(())
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            stabilization_delay: Duration::ZERO,
            verification_timeout: Duration::from_secs(60),
            min_samples: 5,
            max_error_rate: 0.05,
            latency_multiple: 1.5,
            fallback_baseline_ms: 200.0,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

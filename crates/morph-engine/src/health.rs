//! Health verification of a just-mutated service
//!
//! A verification waits for the stabilization delay, then for one sampling
//! window, then judges the samples collected during that window. The whole
//! wait is cancellable and bounded by its own timeout.

use crate::telemetry::{MetricSample, TelemetrySource};
use morph_core::config::HealthConfig;
use morph_core::types::ServiceId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of one verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    Healthy { error_rate: f64, p95_latency_ms: f64 },
    Unhealthy { reason: String },
    /// Not enough evidence either way
    Inconclusive { samples: usize, reason: String },
}

impl Verdict {
    /// Only `Healthy` allows a step to make progress
    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Verdict::Healthy { .. })
    }

    /// Failure reason, for anything but `Healthy`
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Verdict::Healthy { .. } => None,
            Verdict::Unhealthy { reason } => Some(reason.clone()),
            Verdict::Inconclusive { samples, reason } => {
                Some(format!("inconclusive ({samples} samples): {reason}"))
            }
        }
    }
}

/// Verification did not produce a verdict
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    #[error("verification cancelled")]
    Cancelled,

    #[error("verification timed out after {0:?}")]
    Timeout(Duration),
}

/// Judges services against SLA thresholds using live telemetry
#[derive(Clone)]
pub struct HealthVerifier {
    telemetry: Arc<dyn TelemetrySource>,
    config: HealthConfig,
}

impl std::fmt::Debug for HealthVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthVerifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HealthVerifier {
    #[must_use]
    pub fn new(telemetry: Arc<dyn TelemetrySource>, config: HealthConfig) -> Self {
        Self { telemetry, config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Observe `service` for one window and judge it
    ///
    /// # Errors
    /// `Cancelled` when `cancel` fires first, `Timeout` when the verification
    /// timeout expires before a verdict is reached.
    pub async fn verify(
        &self,
        service: &ServiceId,
        cancel: &CancellationToken,
    ) -> Result<Verdict, HealthError> {
        let limit = self.config.verification_timeout;
        let observe = async {
            tokio::time::sleep(self.config.stabilization_delay + self.config.window).await;
            self.evaluate(service).await
        };

        let verdict = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HealthError::Cancelled),
            res = tokio::time::timeout(limit, observe) => {
                res.map_err(|_| HealthError::Timeout(limit))?
            }
        };

        match &verdict {
            Verdict::Healthy {
                error_rate,
                p95_latency_ms,
            } => debug!(%service, error_rate, p95_latency_ms, "service healthy"),
            other => warn!(%service, verdict = ?other, "service failed verification"),
        }
        Ok(verdict)
    }

    async fn evaluate(&self, service: &ServiceId) -> Verdict {
        let samples = match self.telemetry.recent_metrics(service, self.config.window).await {
            Ok(samples) => samples,
            Err(e) => {
                return Verdict::Inconclusive {
                    samples: 0,
                    reason: e.to_string(),
                }
            }
        };
        let baseline = match self.telemetry.baseline_latency(service).await {
            Ok(Some(baseline)) if baseline.is_finite() && baseline > 0.0 => baseline,
            _ => self.config.fallback_baseline_ms,
        };
        judge(&self.config, &samples, baseline)
    }
}

/// Apply the thresholds in `config` to `samples`
#[must_use]
pub fn judge(config: &HealthConfig, samples: &[MetricSample], baseline_ms: f64) -> Verdict {
    if samples.len() < config.min_samples {
        return Verdict::Inconclusive {
            samples: samples.len(),
            reason: format!("need at least {} samples", config.min_samples),
        };
    }

    let requests: u64 = samples.iter().map(|s| s.requests).sum();
    if requests == 0 {
        return Verdict::Inconclusive {
            samples: samples.len(),
            reason: "no requests observed".into(),
        };
    }
    if let Some(bad) = samples.iter().find(|s| !s.latency_ms.is_finite()) {
        return Verdict::Inconclusive {
            samples: samples.len(),
            reason: format!("non-finite latency sample {}", bad.latency_ms),
        };
    }
    let errors: u64 = samples.iter().map(|s| s.errors).sum();
    #[allow(clippy::cast_precision_loss)]
    let error_rate = errors as f64 / requests as f64;
    if error_rate >= config.max_error_rate {
        return Verdict::Unhealthy {
            reason: format!(
                "error rate {error_rate:.3} at or above threshold {:.3}",
                config.max_error_rate
            ),
        };
    }

    let p95 = p95(samples);
    let ceiling = baseline_ms * config.latency_multiple;
    if p95 > ceiling {
        return Verdict::Unhealthy {
            reason: format!("p95 latency {p95:.1}ms above {ceiling:.1}ms"),
        };
    }

    Verdict::Healthy {
        error_rate,
        p95_latency_ms: p95,
    }
}

/// Nearest-rank 95th percentile of sample latencies
fn p95(samples: &[MetricSample]) -> f64 {
    let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_by(f64::total_cmp);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let rank = (0.95 * latencies.len() as f64).ceil() as usize;
    latencies[rank.saturating_sub(1).min(latencies.len() - 1)]
}

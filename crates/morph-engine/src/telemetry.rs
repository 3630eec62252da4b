//! Telemetry read API consumed by the health verifier

use morph_core::types::ServiceId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregated request metrics for one sampling interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub latency_ms: f64,
    pub requests: u64,
    pub errors: u64,
}

impl MetricSample {
    #[must_use]
    pub fn new(latency_ms: f64, requests: u64, errors: u64) -> Self {
        Self {
            latency_ms,
            requests,
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("no telemetry for service {0}")]
    UnknownService(ServiceId),

    #[error("telemetry unavailable: {0}")]
    Unavailable(String),
}

/// Source of recent live metrics
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Samples recorded for `service` during the last `window`
    async fn recent_metrics(
        &self,
        service: &ServiceId,
        window: Duration,
    ) -> Result<Vec<MetricSample>, TelemetryError>;

    /// Historical p95 latency, if any history exists
    async fn baseline_latency(&self, service: &ServiceId) -> Result<Option<f64>, TelemetryError>;
}

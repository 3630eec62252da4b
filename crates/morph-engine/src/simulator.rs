//! Deterministic in-memory collaborators
//!
//! `SimulatedAdapter` accepts every mutation unless told otherwise and lets
//! tests inject transient errors, adapter-reported failures and failing
//! compensations. `SimulatedTelemetry` produces seeded, noisy samples from a
//! per-service profile.

use crate::adapter::{
    AdapterError, CompensationOutcome, MutationHandle, MutationStatus, PlasticityAdapter,
};
use crate::telemetry::{MetricSample, TelemetryError, TelemetrySource};
use dashmap::DashMap;
use morph_core::saga::{AppliedSubAction, SubAction};
use morph_core::types::{ServiceId, StepId, StepKind, TransformationStep};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug)]
struct Submitted {
    status: MutationStatus,
    polls_remaining: u32,
}

/// In-memory plasticity adapter with failure injection
#[derive(Debug, Default)]
pub struct SimulatedAdapter {
    mutations: DashMap<Uuid, Submitted>,
    pending_polls: u32,
    latency: Duration,
    transient_failures: AtomicU32,
    failing_services: Mutex<HashSet<ServiceId>>,
    rejected_services: Mutex<HashSet<ServiceId>>,
    failing_compensations: Mutex<HashSet<StepKind>>,
    submitted: Mutex<Vec<(StepId, SubAction)>>,
    compensated: Mutex<Vec<StepId>>,
}

impl SimulatedAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `Pending` this many times before the final status
    #[must_use]
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Delay every submission
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Next `count` submissions fail with a transient error
    pub fn fail_next_transient(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Mutations touching `service` are accepted, then reported `Failed`
    pub fn fail_mutations_for(&self, service: impl Into<ServiceId>) {
        self.failing_services.lock().insert(service.into());
    }

    /// Mutations touching `service` are refused outright
    pub fn reject_mutations_for(&self, service: impl Into<ServiceId>) {
        self.rejected_services.lock().insert(service.into());
    }

    /// Compensation of steps of `kind` reports failure
    pub fn fail_compensation_for(&self, kind: StepKind) {
        self.failing_compensations.lock().insert(kind);
    }

    /// Every submission so far, in order
    #[must_use]
    pub fn submitted(&self) -> Vec<(StepId, SubAction)> {
        self.submitted.lock().clone()
    }

    /// Steps compensation was requested for, in order
    #[must_use]
    pub fn compensated(&self) -> Vec<StepId> {
        self.compensated.lock().clone()
    }

    fn touches(action: &SubAction, services: &HashSet<ServiceId>) -> bool {
        match action {
            SubAction::RewriteRoutes { routes } => routes
                .values()
                .flatten()
                .any(|target| services.contains(target)),
            other => other.service().is_some_and(|s| services.contains(s)),
        }
    }
}

#[async_trait::async_trait]
impl PlasticityAdapter for SimulatedAdapter {
    async fn apply_mutation(
        &self,
        step: &StepId,
        action: &SubAction,
    ) -> Result<MutationHandle, AdapterError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.submitted.lock().push((step.clone(), action.clone()));

        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            return Err(AdapterError::Transient("simulated outage".into()));
        }
        if Self::touches(action, &self.rejected_services.lock()) {
            return Err(AdapterError::Permanent(format!("simulated rejection of {action}")));
        }

        let status = if Self::touches(action, &self.failing_services.lock()) {
            MutationStatus::Failed(format!("simulated failure of {action}"))
        } else {
            MutationStatus::Applied
        };
        let handle = MutationHandle::new(step.clone());
        self.mutations.insert(
            handle.id,
            Submitted {
                status,
                polls_remaining: self.pending_polls,
            },
        );
        Ok(handle)
    }

    async fn mutation_status(
        &self,
        handle: &MutationHandle,
    ) -> Result<MutationStatus, AdapterError> {
        let mut entry = self
            .mutations
            .get_mut(&handle.id)
            .ok_or_else(|| AdapterError::Permanent(format!("unknown mutation {handle}")))?;
        if entry.polls_remaining > 0 {
            entry.polls_remaining -= 1;
            return Ok(MutationStatus::Pending);
        }
        Ok(entry.status.clone())
    }

    async fn compensate(
        &self,
        step: &TransformationStep,
        _applied: &[AppliedSubAction],
    ) -> Result<CompensationOutcome, AdapterError> {
        self.compensated.lock().push(step.id.clone());
        if self.failing_compensations.lock().contains(&step.kind()) {
            return Ok(CompensationOutcome::Failed(format!(
                "simulated {} compensation failure",
                step.kind()
            )));
        }
        Ok(CompensationOutcome::Applied)
    }
}

/// Shape of the traffic a simulated service reports
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrafficProfile {
    Healthy { latency_ms: f64 },
    Erroring { error_rate: f64 },
    Slow { latency_ms: f64 },
    /// Reports no samples at all
    Silent,
}

/// Seeded synthetic telemetry
#[derive(Debug)]
pub struct SimulatedTelemetry {
    profiles: DashMap<ServiceId, TrafficProfile>,
    baselines: DashMap<ServiceId, f64>,
    default_profile: TrafficProfile,
    samples_per_window: usize,
    rng: Mutex<StdRng>,
}

impl SimulatedTelemetry {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            profiles: DashMap::new(),
            baselines: DashMap::new(),
            default_profile: TrafficProfile::Healthy { latency_ms: 100.0 },
            samples_per_window: 10,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    #[must_use]
    pub fn with_samples_per_window(mut self, samples: usize) -> Self {
        self.samples_per_window = samples;
        self
    }

    pub fn set_profile(&self, service: impl Into<ServiceId>, profile: TrafficProfile) {
        self.profiles.insert(service.into(), profile);
    }

    pub fn set_baseline(&self, service: impl Into<ServiceId>, latency_ms: f64) {
        self.baselines.insert(service.into(), latency_ms);
    }

    fn profile(&self, service: &ServiceId) -> TrafficProfile {
        self.profiles
            .get(service)
            .map_or(self.default_profile, |p| *p)
    }
}

impl Default for SimulatedTelemetry {
    fn default() -> Self {
        Self::new(42)
    }
}

#[async_trait::async_trait]
impl TelemetrySource for SimulatedTelemetry {
    async fn recent_metrics(
        &self,
        service: &ServiceId,
        _window: Duration,
    ) -> Result<Vec<MetricSample>, TelemetryError> {
        let profile = self.profile(service);
        let mut rng = self.rng.lock();
        let samples = (0..self.samples_per_window)
            .filter_map(|_| {
                let jitter: f64 = rng.gen_range(0.9..1.1);
                match profile {
                    TrafficProfile::Healthy { latency_ms }
                    | TrafficProfile::Slow { latency_ms } => {
                        Some(MetricSample::new(latency_ms * jitter, 100, 0))
                    }
                    TrafficProfile::Erroring { error_rate } => {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                        let errors = (error_rate * 100.0).round() as u64;
                        Some(MetricSample::new(100.0 * jitter, 100, errors.min(100)))
                    }
                    TrafficProfile::Silent => None,
                }
            })
            .collect();
        Ok(samples)
    }

    async fn baseline_latency(&self, service: &ServiceId) -> Result<Option<f64>, TelemetryError> {
        Ok(Some(self.baselines.get(service).map_or(100.0, |b| *b)))
    }
}

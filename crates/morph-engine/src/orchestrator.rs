//! Orchestrator facade
//!
//! Wires the stores, coordinator and executor together and exposes the
//! operations callers use. Each executing plan runs as its own task with its
//! own cancellation token.

use crate::adapter::PlasticityAdapter;
use crate::api::{AbortOutcome, AbortResponse, ExecuteResponse, StatusReport};
use crate::coordinator::StepCoordinator;
use crate::executor::PlanExecutor;
use crate::health::HealthVerifier;
use crate::recommendation::Recommendation;
use crate::telemetry::TelemetrySource;
use dashmap::DashMap;
use morph_core::audit::AuditLog;
use morph_core::config::OrchestratorConfig;
use morph_core::error::OrchestratorError;
use morph_core::plan_store::PlanStore;
use morph_core::topology::TopologyStore;
use morph_core::types::{
    PlanId, PlanSpec, PlanStatus, PlanSummary, TopologySnapshot, TransformationPlan,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Entry point for creating, executing and observing plans
#[derive(Debug)]
pub struct Orchestrator {
    topology: Arc<TopologyStore>,
    plans: Arc<PlanStore>,
    executor: Arc<PlanExecutor>,
    config: Arc<OrchestratorConfig>,
    running: Arc<DashMap<PlanId, CancellationToken>>,
}

impl Orchestrator {
    /// Build an orchestrator over `initial`
    ///
    /// # Errors
    /// `Config` when `config` fails validation.
    pub fn new(
        config: OrchestratorConfig,
        initial: TopologySnapshot,
        adapter: Arc<dyn PlasticityAdapter>,
        telemetry: Arc<dyn TelemetrySource>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let config = Arc::new(config);
        let topology = Arc::new(TopologyStore::new(initial, config.history_limit));
        let plans = Arc::new(PlanStore::new());
        let verifier = HealthVerifier::new(telemetry, config.health.clone());
        let coordinator = Arc::new(StepCoordinator::new(
            adapter,
            verifier,
            Arc::clone(&topology),
            Arc::clone(&plans),
            Arc::clone(&config),
        ));
        let executor = Arc::new(PlanExecutor::new(
            coordinator,
            Arc::clone(&plans),
            Arc::clone(&config),
        ));

        info!(version = topology.version(), "orchestrator ready");
        Ok(Self {
            topology,
            plans,
            executor,
            config,
            running: Arc::new(DashMap::new()),
        })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate and persist a plan; it comes back `Ready`
    ///
    /// # Errors
    /// `Validation` when the spec is rejected.
    pub fn create_plan(&self, spec: PlanSpec) -> Result<PlanSummary, OrchestratorError> {
        let snapshot = self.topology.current();
        self.plans.create_plan(spec, &snapshot)
    }

    /// Ingest a recommendation as a new plan
    ///
    /// # Errors
    /// `Validation` for unsupported recommendations or invalid resulting plans.
    pub fn create_plan_from_recommendation(
        &self,
        recommendation: &Recommendation,
    ) -> Result<PlanSummary, OrchestratorError> {
        let snapshot = self.topology.current();
        let spec = recommendation.to_plan_spec(&snapshot)?;
        self.plans.create_plan(spec, &snapshot)
    }

    /// Plan detail including steps and history
    ///
    /// # Errors
    /// `NotFound`.
    pub fn get_plan(&self, id: PlanId) -> Result<TransformationPlan, OrchestratorError> {
        self.plans.get(id).ok_or(OrchestratorError::NotFound(id))
    }

    #[must_use]
    pub fn list_plans(&self) -> Vec<PlanSummary> {
        self.plans.list()
    }

    /// Start executing a `Ready` plan in the background
    ///
    /// # Errors
    /// `Conflict` when a target service is held by another executing plan,
    /// `StateMachine` when the plan is not `Ready`, `NotFound`.
    pub fn execute_plan(&self, id: PlanId) -> Result<ExecuteResponse, OrchestratorError> {
        let newly_locked = self.plans.acquire_execution_lock(id)?;

        let token = CancellationToken::new();
        if newly_locked {
            self.running.insert(id, token.clone());
        }
        if let Err(e) = self.plans.record_transition(id, PlanStatus::Executing, None) {
            if newly_locked {
                self.running.remove(&id);
                self.plans.release_execution_lock(id);
            }
            return Err(e);
        }

        let executor = Arc::clone(&self.executor);
        let plans = Arc::clone(&self.plans);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            match executor.execute(id, token).await {
                Ok(status) => debug!(plan_id = %id, %status, "plan task finished"),
                Err(e) => error!(plan_id = %id, error = %e, "plan execution stopped on bookkeeping error"),
            }
            plans.release_execution_lock(id);
            running.remove(&id);
        });

        Ok(ExecuteResponse {
            id,
            accepted: true,
            status: PlanStatus::Executing,
        })
    }

    /// Request cancellation of an executing plan
    ///
    /// # Errors
    /// `NotFound`.
    pub fn abort_plan(&self, id: PlanId) -> Result<AbortResponse, OrchestratorError> {
        let status = self
            .plans
            .status(id)
            .ok_or(OrchestratorError::NotFound(id))?;
        let outcome = match status {
            s if s.is_terminal() => AbortOutcome::AlreadyTerminal,
            PlanStatus::Draft | PlanStatus::Ready => AbortOutcome::NotExecuting,
            PlanStatus::Failed => AbortOutcome::RollingBack,
            _ => {
                if let Some(token) = self.running.get(&id) {
                    token.cancel();
                }
                info!(plan_id = %id, "abort requested");
                AbortOutcome::Accepted
            }
        };
        Ok(AbortResponse {
            id,
            outcome,
            status,
        })
    }

    /// Resolve once the plan reaches a terminal status
    ///
    /// # Errors
    /// `NotFound`.
    pub async fn wait_for_plan(&self, id: PlanId) -> Result<TransformationPlan, OrchestratorError> {
        let mut rx = self
            .plans
            .subscribe(id)
            .ok_or(OrchestratorError::NotFound(id))?;
        rx.wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| OrchestratorError::NotFound(id))?;
        self.get_plan(id)
    }

    #[must_use]
    pub fn status(&self) -> StatusReport {
        let plans = self.plans.status_counts();
        StatusReport {
            topology_version: self.topology.version(),
            executing: plans.get(&PlanStatus::Executing).copied().unwrap_or(0),
            plans,
            audit_events: self.plans.audit().len(),
        }
    }

    /// Current topology snapshot
    #[must_use]
    pub fn topology(&self) -> Arc<TopologySnapshot> {
        self.topology.current()
    }

    /// Up to `limit` most recent snapshots, oldest first
    #[must_use]
    pub fn topology_history(&self, limit: usize) -> Vec<Arc<TopologySnapshot>> {
        self.topology.history(limit)
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        self.plans.audit()
    }

    #[must_use]
    pub fn plan_store(&self) -> &Arc<PlanStore> {
        &self.plans
    }

    #[must_use]
    pub fn topology_store(&self) -> &Arc<TopologyStore> {
        &self.topology
    }
}

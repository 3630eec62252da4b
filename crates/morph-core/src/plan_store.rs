//! Plan persistence and per-service execution locks
//!
//! Plans live in a concurrent map keyed by id. The lock table maps each
//! service to the executing plan that holds it and is only ever touched
//! under a short synchronous mutex; nothing in this module awaits.

use crate::audit::AuditLog;
use crate::error::{OrchestratorError, StateMachineError};
use crate::saga::{AppliedSubAction, SubAction};
use crate::state_machine::{validate_plan_transition, validate_step_transition};
use crate::types::{
    PlanId, PlanMetrics, PlanSpec, PlanStatus, PlanSummary, PlanTransition, ServiceId, StepId,
    StepStatus, StepTransition, TopologySnapshot, TransformationPlan, TransformationStep,
};
use crate::validation::validate_plan_spec;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::watch;
use tracing::{debug, info};

/// Plan definitions, execution history and the service lock table
#[derive(Debug, Default)]
pub struct PlanStore {
    plans: DashMap<PlanId, TransformationPlan>,
    watchers: DashMap<PlanId, watch::Sender<PlanStatus>>,
    locks: Mutex<HashMap<ServiceId, PlanId>>,
    audit: AuditLog,
}

impl PlanStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `spec` against `topology` and persist it
    ///
    /// The plan is stored as `Draft` and immediately promoted to `Ready`.
    ///
    /// # Errors
    /// `Validation` when the spec is rejected; nothing is stored in that case.
    pub fn create_plan(
        &self,
        spec: PlanSpec,
        topology: &TopologySnapshot,
    ) -> Result<PlanSummary, OrchestratorError> {
        validate_plan_spec(&spec, topology)?;

        let now = Utc::now();
        let id = PlanId::new();
        let plan = TransformationPlan {
            id,
            name: spec.name,
            description: spec.description,
            status: PlanStatus::Draft,
            steps: spec
                .steps
                .into_iter()
                .map(TransformationStep::from_spec)
                .collect(),
            created_at: now,
            updated_at: now,
            source_recommendation: spec.source_recommendation,
            base_topology_version: topology.version,
            history: vec![PlanTransition {
                from: None,
                to: PlanStatus::Draft,
                at: now,
                reason: Some("created".into()),
            }],
            step_history: Vec::new(),
            metrics: None,
            error: None,
        };

        let steps = plan.steps.len();
        self.plans.insert(id, plan);
        self.watchers.insert(id, watch::channel(PlanStatus::Draft).0);
        self.audit.append(id, None, "plan", "created as Draft");
        info!(plan_id = %id, steps, "plan created");

        self.record_transition(id, PlanStatus::Ready, Some("validated".into()))?;
        self.get(id)
            .map(|p| p.summary())
            .ok_or(OrchestratorError::NotFound(id))
    }

    /// Full plan detail
    #[must_use]
    pub fn get(&self, id: PlanId) -> Option<TransformationPlan> {
        self.plans.get(&id).map(|p| p.clone())
    }

    /// Current plan status
    #[must_use]
    pub fn status(&self, id: PlanId) -> Option<PlanStatus> {
        self.plans.get(&id).map(|p| p.status)
    }

    /// All plans, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<PlanSummary> {
        let mut plans: Vec<PlanSummary> = self.plans.iter().map(|p| p.summary()).collect();
        plans.sort_by_key(|p| p.id);
        plans
    }

    /// Number of plans in each status
    #[must_use]
    pub fn status_counts(&self) -> BTreeMap<PlanStatus, usize> {
        let mut counts: BTreeMap<PlanStatus, usize> =
            PlanStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for plan in &self.plans {
            *counts.entry(plan.status).or_default() += 1;
        }
        counts
    }

    /// Subscribe to status changes of one plan
    #[must_use]
    pub fn subscribe(&self, id: PlanId) -> Option<watch::Receiver<PlanStatus>> {
        self.watchers.get(&id).map(|tx| tx.subscribe())
    }

    /// Grant `id` exclusive rights over every service its steps target
    ///
    /// Returns `true` when the locks were newly taken and `false` when the
    /// plan already held all of them.
    ///
    /// # Errors
    /// `Conflict` naming the first service held by another plan; no lock is
    /// taken in that case.
    pub fn acquire_execution_lock(&self, id: PlanId) -> Result<bool, OrchestratorError> {
        let targets = self
            .plans
            .get(&id)
            .map(|p| p.target_services())
            .ok_or(OrchestratorError::NotFound(id))?;

        let mut locks = self.locks.lock();
        let mut newly = false;
        for service in &targets {
            match locks.get(service) {
                Some(holder) if *holder != id => {
                    return Err(OrchestratorError::Conflict {
                        service: service.clone(),
                        holder: *holder,
                    });
                }
                Some(_) => {}
                None => newly = true,
            }
        }
        for service in targets {
            locks.insert(service, id);
        }
        drop(locks);

        if newly {
            debug!(plan_id = %id, "execution lock acquired");
        }
        Ok(newly)
    }

    /// Drop every lock held by `id`; always succeeds
    pub fn release_execution_lock(&self, id: PlanId) {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, holder| *holder != id);
        let released = before - locks.len();
        drop(locks);
        if released > 0 {
            debug!(plan_id = %id, released, "execution lock released");
        }
    }

    /// Plan currently holding `service`
    #[must_use]
    pub fn lock_holder(&self, service: &ServiceId) -> Option<PlanId> {
        self.locks.lock().get(service).copied()
    }

    /// Move a plan to `to`, validated against the plan state machine
    ///
    /// # Errors
    /// `NotFound` for unknown plans, `StateMachine` for illegal transitions
    /// (the plan is left unchanged).
    pub fn record_transition(
        &self,
        id: PlanId,
        to: PlanStatus,
        reason: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let from = {
            let mut plan = self.plans.get_mut(&id).ok_or(OrchestratorError::NotFound(id))?;
            let from = plan.status;
            validate_plan_transition(from, to)?;
            let now = Utc::now();
            plan.status = to;
            plan.updated_at = now;
            plan.history.push(PlanTransition {
                from: Some(from),
                to,
                at: now,
                reason: reason.clone(),
            });
            from
        };

        let detail = match &reason {
            Some(reason) => format!("{from} -> {to}: {reason}"),
            None => format!("{from} -> {to}"),
        };
        self.audit.append(id, None, "plan", detail);
        if let Some(tx) = self.watchers.get(&id) {
            tx.send_replace(to);
        }
        info!(plan_id = %id, %from, %to, "plan transition");
        Ok(())
    }

    /// Move one step to `to`, validated against the step state machine
    ///
    /// # Errors
    /// `NotFound`, `StateMachine` for unknown steps or illegal transitions.
    pub fn record_step_transition(
        &self,
        id: PlanId,
        step_id: &StepId,
        to: StepStatus,
        detail: Option<String>,
    ) -> Result<(), OrchestratorError> {
        let from = {
            let mut plan = self.plans.get_mut(&id).ok_or(OrchestratorError::NotFound(id))?;
            let now = Utc::now();
            let step = plan
                .steps
                .iter_mut()
                .find(|s| &s.id == step_id)
                .ok_or_else(|| StateMachineError::UnknownStep(step_id.clone()))?;
            let from = step.status;
            validate_step_transition(step_id, from, to)?;
            step.status = to;
            match to {
                StepStatus::Running if step.started_at.is_none() => step.started_at = Some(now),
                StepStatus::Committed | StepStatus::Compensated => step.completed_at = Some(now),
                StepStatus::Failed => {
                    step.completed_at = Some(now);
                    step.error.clone_from(&detail);
                }
                _ => {}
            }
            plan.updated_at = now;
            plan.step_history.push(StepTransition {
                step: step_id.clone(),
                from,
                to,
                at: now,
                detail: detail.clone(),
            });
            from
        };

        let result = match &detail {
            Some(detail) => format!("{from} -> {to}: {detail}"),
            None => format!("{from} -> {to}"),
        };
        self.audit.append(id, Some(step_id.clone()), "step", result);
        debug!(plan_id = %id, step = %step_id, %from, %to, "step transition");
        Ok(())
    }

    /// Append a committed sub-action to a step's saga log
    ///
    /// # Errors
    /// `NotFound` or `UnknownStep`.
    pub fn record_applied(
        &self,
        id: PlanId,
        step_id: &StepId,
        applied: AppliedSubAction,
    ) -> Result<(), OrchestratorError> {
        let summary = applied.action.to_string();
        let version = applied.topology_version;
        self.with_step(id, step_id, |step| step.applied.push(applied))?;
        self.audit.append(
            id,
            Some(step_id.clone()),
            "apply",
            format!("{summary} @ v{version}"),
        );
        Ok(())
    }

    /// Remember a mutation that may or may not have been applied
    ///
    /// # Errors
    /// `NotFound` or `UnknownStep`.
    pub fn record_unsettled(
        &self,
        id: PlanId,
        step_id: &StepId,
        action: SubAction,
    ) -> Result<(), OrchestratorError> {
        let summary = action.to_string();
        self.with_step(id, step_id, |step| step.unsettled.push(action))?;
        self.audit.append(id, Some(step_id.clone()), "unsettled", summary);
        Ok(())
    }

    /// Count one forward attempt against the adapter
    ///
    /// # Errors
    /// `NotFound` or `UnknownStep`.
    pub fn record_attempt(&self, id: PlanId, step_id: &StepId) -> Result<u32, OrchestratorError> {
        self.with_step(id, step_id, |step| {
            step.attempts += 1;
            step.attempts
        })
    }

    /// Attach execution metrics
    pub fn set_metrics(&self, id: PlanId, metrics: PlanMetrics) {
        if let Some(mut plan) = self.plans.get_mut(&id) {
            plan.metrics = Some(metrics);
        }
    }

    /// Attach the error that stopped the plan
    pub fn set_error(&self, id: PlanId, error: impl Into<String>) {
        if let Some(mut plan) = self.plans.get_mut(&id) {
            plan.error = Some(error.into());
        }
    }

    /// Store-wide audit log
    #[inline]
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn with_step<T>(
        &self,
        id: PlanId,
        step_id: &StepId,
        f: impl FnOnce(&mut TransformationStep) -> T,
    ) -> Result<T, OrchestratorError> {
        let mut plan = self.plans.get_mut(&id).ok_or(OrchestratorError::NotFound(id))?;
        let step = plan
            .steps
            .iter_mut()
            .find(|s| &s.id == step_id)
            .ok_or_else(|| StateMachineError::UnknownStep(step_id.clone()))?;
        Ok(f(step))
    }
}

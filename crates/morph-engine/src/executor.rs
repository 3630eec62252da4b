//! Plan executor
//!
//! Drives one `Executing` plan to a terminal status. Steps are scheduled in
//! dependency order; a step starts only once every dependency is committed,
//! its target services are disjoint from every running step, and the
//! concurrency limit allows it. The first failure halts scheduling, cancels
//! in-flight siblings and compensates everything that was applied, newest
//! completion first.

use crate::coordinator::{millis, StepCoordinator};
use futures::FutureExt;
use morph_core::config::OrchestratorConfig;
use morph_core::dag::StepGraph;
use morph_core::error::OrchestratorError;
use morph_core::plan_store::PlanStore;
use morph_core::types::{
    PlanId, PlanMetrics, PlanStatus, ServiceId, StepId, StepStatus, TransformationPlan,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Drives plans through their state machine
#[derive(Debug)]
pub struct PlanExecutor {
    coordinator: Arc<StepCoordinator>,
    plans: Arc<PlanStore>,
    config: Arc<OrchestratorConfig>,
}

/// Bookkeeping for one execution
struct Run {
    pending: Vec<StepId>,
    running: HashMap<StepId, BTreeSet<ServiceId>>,
    committed: HashSet<StepId>,
    /// Every step that finished, in completion order
    finished: Vec<StepId>,
    failure: Option<String>,
}

impl Run {
    fn busy_services(&self) -> BTreeSet<&ServiceId> {
        self.running.values().flatten().collect()
    }
}

impl PlanExecutor {
    #[must_use]
    pub fn new(
        coordinator: Arc<StepCoordinator>,
        plans: Arc<PlanStore>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            coordinator,
            plans,
            config,
        }
    }

    /// Execute a plan already moved to `Executing`
    ///
    /// `abort` is observed at every suspension point of every running step.
    /// The plan's execution locks are released before its terminal status is
    /// published.
    ///
    /// # Errors
    /// Only bookkeeping errors (unknown plan, rejected status transition);
    /// step failures are handled by rolling back and show up in the returned
    /// status.
    pub async fn execute(
        &self,
        plan_id: PlanId,
        abort: CancellationToken,
    ) -> Result<PlanStatus, OrchestratorError> {
        let started = Instant::now();
        let plan = self
            .plans
            .get(plan_id)
            .ok_or(OrchestratorError::NotFound(plan_id))?;
        let graph = StepGraph::build(plan.steps.iter().map(|s| (&s.id, &s.depends_on)))?;
        info!(plan_id = %plan_id, name = %plan.name, steps = plan.steps.len(), "executing plan");

        let halt = abort.child_token();
        let mut run = Run {
            pending: graph.topological_order()?,
            running: HashMap::new(),
            committed: HashSet::new(),
            finished: Vec::new(),
            failure: None,
        };
        let mut tasks = JoinSet::new();

        loop {
            if run.failure.is_none() {
                if halt.is_cancelled() {
                    if !run.pending.is_empty() {
                        run.failure = Some("plan aborted".into());
                    }
                } else {
                    self.schedule_ready(plan_id, &plan, &mut run, &mut tasks, &halt);
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (step_id, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // step tasks catch their own panics; this is a runtime shutdown
                    error!(plan_id = %plan_id, error = %e, "step task lost");
                    run.failure.get_or_insert_with(|| format!("step task lost: {e}"));
                    halt.cancel();
                    continue;
                }
            };

            run.running.remove(&step_id);
            run.finished.push(step_id.clone());
            match outcome {
                Ok(()) => {
                    run.committed.insert(step_id);
                }
                Err(e) => {
                    warn!(plan_id = %plan_id, step = %step_id, error = %e, "step failed, halting plan");
                    run.failure.get_or_insert_with(|| e.to_string());
                    halt.cancel();
                }
            }
        }

        let (status, reason) = if run.failure.is_none() && run.committed.len() == plan.steps.len() {
            (PlanStatus::Completed, None)
        } else {
            let reason = run
                .failure
                .clone()
                .unwrap_or_else(|| "incomplete execution".into());
            self.plans.set_error(plan_id, reason.clone());
            self.plans
                .record_transition(plan_id, PlanStatus::Failed, Some(reason))?;
            self.roll_back(plan_id, &run.finished).await
        };

        self.record_metrics(plan_id, status, started);
        self.plans.release_execution_lock(plan_id);
        self.plans.record_transition(plan_id, status, reason)?;
        info!(plan_id = %plan_id, %status, "plan finished");
        Ok(status)
    }

    fn schedule_ready(
        &self,
        plan_id: PlanId,
        plan: &TransformationPlan,
        run: &mut Run,
        tasks: &mut JoinSet<(StepId, Result<(), OrchestratorError>)>,
        halt: &CancellationToken,
    ) {
        let limit = self.config.max_concurrent_steps.unwrap_or(usize::MAX);
        let mut index = 0;
        while index < run.pending.len() && run.running.len() < limit {
            let Some(step) = plan.step(&run.pending[index]) else {
                index += 1;
                continue;
            };
            let deps_met = step.depends_on.iter().all(|d| run.committed.contains(d));
            let busy = run.busy_services();
            let disjoint = step.target_services.iter().all(|s| !busy.contains(s));
            if !(deps_met && disjoint) {
                index += 1;
                continue;
            }

            let step = step.clone();
            run.pending.remove(index);
            run.running
                .insert(step.id.clone(), step.target_services.clone());

            let coordinator = Arc::clone(&self.coordinator);
            let step_cancel = halt.child_token();
            let timeout = self.config.step_timeout;
            tasks.spawn(async move {
                // the deadline cancels through the token so in-flight
                // mutations settle into the saga log
                let (finished, timed_out) = {
                    let forward = AssertUnwindSafe(coordinator.run(plan_id, &step, &step_cancel))
                        .catch_unwind();
                    tokio::pin!(forward);
                    tokio::select! {
                        res = &mut forward => (res, false),
                        () = tokio::time::sleep(timeout) => {
                            step_cancel.cancel();
                            (forward.await, true)
                        }
                    }
                };
                let outcome = match finished {
                    Ok(Err(OrchestratorError::Cancelled { .. })) if timed_out => {
                        Err(OrchestratorError::Timeout {
                            step: step.id.clone(),
                            after_ms: millis(timeout),
                        })
                    }
                    Ok(result) => result,
                    Err(_panic) => Err(OrchestratorError::Execution {
                        step: step.id.clone(),
                        message: "step panicked".into(),
                    }),
                };
                if let Err(e) = &outcome {
                    coordinator.mark_failed(plan_id, &step.id, e);
                }
                (step.id, outcome)
            });
        }
    }

    /// Compensate finished steps in reverse completion order
    ///
    /// Returns the terminal status to record and its reason. The first failed
    /// compensation stops the rollback for good.
    async fn roll_back(
        &self,
        plan_id: PlanId,
        finished: &[StepId],
    ) -> (PlanStatus, Option<String>) {
        info!(plan_id = %plan_id, steps = finished.len(), "rolling back plan");
        for step_id in finished.iter().rev() {
            if let Err(e) = self.coordinator.compensate(plan_id, step_id).await {
                error!(
                    plan_id = %plan_id,
                    step = %step_id,
                    error = %e,
                    severity = "critical",
                    "compensation failed, plan needs manual recovery"
                );
                metrics::counter!("morph_rollbacks_total", "outcome" => "failed").increment(1);
                self.plans.set_error(plan_id, e.to_string());
                return (PlanStatus::FailedNeedsManualRecovery, Some(e.to_string()));
            }
        }

        metrics::counter!("morph_rollbacks_total", "outcome" => "succeeded").increment(1);
        (
            PlanStatus::RolledBack,
            Some("all applied steps compensated".into()),
        )
    }

    fn record_metrics(&self, plan_id: PlanId, status: PlanStatus, started: Instant) {
        if let Some(plan) = self.plans.get(plan_id) {
            let summary = PlanMetrics {
                total_steps: plan.steps.len(),
                committed_steps: plan.count_steps(StepStatus::Committed),
                failed_steps: plan.count_steps(StepStatus::Failed),
                compensated_steps: plan.count_steps(StepStatus::Compensated),
                duration_ms: millis(started.elapsed()),
            };
            self.plans.set_metrics(plan_id, summary);
        }
        let outcome = match status {
            PlanStatus::Completed => "completed",
            PlanStatus::RolledBack => "rolled_back",
            _ => "manual_recovery",
        };
        metrics::counter!("morph_plans_total", "outcome" => outcome).increment(1);
    }
}

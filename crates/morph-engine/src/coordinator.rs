//! Step coordinator
//!
//! Executes one transformation step end to end. Each step kind expands into a
//! fixed sequence of phases; every `Apply` phase is resolved against a fresh
//! topology read, submitted to the adapter, polled to completion and then
//! committed to the topology store by compare-and-swap. Committed sub-actions
//! are appended to the step's saga log together with their inverses, which
//! is all compensation ever looks at.

use crate::adapter::{AdapterError, CompensationOutcome, MutationStatus, PlasticityAdapter};
use crate::health::{HealthError, HealthVerifier};
use chrono::Utc;
use morph_core::config::OrchestratorConfig;
use morph_core::error::{OrchestratorError, StateMachineError, TopologyError};
use morph_core::plan_store::PlanStore;
use morph_core::saga::{AppliedSubAction, SubAction};
use morph_core::topology::TopologyStore;
use morph_core::types::{
    PlanId, ResourceAllocation, RoutePattern, ServiceDescriptor, ServiceId, ServiceStatus,
    StepAction, StepId, StepStatus, TopologySnapshot, TransformationStep,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One stage of a forward action
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Apply(Edit),
    Verify(ServiceId),
}

/// Topology edit intent, turned into a concrete [`SubAction`] just before
/// it is submitted
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Register(ServiceDescriptor),
    RegisterMerged {
        sources: BTreeSet<ServiceId>,
        merged: ServiceId,
    },
    Drain(ServiceId),
    Allocate(ServiceId, ResourceAllocation),
    /// Point brand new routes at a service
    RouteNew {
        patterns: BTreeSet<RoutePattern>,
        to: ServiceId,
    },
    /// Move routes currently pointing at any of `from` over to `to`
    RouteAway {
        from: BTreeSet<ServiceId>,
        to: ServiceId,
        only: Option<BTreeSet<RoutePattern>>,
    },
    /// Distribute the routes of `source` across split targets
    RouteSplit {
        source: ServiceId,
        assignments: BTreeMap<RoutePattern, ServiceId>,
        default: ServiceId,
    },
    Deregister(ServiceId),
}

impl Edit {
    /// Concrete sub-action against `topology`, `None` if there is nothing to do
    ///
    /// # Errors
    /// `UnknownService` when a service the edit relies on is missing.
    pub fn resolve(&self, topology: &TopologySnapshot) -> Result<Option<SubAction>, TopologyError> {
        let action = match self {
            Edit::Register(descriptor) => SubAction::Register {
                descriptor: descriptor.clone(),
            },
            Edit::RegisterMerged { sources, merged } => SubAction::Register {
                descriptor: merged_descriptor(topology, sources, merged)?,
            },
            Edit::Drain(service) => SubAction::drain(service.clone()),
            Edit::Allocate(service, allocation) => SubAction::SetAllocation {
                service: service.clone(),
                allocation: *allocation,
            },
            Edit::RouteNew { patterns, to } => {
                claim(topology, patterns.iter(), &[to])?;
                SubAction::RewriteRoutes {
                    routes: patterns.iter().map(|p| (p.clone(), Some(to.clone()))).collect(),
                }
            }
            Edit::RouteAway { from, to, only } => {
                let routes: BTreeMap<_, _> = topology
                    .routing
                    .iter()
                    .filter(|(pattern, target)| {
                        from.contains(*target)
                            && only.as_ref().map_or(true, |o| o.contains(*pattern))
                    })
                    .map(|(pattern, _)| (pattern.clone(), Some(to.clone())))
                    .collect();
                if routes.is_empty() {
                    return Ok(None);
                }
                SubAction::RewriteRoutes { routes }
            }
            Edit::RouteSplit {
                source,
                assignments,
                default,
            } => {
                let mut routes: BTreeMap<RoutePattern, Option<ServiceId>> = topology
                    .routes_to(source)
                    .into_keys()
                    .map(|pattern| {
                        let target = assignments.get(&pattern).unwrap_or(default).clone();
                        (pattern, Some(target))
                    })
                    .collect();
                for (pattern, target) in assignments {
                    claim(topology, [pattern], &[source, target])?;
                    routes.insert(pattern.clone(), Some(target.clone()));
                }
                if routes.is_empty() {
                    return Ok(None);
                }
                SubAction::RewriteRoutes { routes }
            }
            Edit::Deregister(service) => SubAction::Deregister {
                service: service.clone(),
            },
        };
        Ok(Some(action))
    }
}

/// Fail if any of `patterns` is routed to a service outside `allowed`
fn claim<'a>(
    topology: &TopologySnapshot,
    patterns: impl IntoIterator<Item = &'a RoutePattern>,
    allowed: &[&ServiceId],
) -> Result<(), TopologyError> {
    for pattern in patterns {
        if let Some(owner) = topology.routing.get(pattern) {
            if !allowed.contains(&owner) {
                return Err(TopologyError::RouteTaken {
                    route: pattern.clone(),
                    owner: owner.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Union of the sources' capabilities and dependencies, summed allocation
fn merged_descriptor(
    topology: &TopologySnapshot,
    sources: &BTreeSet<ServiceId>,
    merged: &ServiceId,
) -> Result<ServiceDescriptor, TopologyError> {
    let mut descriptor = ServiceDescriptor::new(merged.clone());
    for source in sources {
        let existing = topology
            .service(source)
            .ok_or_else(|| TopologyError::UnknownService(source.clone()))?;
        descriptor
            .capabilities
            .extend(existing.capabilities.iter().cloned());
        descriptor
            .dependencies
            .extend(existing.dependencies.iter().cloned());
        descriptor.resource_allocation = descriptor
            .resource_allocation
            .combined(existing.resource_allocation);
    }
    descriptor
        .dependencies
        .retain(|d| !sources.contains(d) && d != merged);
    descriptor.status = ServiceStatus::Active;
    Ok(descriptor)
}

/// Forward phases for each step kind
///
/// Traffic only moves to a service after it verified healthy, and an old
/// service is only deregistered after its replacement verified healthy while
/// serving the moved routes.
#[must_use]
pub fn forward_phases(action: &StepAction) -> Vec<Phase> {
    match action {
        StepAction::Create {
            service,
            capabilities,
            resource_allocation,
            dependencies,
            routes,
        } => {
            let mut descriptor = ServiceDescriptor::new(service.clone())
                .with_allocation(*resource_allocation);
            descriptor.capabilities.clone_from(capabilities);
            descriptor.dependencies.clone_from(dependencies);
            let mut phases = vec![
                Phase::Apply(Edit::Register(descriptor)),
                Phase::Verify(service.clone()),
            ];
            if !routes.is_empty() {
                phases.push(Phase::Apply(Edit::RouteNew {
                    patterns: routes.clone(),
                    to: service.clone(),
                }));
                phases.push(Phase::Verify(service.clone()));
            }
            phases
        }
        StepAction::Retire { service } => vec![
            Phase::Apply(Edit::Drain(service.clone())),
            Phase::Apply(Edit::Deregister(service.clone())),
        ],
        StepAction::Scale {
            service,
            resource_allocation,
        } => vec![
            Phase::Apply(Edit::Allocate(service.clone(), *resource_allocation)),
            Phase::Verify(service.clone()),
        ],
        StepAction::Merge { sources, merged } => {
            let mut phases: Vec<Phase> = sources
                .iter()
                .map(|s| Phase::Apply(Edit::Drain(s.clone())))
                .collect();
            phases.extend([
                Phase::Apply(Edit::RegisterMerged {
                    sources: sources.clone(),
                    merged: merged.clone(),
                }),
                Phase::Verify(merged.clone()),
                Phase::Apply(Edit::RouteAway {
                    from: sources.clone(),
                    to: merged.clone(),
                    only: None,
                }),
                Phase::Verify(merged.clone()),
            ]);
            phases.extend(sources.iter().map(|s| Phase::Apply(Edit::Deregister(s.clone()))));
            phases
        }
        StepAction::Split {
            source,
            targets,
            route_assignments,
        } => {
            let mut phases = vec![Phase::Apply(Edit::Drain(source.clone()))];
            for target in targets {
                let mut descriptor = ServiceDescriptor::new(target.id.clone())
                    .with_allocation(target.resource_allocation);
                descriptor.capabilities.clone_from(&target.capabilities);
                phases.push(Phase::Apply(Edit::Register(descriptor)));
            }
            phases.extend(targets.iter().map(|t| Phase::Verify(t.id.clone())));
            if let Some(first) = targets.first() {
                phases.push(Phase::Apply(Edit::RouteSplit {
                    source: source.clone(),
                    assignments: route_assignments.clone(),
                    default: first.id.clone(),
                }));
            }
            phases.extend(targets.iter().map(|t| Phase::Verify(t.id.clone())));
            phases.push(Phase::Apply(Edit::Deregister(source.clone())));
            phases
        }
        StepAction::Reroute { from, to, patterns } => vec![
            Phase::Apply(Edit::RouteAway {
                from: BTreeSet::from([from.clone()]),
                to: to.clone(),
                only: patterns.clone(),
            }),
            Phase::Verify(to.clone()),
        ],
    }
}

/// Why a single submission attempt did not apply
enum Attempt {
    Transient(String),
    Rejected(String),
    /// Still in flight when the settle limit ran out
    Unsettled,
}

impl From<AdapterError> for Attempt {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Transient(msg) => Attempt::Transient(msg),
            AdapterError::Permanent(msg) => Attempt::Rejected(msg),
        }
    }
}

/// Drives single steps forward and compensates them
pub struct StepCoordinator {
    adapter: Arc<dyn PlasticityAdapter>,
    verifier: HealthVerifier,
    topology: Arc<TopologyStore>,
    plans: Arc<PlanStore>,
    config: Arc<OrchestratorConfig>,
}

impl std::fmt::Debug for StepCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepCoordinator")
            .field("verifier", &self.verifier)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StepCoordinator {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn PlasticityAdapter>,
        verifier: HealthVerifier,
        topology: Arc<TopologyStore>,
        plans: Arc<PlanStore>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            adapter,
            verifier,
            topology,
            plans,
            config,
        }
    }

    /// Run `step` forward until it is committed
    ///
    /// On error the step is left `Running` or `Verifying`; the caller marks it
    /// failed (see [`mark_failed`](Self::mark_failed)), since a panicking run
    /// never gets to do so itself.
    ///
    /// # Errors
    /// `Execution` after exhausted retries or an adapter-reported failure,
    /// `HealthCheck` on any non-healthy verdict, `Cancelled`/`Timeout` from the
    /// verification wait, `Topology` when a commit cannot be applied.
    pub async fn run(
        &self,
        plan_id: PlanId,
        step: &TransformationStep,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled {
                step: step.id.clone(),
            });
        }
        self.plans
            .record_step_transition(plan_id, &step.id, StepStatus::Running, None)?;
        info!(plan_id = %plan_id, step = %step.id, kind = %step.kind(), "step started");

        let mut status = StepStatus::Running;
        for phase in forward_phases(&step.action) {
            match phase {
                Phase::Apply(edit) => {
                    if status == StepStatus::Verifying {
                        self.plans
                            .record_step_transition(plan_id, &step.id, StepStatus::Running, None)?;
                        status = StepStatus::Running;
                    }
                    self.apply_edit(plan_id, &step.id, &edit, cancel).await?;
                }
                Phase::Verify(service) => {
                    if status == StepStatus::Running {
                        self.plans.record_step_transition(
                            plan_id,
                            &step.id,
                            StepStatus::Verifying,
                            Some(format!("verifying {service}")),
                        )?;
                        status = StepStatus::Verifying;
                    }
                    self.verify(&step.id, &service, cancel).await?;
                }
            }
        }

        self.plans
            .record_step_transition(plan_id, &step.id, StepStatus::Committed, None)?;
        info!(plan_id = %plan_id, step = %step.id, "step committed");
        Ok(())
    }

    /// Record `Failed` for a step that was left in flight
    pub fn mark_failed(&self, plan_id: PlanId, step_id: &StepId, error: &OrchestratorError) {
        let active = self
            .plans
            .get(plan_id)
            .and_then(|p| p.step(step_id).map(|s| s.status.is_active()))
            .unwrap_or(false);
        if !active {
            return;
        }
        if let Err(e) = self.plans.record_step_transition(
            plan_id,
            step_id,
            StepStatus::Failed,
            Some(error.to_string()),
        ) {
            warn!(plan_id = %plan_id, step = %step_id, error = %e, "could not mark step failed");
        }
    }

    async fn verify(
        &self,
        step_id: &StepId,
        service: &ServiceId,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let verdict = self
            .verifier
            .verify(service, cancel)
            .await
            .map_err(|e| match e {
                HealthError::Cancelled => OrchestratorError::Cancelled {
                    step: step_id.clone(),
                },
                HealthError::Timeout(after) => OrchestratorError::Timeout {
                    step: step_id.clone(),
                    after_ms: millis(after),
                },
            })?;
        match verdict.failure_reason() {
            None => Ok(()),
            Some(reason) => Err(OrchestratorError::HealthCheck {
                step: step_id.clone(),
                service: service.clone(),
                reason,
            }),
        }
    }

    async fn apply_edit(
        &self,
        plan_id: PlanId,
        step_id: &StepId,
        edit: &Edit,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled {
                    step: step_id.clone(),
                });
            }
            let Some(action) = edit.resolve(&self.topology.current())? else {
                debug!(step = %step_id, ?edit, "nothing to apply");
                return Ok(());
            };
            self.plans.record_attempt(plan_id, step_id)?;

            match self.submit(step_id, &action, cancel).await {
                Ok(()) => return self.commit(plan_id, step_id, action),
                Err(Attempt::Transient(message)) if attempt < retry.max_attempts => {
                    let delay = retry.backoff_for(attempt);
                    warn!(step = %step_id, %action, attempt, ?delay, %message, "transient adapter error, retrying");
                    metrics::counter!("morph_step_retries_total").increment(1);
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return Err(OrchestratorError::Cancelled { step: step_id.clone() });
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(Attempt::Transient(message) | Attempt::Rejected(message)) => {
                    return Err(OrchestratorError::Execution {
                        step: step_id.clone(),
                        message: format!("{action}: {message}"),
                    });
                }
                Err(Attempt::Unsettled) => {
                    let message = format!(
                        "{action}: outcome unknown after {}ms",
                        millis(self.config.settle_timeout)
                    );
                    error!(plan_id = %plan_id, step = %step_id, %action, "mutation never settled");
                    self.plans.record_unsettled(plan_id, step_id, action)?;
                    return Err(OrchestratorError::Execution {
                        step: step_id.clone(),
                        message,
                    });
                }
            }
        }
    }

    /// Submit `action` and poll it to a final status
    ///
    /// Once submitted, a mutation is never abandoned: cancellation only
    /// bounds the remaining wait by `settle_timeout`. An applied mutation is
    /// committed even when the step was cancelled meanwhile, so compensation
    /// sees it.
    async fn submit(
        &self,
        step_id: &StepId,
        action: &SubAction,
        cancel: &CancellationToken,
    ) -> Result<(), Attempt> {
        let landing = self.land(step_id, action);
        tokio::pin!(landing);
        tokio::select! {
            biased;
            res = &mut landing => res,
            () = cancel.cancelled() => {
                debug!(step = %step_id, %action, "cancelled with a mutation in flight, letting it settle");
                tokio::time::timeout(self.config.settle_timeout, landing)
                    .await
                    .unwrap_or(Err(Attempt::Unsettled))
            }
        }
    }

    async fn land(&self, step_id: &StepId, action: &SubAction) -> Result<(), Attempt> {
        let handle = self.adapter.apply_mutation(step_id, action).await?;
        debug!(%handle, %action, "mutation submitted");
        loop {
            match self.adapter.mutation_status(&handle).await? {
                MutationStatus::Applied => return Ok(()),
                MutationStatus::Failed(reason) => return Err(Attempt::Rejected(reason)),
                MutationStatus::Pending => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    /// Publish `action` and append it to the saga log, with no await between
    fn commit(
        &self,
        plan_id: PlanId,
        step_id: &StepId,
        action: SubAction,
    ) -> Result<(), OrchestratorError> {
        let (published, inverse) = self.topology.update(self.config.cas_retry_limit, |candidate| {
            action.apply(candidate).map_err(OrchestratorError::from)
        })?;
        debug!(step = %step_id, %action, version = published.version, "sub-action committed");
        self.plans.record_applied(
            plan_id,
            step_id,
            AppliedSubAction {
                action,
                inverse,
                topology_version: published.version,
                applied_at: Utc::now(),
            },
        )
    }

    /// Undo every sub-action the step applied
    ///
    /// A step that is already compensated, or failed before applying
    /// anything, is left alone.
    ///
    /// # Errors
    /// `Rollback` when the step has a mutation of unknown outcome, the adapter
    /// reports failure, or an inverse cannot be applied to the current
    /// topology.
    pub async fn compensate(
        &self,
        plan_id: PlanId,
        step_id: &StepId,
    ) -> Result<(), OrchestratorError> {
        let step = self
            .plans
            .get(plan_id)
            .ok_or(OrchestratorError::NotFound(plan_id))?
            .step(step_id)
            .cloned()
            .ok_or_else(|| StateMachineError::UnknownStep(step_id.clone()))?;

        if step.status == StepStatus::Compensated {
            return Ok(());
        }
        if let Some(unknown) = step.unsettled.first() {
            return Err(OrchestratorError::Rollback {
                step: step_id.clone(),
                message: format!("outcome of {unknown} is unknown, cannot compensate exactly"),
            });
        }
        if step.applied.is_empty() {
            if step.status == StepStatus::Committed {
                self.plans.record_step_transition(
                    plan_id,
                    step_id,
                    StepStatus::Compensated,
                    Some("nothing to undo".into()),
                )?;
            }
            return Ok(());
        }

        let rollback = |message: String| OrchestratorError::Rollback {
            step: step_id.clone(),
            message,
        };

        match self.request_compensation(&step).await {
            Ok(CompensationOutcome::Applied) => {}
            Ok(CompensationOutcome::Failed(reason)) => return Err(rollback(reason)),
            Err(e) => return Err(rollback(e.to_string())),
        }

        for applied in step.applied.iter().rev() {
            self.topology
                .update(self.config.cas_retry_limit, |candidate| {
                    applied.inverse.apply(candidate).map_err(OrchestratorError::from)
                })
                .map_err(|e| rollback(format!("{}: {e}", applied.inverse)))?;
            debug!(step = %step_id, inverse = %applied.inverse, "sub-action undone");
        }

        self.plans.record_step_transition(
            plan_id,
            step_id,
            StepStatus::Compensated,
            Some(format!("{} sub-actions undone", step.applied.len())),
        )?;
        info!(plan_id = %plan_id, step = %step_id, "step compensated");
        Ok(())
    }

    async fn request_compensation(
        &self,
        step: &TransformationStep,
    ) -> Result<CompensationOutcome, AdapterError> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.adapter.compensate(step, &step.applied).await {
                Err(AdapterError::Transient(message)) if attempt < retry.max_attempts => {
                    let delay = retry.backoff_for(attempt);
                    warn!(step = %step.id, attempt, ?delay, %message, "transient compensation error, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_core::types::SplitTarget;

    fn topology() -> TopologySnapshot {
        TopologySnapshot::empty()
            .with_service(
                ServiceDescriptor::new("a")
                    .with_capabilities(["read"])
                    .with_allocation(ResourceAllocation::new(1.0, 1.0))
                    .with_dependencies(["b", "db"]),
            )
            .with_service(
                ServiceDescriptor::new("b")
                    .with_capabilities(["write"])
                    .with_allocation(ResourceAllocation::new(2.0, 3.0)),
            )
            .with_service(ServiceDescriptor::new("db"))
            .with_route("/a", "a")
            .with_route("/b", "b")
            .with_route("/b/admin", "b")
    }

    #[test]
    fn merged_descriptor_combines_sources() {
        let sources = BTreeSet::from(["a".into(), "b".into()]);
        let merged = merged_descriptor(&topology(), &sources, &"ab".into()).unwrap();
        assert_eq!(merged.capabilities.len(), 2);
        assert_eq!(merged.resource_allocation, ResourceAllocation::new(3.0, 4.0));
        assert_eq!(merged.dependencies, BTreeSet::from(["db".into()]));
    }

    #[test]
    fn merge_never_retires_before_cutover_verified() {
        let phases = forward_phases(&StepAction::Merge {
            sources: BTreeSet::from(["a".into(), "b".into()]),
            merged: "ab".into(),
        });
        let cutover = phases
            .iter()
            .position(|p| matches!(p, Phase::Apply(Edit::RouteAway { .. })))
            .unwrap();
        let first_deregister = phases
            .iter()
            .position(|p| matches!(p, Phase::Apply(Edit::Deregister(_))))
            .unwrap();
        assert!(matches!(phases[cutover - 1], Phase::Verify(_)));
        assert!(matches!(phases[cutover + 1], Phase::Verify(_)));
        assert!(cutover + 1 < first_deregister);
    }

    #[test]
    fn split_routes_default_to_first_target() {
        let edit = Edit::RouteSplit {
            source: "b".into(),
            assignments: BTreeMap::from([("/b/admin".into(), "b2".into())]),
            default: "b1".into(),
        };
        let Some(SubAction::RewriteRoutes { routes }) = edit.resolve(&topology()).unwrap() else {
            panic!("expected a route rewrite");
        };
        assert_eq!(routes[&"/b".into()], Some("b1".into()));
        assert_eq!(routes[&"/b/admin".into()], Some("b2".into()));
    }

    #[test]
    fn new_routes_never_overwrite_another_owner() {
        let edit = Edit::RouteNew {
            patterns: BTreeSet::from(["/fresh".into(), "/a".into()]),
            to: "c".into(),
        };
        assert_eq!(
            edit.resolve(&topology()),
            Err(TopologyError::RouteTaken {
                route: "/a".into(),
                owner: "a".into(),
            })
        );
    }

    #[test]
    fn split_assignments_stay_within_source_routes() {
        let edit = Edit::RouteSplit {
            source: "b".into(),
            assignments: BTreeMap::from([("/a".into(), "b1".into())]),
            default: "b1".into(),
        };
        assert!(matches!(
            edit.resolve(&topology()),
            Err(TopologyError::RouteTaken { owner, .. }) if owner == ServiceId::new("a")
        ));
    }

    #[test]
    fn reroute_without_matching_routes_is_noop() {
        let edit = Edit::RouteAway {
            from: BTreeSet::from(["db".into()]),
            to: "a".into(),
            only: None,
        };
        assert_eq!(edit.resolve(&topology()).unwrap(), None);
    }

    #[test]
    fn reroute_respects_pattern_filter() {
        let edit = Edit::RouteAway {
            from: BTreeSet::from(["b".into()]),
            to: "a".into(),
            only: Some(BTreeSet::from(["/b/admin".into()])),
        };
        let Some(SubAction::RewriteRoutes { routes }) = edit.resolve(&topology()).unwrap() else {
            panic!("expected a route rewrite");
        };
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn split_phases_register_every_target() {
        let targets = vec![
            SplitTarget {
                id: "b1".into(),
                capabilities: BTreeSet::from(["write".to_string()]),
                resource_allocation: ResourceAllocation::new(1.0, 1.0),
            },
            SplitTarget {
                id: "b2".into(),
                capabilities: BTreeSet::new(),
                resource_allocation: ResourceAllocation::new(1.0, 1.0),
            },
        ];
        let phases = forward_phases(&StepAction::Split {
            source: "b".into(),
            targets,
            route_assignments: BTreeMap::new(),
        });
        let registers = phases
            .iter()
            .filter(|p| matches!(p, Phase::Apply(Edit::Register(_))))
            .count();
        assert_eq!(registers, 2);
        assert!(matches!(phases.last(), Some(Phase::Apply(Edit::Deregister(_)))));
    }
}

//! Plan creation checks
//!
//! Everything here runs before a plan is persisted; a rejected spec leaves
//! no trace in the plan store.

use crate::dag::StepGraph;
use crate::error::ValidationError;
use crate::types::{PlanSpec, ServiceId, StepId, TopologySnapshot};
use std::collections::{BTreeSet, HashMap};

/// Validate `spec` against the current topology
///
/// # Errors
/// The first problem found, in this order: empty plan, malformed step
/// parameters, graph errors (duplicates, unknown or self dependencies,
/// cycles), producer collisions, routes owned by services outside the
/// step's targets, then service references.
pub fn validate_plan_spec(
    spec: &PlanSpec,
    topology: &TopologySnapshot,
) -> Result<(), ValidationError> {
    if spec.steps.is_empty() {
        return Err(ValidationError::EmptyPlan);
    }

    for step in &spec.steps {
        step.action
            .check_shape()
            .map_err(|reason| ValidationError::InvalidAction {
                step: step.id.clone(),
                reason,
            })?;
    }

    let graph = StepGraph::build(spec.steps.iter().map(|s| (&s.id, &s.depends_on)))?;

    let mut producers: HashMap<ServiceId, StepId> = HashMap::new();
    for step in &spec.steps {
        for service in step.action.produced_services() {
            if topology.contains(&service) {
                return Err(ValidationError::ServiceAlreadyExists {
                    step: step.id.clone(),
                    service,
                });
            }
            if producers.insert(service.clone(), step.id.clone()).is_some() {
                return Err(ValidationError::DuplicateProducer(service));
            }
        }
    }

    for step in &spec.steps {
        let targets = step.action.target_services();
        for route in step.action.claimed_routes() {
            if let Some(owner) = topology.routing.get(&route) {
                if !targets.contains(owner) {
                    return Err(ValidationError::RouteOwned {
                        step: step.id.clone(),
                        route,
                        owner: owner.clone(),
                    });
                }
            }
        }
    }

    for step in &spec.steps {
        let ancestors = ancestors(&graph, &step.id);
        for service in step.action.required_services() {
            if topology.contains(&service) {
                continue;
            }
            match producers.get(&service) {
                Some(producer) if ancestors.contains(producer) => {}
                Some(producer) => {
                    return Err(ValidationError::InvalidAction {
                        step: step.id.clone(),
                        reason: format!(
                            "uses {service} produced by step {producer}, which it does not depend on"
                        ),
                    });
                }
                None => {
                    return Err(ValidationError::UnknownService {
                        step: step.id.clone(),
                        service,
                    });
                }
            }
        }
    }

    Ok(())
}

/// Transitive dependencies of `step`
fn ancestors(graph: &StepGraph, step: &StepId) -> BTreeSet<StepId> {
    let mut seen = BTreeSet::new();
    let mut stack = graph.dependencies(step);
    while let Some(next) = stack.pop() {
        if seen.insert(next.clone()) {
            stack.extend(graph.dependencies(&next));
        }
    }
    seen
}

//! Testing utilities for the Morph workspace
//!
//! Shared fixtures, plan builders and a simulator-backed harness.

#![allow(missing_docs)]

use morph_core::config::{HealthConfig, OrchestratorConfig, RetryConfig};
use morph_core::types::{
    PlanId, PlanSpec, ResourceAllocation, RoutePattern, ServiceDescriptor, ServiceId, SplitTarget,
    StepAction, StepSpec, TopologySnapshot, TransformationPlan,
};
use morph_engine::{Orchestrator, SimulatedAdapter, SimulatedTelemetry};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Five services with their routes
pub fn sample_topology() -> TopologySnapshot {
    TopologySnapshot::empty()
        .with_service(
            ServiceDescriptor::new("payment-service")
                .with_capabilities(["payments", "refunds"])
                .with_allocation(ResourceAllocation::new(2.0, 4.0))
                .with_dependencies(["user-service"]),
        )
        .with_service(
            ServiceDescriptor::new("order-service")
                .with_capabilities(["orders"])
                .with_allocation(ResourceAllocation::new(1.0, 2.0))
                .with_dependencies(["inventory-service", "payment-service"]),
        )
        .with_service(
            ServiceDescriptor::new("inventory-service")
                .with_capabilities(["inventory"])
                .with_allocation(ResourceAllocation::new(1.0, 1.0)),
        )
        .with_service(
            ServiceDescriptor::new("user-service")
                .with_capabilities(["users", "auth"])
                .with_allocation(ResourceAllocation::new(1.0, 2.0)),
        )
        .with_service(
            ServiceDescriptor::new("notification-service")
                .with_capabilities(["email"])
                .with_allocation(ResourceAllocation::new(0.5, 0.5)),
        )
        .with_route("/payments", "payment-service")
        .with_route("/refunds", "payment-service")
        .with_route("/orders", "order-service")
        .with_route("/inventory", "inventory-service")
        .with_route("/users", "user-service")
        .with_route("/notify", "notification-service")
}

/// Millisecond-scale windows so whole plans finish quickly
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_step_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(1))
        .with_settle_timeout(Duration::from_secs(2))
        .with_retry(RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            multiplier: 2.0,
        })
        .with_health(HealthConfig {
            window: Duration::from_millis(20),
            stabilization_delay: Duration::ZERO,
            verification_timeout: Duration::from_secs(2),
            ..HealthConfig::default()
        })
}

pub fn scale_step(id: &str, service: &str, cpu: f64, memory: f64) -> StepSpec {
    StepSpec::new(
        id,
        StepAction::Scale {
            service: service.into(),
            resource_allocation: ResourceAllocation::new(cpu, memory),
        },
    )
}

pub fn merge_step(id: &str, sources: &[&str], merged: &str) -> StepSpec {
    StepSpec::new(
        id,
        StepAction::Merge {
            sources: sources.iter().map(|s| ServiceId::new(*s)).collect(),
            merged: merged.into(),
        },
    )
}

pub fn retire_step(id: &str, service: &str) -> StepSpec {
    StepSpec::new(id, StepAction::Retire { service: service.into() })
}

pub fn create_step(id: &str, service: &str, routes: &[&str]) -> StepSpec {
    StepSpec::new(
        id,
        StepAction::Create {
            service: service.into(),
            capabilities: BTreeSet::from(["new".to_string()]),
            resource_allocation: ResourceAllocation::new(1.0, 1.0),
            dependencies: BTreeSet::new(),
            routes: routes.iter().map(|r| RoutePattern::new(*r)).collect(),
        },
    )
}

pub fn reroute_step(id: &str, from: &str, to: &str) -> StepSpec {
    StepSpec::new(
        id,
        StepAction::Reroute {
            from: from.into(),
            to: to.into(),
            patterns: None,
        },
    )
}

/// Split `source` into `targets`, assigning `(route, target)` pairs explicitly
pub fn split_step(
    id: &str,
    source: &str,
    targets: &[&str],
    assignments: &[(&str, &str)],
) -> StepSpec {
    StepSpec::new(
        id,
        StepAction::Split {
            source: source.into(),
            targets: targets
                .iter()
                .map(|t| SplitTarget {
                    id: (*t).into(),
                    capabilities: BTreeSet::new(),
                    resource_allocation: ResourceAllocation::new(0.5, 1.0),
                })
                .collect(),
            route_assignments: assignments
                .iter()
                .map(|(r, t)| (RoutePattern::new(*r), ServiceId::new(*t)))
                .collect::<BTreeMap<_, _>>(),
        },
    )
}

pub fn plan(name: &str, steps: Vec<StepSpec>) -> PlanSpec {
    PlanSpec::new(name, steps)
}

/// Orchestrator wired to the simulator, with handles to inject failures
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub adapter: Arc<SimulatedAdapter>,
    pub telemetry: Arc<SimulatedTelemetry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(fast_config(), SimulatedAdapter::new())
    }

    pub fn with(config: OrchestratorConfig, adapter: SimulatedAdapter) -> Self {
        let adapter = Arc::new(adapter);
        let telemetry = Arc::new(SimulatedTelemetry::new(7));
        let orchestrator = Orchestrator::new(
            config,
            sample_topology(),
            adapter.clone(),
            telemetry.clone(),
        )
        .unwrap();
        Self {
            orchestrator,
            adapter,
            telemetry,
        }
    }

    /// Create, execute and wait for a plan
    pub async fn run(&self, spec: PlanSpec) -> TransformationPlan {
        let id = self.orchestrator.create_plan(spec).unwrap().id;
        self.execute_and_wait(id).await
    }

    pub async fn execute_and_wait(&self, id: PlanId) -> TransformationPlan {
        self.orchestrator.execute_plan(id).unwrap();
        tokio::time::timeout(Duration::from_secs(30), self.orchestrator.wait_for_plan(id))
            .await
            .expect("plan did not finish")
            .unwrap()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

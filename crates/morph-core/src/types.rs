//! Core types for the transformation orchestrator
//!
//! Defines the fundamental data model:
//! - Topology snapshots and service descriptors
//! - Transformation plans and their steps
//! - The closed set of step actions
//! - Plan specifications accepted from callers

use crate::saga::{AppliedSubAction, SubAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Logical service identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub String);

impl ServiceId {
    /// Create a service id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Routing key (path prefix, host pattern, ...) mapped to a service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutePattern(pub String);

impl RoutePattern {
    /// Create a route pattern
    #[inline]
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutePattern {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Step identifier, unique within a plan
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    /// Create a step id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Unique plan identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlanId(pub Ulid);

impl PlanId {
    /// Generate new plan ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlanId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Lifecycle status of a logical service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Serving traffic
    Active,
    /// No new traffic, in-flight requests finishing
    Draining,
    /// Deregistered
    Retired,
}

/// Resources allocated to a service
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceAllocation {
    /// CPU cores
    pub cpu: f64,
    /// Memory in GiB
    pub memory: f64,
}

impl ResourceAllocation {
    /// Create a new allocation
    #[inline]
    #[must_use]
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self { cpu, memory }
    }

    /// Multiply both dimensions by `factor`
    #[inline]
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            cpu: self.cpu * factor,
            memory: self.memory * factor,
        }
    }

    /// Component-wise sum
    #[inline]
    #[must_use]
    pub fn combined(self, other: Self) -> Self {
        Self {
            cpu: self.cpu + other.cpu,
            memory: self.memory + other.memory,
        }
    }

    /// Both dimensions are finite and non-negative
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cpu.is_finite() && self.memory.is_finite() && self.cpu >= 0.0 && self.memory >= 0.0
    }
}

/// Description of one logical service in the topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    pub status: ServiceStatus,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub resource_allocation: ResourceAllocation,
    #[serde(default)]
    pub dependencies: BTreeSet<ServiceId>,
}

impl ServiceDescriptor {
    /// Active service with no capabilities or resources
    #[must_use]
    pub fn new(id: impl Into<ServiceId>) -> Self {
        Self {
            id: id.into(),
            status: ServiceStatus::Active,
            capabilities: BTreeSet::new(),
            resource_allocation: ResourceAllocation::default(),
            dependencies: BTreeSet::new(),
        }
    }

    /// With capabilities
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// With resource allocation
    #[inline]
    #[must_use]
    pub fn with_allocation(mut self, allocation: ResourceAllocation) -> Self {
        self.resource_allocation = allocation;
        self
    }

    /// With dependencies
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ServiceId>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// Immutable, versioned view of the whole topology
///
/// A snapshot is never mutated once published; writers build a
/// [`successor`](Self::successor) and hand it to the topology store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub version: u64,
    pub services: BTreeMap<ServiceId, ServiceDescriptor>,
    pub routing: BTreeMap<RoutePattern, ServiceId>,
    pub published_at: DateTime<Utc>,
}

impl TopologySnapshot {
    /// Empty topology at version 0
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            services: BTreeMap::new(),
            routing: BTreeMap::new(),
            published_at: Utc::now(),
        }
    }

    /// Add a service (builder style, for seeding initial topologies)
    #[must_use]
    pub fn with_service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.services.insert(descriptor.id.clone(), descriptor);
        self
    }

    /// Add a route (builder style, for seeding initial topologies)
    #[must_use]
    pub fn with_route(
        mut self,
        pattern: impl Into<RoutePattern>,
        service: impl Into<ServiceId>,
    ) -> Self {
        self.routing.insert(pattern.into(), service.into());
        self
    }

    /// Copy of this snapshot proposed as `version + 1`
    #[must_use]
    pub fn successor(&self) -> Self {
        Self {
            version: self.version + 1,
            services: self.services.clone(),
            routing: self.routing.clone(),
            published_at: Utc::now(),
        }
    }

    /// Look up a service
    #[inline]
    #[must_use]
    pub fn service(&self, id: &ServiceId) -> Option<&ServiceDescriptor> {
        self.services.get(id)
    }

    /// Whether the service exists
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &ServiceId) -> bool {
        self.services.contains_key(id)
    }

    /// Route patterns currently pointing at `service`
    #[must_use]
    pub fn routes_to(&self, service: &ServiceId) -> BTreeMap<RoutePattern, ServiceId> {
        self.routing
            .iter()
            .filter(|(_, target)| *target == service)
            .map(|(pattern, target)| (pattern.clone(), target.clone()))
            .collect()
    }

    /// Same services and routing, ignoring version and timestamp
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.services == other.services && self.routing == other.routing
    }
}

impl Default for TopologySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Plan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlanStatus {
    Draft,
    Ready,
    Executing,
    Completed,
    Failed,
    RolledBack,
    FailedNeedsManualRecovery,
}

impl PlanStatus {
    /// No further transition will ever happen
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::RolledBack | PlanStatus::FailedNeedsManualRecovery
        )
    }

    /// All statuses, in lifecycle order
    pub const ALL: [PlanStatus; 7] = [
        PlanStatus::Draft,
        PlanStatus::Ready,
        PlanStatus::Executing,
        PlanStatus::Completed,
        PlanStatus::Failed,
        PlanStatus::RolledBack,
        PlanStatus::FailedNeedsManualRecovery,
    ];
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Step lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Verifying,
    Committed,
    Failed,
    Compensated,
}

impl StepStatus {
    /// All statuses
    pub const ALL: [StepStatus; 6] = [
        StepStatus::Pending,
        StepStatus::Running,
        StepStatus::Verifying,
        StepStatus::Committed,
        StepStatus::Failed,
        StepStatus::Compensated,
    ];

    /// Step is in flight
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, StepStatus::Running | StepStatus::Verifying)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Step type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Merge,
    Split,
    Scale,
    Reroute,
    Create,
    Retire,
}

impl StepKind {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Merge => "merge",
            StepKind::Split => "split",
            StepKind::Scale => "scale",
            StepKind::Reroute => "reroute",
            StepKind::Create => "create",
            StepKind::Retire => "retire",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One target of a split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitTarget {
    pub id: ServiceId,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub resource_allocation: ResourceAllocation,
}

/// The closed set of topology mutations a step can perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Register a new service and optionally route traffic to it
    Create {
        service: ServiceId,
        #[serde(default)]
        capabilities: BTreeSet<String>,
        #[serde(default)]
        resource_allocation: ResourceAllocation,
        #[serde(default)]
        dependencies: BTreeSet<ServiceId>,
        #[serde(default)]
        routes: BTreeSet<RoutePattern>,
    },
    /// Drain and deregister a service
    Retire { service: ServiceId },
    /// Change a service's resource allocation
    Scale {
        service: ServiceId,
        resource_allocation: ResourceAllocation,
    },
    /// Fold several services into one
    Merge {
        sources: BTreeSet<ServiceId>,
        merged: ServiceId,
    },
    /// Partition one service into several
    Split {
        source: ServiceId,
        targets: Vec<SplitTarget>,
        #[serde(default)]
        route_assignments: BTreeMap<RoutePattern, ServiceId>,
    },
    /// Point routes at a different service
    Reroute {
        from: ServiceId,
        to: ServiceId,
        #[serde(default)]
        patterns: Option<BTreeSet<RoutePattern>>,
    },
}

impl StepAction {
    /// Step type tag
    #[must_use]
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Create { .. } => StepKind::Create,
            StepAction::Retire { .. } => StepKind::Retire,
            StepAction::Scale { .. } => StepKind::Scale,
            StepAction::Merge { .. } => StepKind::Merge,
            StepAction::Split { .. } => StepKind::Split,
            StepAction::Reroute { .. } => StepKind::Reroute,
        }
    }

    /// Every service this step touches (the execution lock footprint)
    #[must_use]
    pub fn target_services(&self) -> BTreeSet<ServiceId> {
        let mut targets = self.required_services();
        targets.extend(self.produced_services());
        if let StepAction::Create { dependencies, .. } = self {
            for dependency in dependencies {
                targets.remove(dependency);
            }
        }
        targets
    }

    /// Route patterns the step points at a service it produces
    ///
    /// Reroutes are absent: they only ever move routes away from `from`.
    #[must_use]
    pub fn claimed_routes(&self) -> BTreeSet<RoutePattern> {
        match self {
            StepAction::Create { routes, .. } => routes.clone(),
            StepAction::Split {
                route_assignments, ..
            } => route_assignments.keys().cloned().collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Services that must exist before the step runs
    #[must_use]
    pub fn required_services(&self) -> BTreeSet<ServiceId> {
        match self {
            StepAction::Create { dependencies, .. } => dependencies.clone(),
            StepAction::Retire { service } | StepAction::Scale { service, .. } => {
                BTreeSet::from([service.clone()])
            }
            StepAction::Merge { sources, .. } => sources.clone(),
            StepAction::Split { source, .. } => BTreeSet::from([source.clone()]),
            StepAction::Reroute { from, to, .. } => BTreeSet::from([from.clone(), to.clone()]),
        }
    }

    /// Services the step brings into existence
    #[must_use]
    pub fn produced_services(&self) -> BTreeSet<ServiceId> {
        match self {
            StepAction::Create { service, .. } => BTreeSet::from([service.clone()]),
            StepAction::Merge { merged, .. } => BTreeSet::from([merged.clone()]),
            StepAction::Split { targets, .. } => targets.iter().map(|t| t.id.clone()).collect(),
            StepAction::Retire { .. } | StepAction::Scale { .. } | StepAction::Reroute { .. } => {
                BTreeSet::new()
            }
        }
    }

    /// Structural checks that need no topology
    ///
    /// # Errors
    /// Returns a human-readable reason when the parameters are inconsistent.
    pub fn check_shape(&self) -> Result<(), String> {
        match self {
            StepAction::Create {
                service,
                resource_allocation,
                dependencies,
                ..
            } => {
                if dependencies.contains(service) {
                    return Err(format!("service {service} cannot depend on itself"));
                }
                if !resource_allocation.is_valid() {
                    return Err("resource allocation must be finite and non-negative".into());
                }
            }
            StepAction::Retire { .. } => {}
            StepAction::Scale {
                resource_allocation, ..
            } => {
                if !resource_allocation.is_valid() {
                    return Err("resource allocation must be finite and non-negative".into());
                }
            }
            StepAction::Merge { sources, merged } => {
                if sources.len() < 2 {
                    return Err("merge needs at least two sources".into());
                }
                if sources.contains(merged) {
                    return Err(format!("merged service {merged} is also a source"));
                }
            }
            StepAction::Split {
                source,
                targets,
                route_assignments,
            } => {
                if targets.is_empty() {
                    return Err("split needs at least one target".into());
                }
                let ids: BTreeSet<&ServiceId> = targets.iter().map(|t| &t.id).collect();
                if ids.len() != targets.len() {
                    return Err("split targets must be distinct".into());
                }
                if ids.contains(source) {
                    return Err(format!("split target {source} is also the source"));
                }
                if targets.iter().any(|t| !t.resource_allocation.is_valid()) {
                    return Err("resource allocation must be finite and non-negative".into());
                }
                if let Some((pattern, target)) =
                    route_assignments.iter().find(|(_, t)| !ids.contains(t))
                {
                    return Err(format!("route {pattern} assigned to non-target {target}"));
                }
            }
            StepAction::Reroute { from, to, .. } => {
                if from == to {
                    return Err(format!("reroute from {from} to itself"));
                }
            }
        }
        Ok(())
    }
}

/// Caller-supplied definition of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: StepId,
    #[serde(flatten)]
    pub action: StepAction,
    #[serde(default)]
    pub depends_on: BTreeSet<StepId>,
    #[serde(default)]
    pub description: Option<String>,
}

impl StepSpec {
    /// Step with no dependencies
    #[must_use]
    pub fn new(id: impl Into<StepId>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            action,
            depends_on: BTreeSet::new(),
            description: None,
        }
    }

    /// With dependencies
    #[must_use]
    pub fn depends_on<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StepId>,
    {
        self.depends_on = steps.into_iter().map(Into::into).collect();
        self
    }
}

/// Caller-supplied plan definition (raw plan input)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub source_recommendation: Option<String>,
}

impl PlanSpec {
    /// Create a plan spec
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
            source_recommendation: None,
        }
    }

    /// With description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// One step of a persisted plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationStep {
    pub id: StepId,
    #[serde(flatten)]
    pub action: StepAction,
    pub target_services: BTreeSet<ServiceId>,
    pub depends_on: BTreeSet<StepId>,
    pub status: StepStatus,
    pub description: Option<String>,
    /// Forward attempts made against the adapter
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Saga log: sub-actions externally applied, in order
    pub applied: Vec<AppliedSubAction>,
    /// Submitted mutations whose outcome never became known
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsettled: Vec<SubAction>,
}

impl TransformationStep {
    /// Materialise a spec as a pending step
    #[must_use]
    pub fn from_spec(spec: StepSpec) -> Self {
        Self {
            target_services: spec.action.target_services(),
            id: spec.id,
            action: spec.action,
            depends_on: spec.depends_on,
            status: StepStatus::Pending,
            description: spec.description,
            attempts: 0,
            started_at: None,
            completed_at: None,
            error: None,
            applied: Vec::new(),
            unsettled: Vec::new(),
        }
    }

    /// Step type tag
    #[inline]
    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }
}

/// Audit record of one plan status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTransition {
    pub from: Option<PlanStatus>,
    pub to: PlanStatus,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Audit record of one step status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTransition {
    pub step: StepId,
    pub from: StepStatus,
    pub to: StepStatus,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Execution metrics attached to a plan once it stops executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanMetrics {
    pub total_steps: usize,
    pub committed_steps: usize,
    pub failed_steps: usize,
    pub compensated_steps: usize,
    pub duration_ms: u64,
}

/// A transformation plan and its full audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationPlan {
    pub id: PlanId,
    pub name: String,
    pub description: String,
    pub status: PlanStatus,
    pub steps: Vec<TransformationStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_recommendation: Option<String>,
    /// Topology version the plan was validated against
    pub base_topology_version: u64,
    pub history: Vec<PlanTransition>,
    pub step_history: Vec<StepTransition>,
    pub metrics: Option<PlanMetrics>,
    pub error: Option<String>,
}

impl TransformationPlan {
    /// Look up a step
    #[must_use]
    pub fn step(&self, id: &StepId) -> Option<&TransformationStep> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Union of every step's target services
    #[must_use]
    pub fn target_services(&self) -> BTreeSet<ServiceId> {
        self.steps
            .iter()
            .flat_map(|s| s.target_services.iter().cloned())
            .collect()
    }

    /// Short form returned by create/list operations
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
        }
    }

    /// Count steps in the given status
    #[must_use]
    pub fn count_steps(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// `{id, status}` response shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: PlanId,
    pub name: String,
    pub status: PlanStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_spec_json_is_flat_and_tagged() {
        let json = serde_json::json!({
            "id": "s1",
            "type": "merge",
            "sources": ["a", "b"],
            "merged": "ab",
            "depends_on": ["s0"]
        });
        let spec: StepSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.action.kind(), StepKind::Merge);
        assert_eq!(spec.depends_on.len(), 1);
        assert_eq!(
            spec.action.target_services(),
            BTreeSet::from(["a".into(), "b".into(), "ab".into()])
        );
    }

    #[test]
    fn create_targets_exclude_dependencies() {
        let action = StepAction::Create {
            service: "new".into(),
            capabilities: BTreeSet::new(),
            resource_allocation: ResourceAllocation::new(1.0, 1.0),
            dependencies: BTreeSet::from(["db".into()]),
            routes: BTreeSet::new(),
        };
        assert_eq!(action.target_services(), BTreeSet::from(["new".into()]));
        assert_eq!(action.required_services(), BTreeSet::from(["db".into()]));
    }

    #[test]
    fn merge_shape_requires_two_sources() {
        let action = StepAction::Merge {
            sources: BTreeSet::from(["a".into()]),
            merged: "m".into(),
        };
        assert!(action.check_shape().is_err());
    }

    #[test]
    fn split_assignment_must_name_a_target() {
        let action = StepAction::Split {
            source: "s".into(),
            targets: vec![SplitTarget {
                id: "t1".into(),
                capabilities: BTreeSet::new(),
                resource_allocation: ResourceAllocation::default(),
            }],
            route_assignments: BTreeMap::from([("/x".into(), "elsewhere".into())]),
        };
        assert!(action.check_shape().unwrap_err().contains("non-target"));
    }

    #[test]
    fn same_content_ignores_version() {
        let a = TopologySnapshot::empty().with_service(ServiceDescriptor::new("x"));
        let b = a.successor();
        assert_ne!(a.version, b.version);
        assert!(a.same_content(&b));
    }

    #[test]
    fn plan_id_round_trips_through_str() {
        let id = PlanId::new();
        let parsed: PlanId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn terminal_statuses() {
        assert!(PlanStatus::Completed.is_terminal());
        assert!(PlanStatus::RolledBack.is_terminal());
        assert!(PlanStatus::FailedNeedsManualRecovery.is_terminal());
        assert!(!PlanStatus::Failed.is_terminal());
        assert!(!PlanStatus::Executing.is_terminal());
    }
}

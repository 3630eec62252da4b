//! Morph Core - topology model and plan bookkeeping
//!
//! The synchronous half of the transformation orchestrator:
//! - Versioned topology snapshots behind a compare-and-swap store
//! - Transformation plans, their step DAG and status state machines
//! - Sub-action saga primitives with exact inverses
//! - Plan store with per-service execution locks and a hash-chained audit log
//!
//! # Example
//!
//! ```rust,ignore
//! use morph_core::prelude::*;
//!
//! let topology = TopologyStore::new(
//!     TopologySnapshot::empty().with_service(ServiceDescriptor::new("payment-service")),
//!     100,
//! );
//! let plans = PlanStore::new();
//!
//! let spec = PlanSpec::new("grow payments", vec![StepSpec::new(
//!     "s1",
//!     StepAction::Scale {
//!         service: "payment-service".into(),
//!         resource_allocation: ResourceAllocation::new(2.0, 4.0),
//!     },
//! )]);
//! let summary = plans.create_plan(spec, &topology.current())?;
//! assert_eq!(summary.status, PlanStatus::Ready);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod audit;
pub mod config;
pub mod dag;
pub mod error;
pub mod plan_store;
pub mod saga;
pub mod state_machine;
pub mod topology;
pub mod types;
pub mod validation;

pub use audit::{AuditEvent, AuditLog};
pub use config::{HealthConfig, OrchestratorConfig, RetryConfig};
pub use dag::StepGraph;
pub use error::{
    AuditError, ConfigError, ErrorKind, OrchestratorError, StateMachineError, TopologyError,
    ValidationError,
};
pub use plan_store::PlanStore;
pub use saga::{AppliedSubAction, SubAction};
pub use topology::TopologyStore;
pub use types::{
    PlanId, PlanMetrics, PlanSpec, PlanStatus, PlanSummary, PlanTransition, ResourceAllocation,
    RoutePattern, ServiceDescriptor, ServiceId, ServiceStatus, SplitTarget, StepAction, StepId,
    StepKind, StepSpec, StepStatus, StepTransition, TopologySnapshot, TransformationPlan,
    TransformationStep,
};
pub use validation::validate_plan_spec;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Morph Core
    pub use crate::{
        OrchestratorConfig, OrchestratorError, PlanId, PlanSpec, PlanStatus, PlanStore,
        ResourceAllocation, ServiceDescriptor, ServiceId, StepAction, StepSpec, StepStatus,
        TopologySnapshot, TopologyStore,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

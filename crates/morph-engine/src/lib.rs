//! Morph Engine - live topology transformation
//!
//! Turns validated plans into health-gated infrastructure mutations:
//! - Plasticity adapter and telemetry boundaries
//! - Health verification over a sampling window
//! - Step coordination with exact saga compensation
//! - Dependency-aware, cancellable plan execution
//!
//! # Example
//!
//! ```rust,ignore
//! use morph_engine::prelude::*;
//!
//! # async fn example() -> Result<(), OrchestratorError> {
//! let orchestrator = Orchestrator::new(
//!     OrchestratorConfig::default(),
//!     topology,
//!     Arc::new(SimulatedAdapter::new()),
//!     Arc::new(SimulatedTelemetry::default()),
//! )?;
//!
//! let plan = orchestrator.create_plan(spec)?;
//! orchestrator.execute_plan(plan.id)?;
//! let done = orchestrator.wait_for_plan(plan.id).await?;
//! println!("{} finished as {}", done.name, done.status);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod adapter;
pub mod api;
pub mod coordinator;
pub mod executor;
pub mod health;
pub mod orchestrator;
pub mod recommendation;
pub mod simulator;
pub mod telemetry;

pub use adapter::{
    AdapterError, CompensationOutcome, MutationHandle, MutationStatus, PlasticityAdapter,
};
pub use api::{AbortOutcome, AbortResponse, ApiError, ExecuteResponse, StatusReport};
pub use coordinator::StepCoordinator;
pub use executor::PlanExecutor;
pub use health::{HealthError, HealthVerifier, Verdict};
pub use orchestrator::Orchestrator;
pub use recommendation::Recommendation;
pub use simulator::{SimulatedAdapter, SimulatedTelemetry, TrafficProfile};
pub use telemetry::{MetricSample, TelemetryError, TelemetrySource};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Morph Engine
    pub use crate::{
        Orchestrator, PlasticityAdapter, Recommendation, SimulatedAdapter, SimulatedTelemetry,
        TelemetrySource, TrafficProfile,
    };
    pub use morph_core::prelude::*;
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

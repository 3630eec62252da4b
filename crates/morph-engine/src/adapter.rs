//! Plasticity adapter boundary
//!
//! The orchestrator never talks to the container platform directly. Every
//! forward sub-action goes through [`PlasticityAdapter::apply_mutation`] and is
//! polled to completion; compensation hands the adapter the exact saga log of
//! what was applied.

use morph_core::saga::{AppliedSubAction, SubAction};
use morph_core::types::{StepId, TransformationStep};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque reference to an in-flight mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationHandle {
    pub id: Uuid,
    pub step: StepId,
}

impl MutationHandle {
    /// Fresh handle for `step`
    #[must_use]
    pub fn new(step: StepId) -> Self {
        Self {
            id: Uuid::new_v4(),
            step,
        }
    }
}

impl fmt::Display for MutationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.step, self.id)
    }
}

/// Progress of a submitted mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationStatus {
    Pending,
    Applied,
    Failed(String),
}

/// Result of a compensation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationOutcome {
    Applied,
    Failed(String),
}

/// Adapter call errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Worth retrying after a backoff
    #[error("transient adapter error: {0}")]
    Transient(String),

    /// Retrying will not help
    #[error("adapter error: {0}")]
    Permanent(String),
}

impl AdapterError {
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

/// Turns abstract topology edits into infrastructure calls
#[async_trait::async_trait]
pub trait PlasticityAdapter: Send + Sync {
    /// Submit one sub-action of `step`
    async fn apply_mutation(
        &self,
        step: &StepId,
        action: &SubAction,
    ) -> Result<MutationHandle, AdapterError>;

    /// Poll a submitted mutation
    async fn mutation_status(
        &self,
        handle: &MutationHandle,
    ) -> Result<MutationStatus, AdapterError>;

    /// Undo exactly the sub-actions in `applied`, newest first
    async fn compensate(
        &self,
        step: &TransformationStep,
        applied: &[AppliedSubAction],
    ) -> Result<CompensationOutcome, AdapterError>;
}

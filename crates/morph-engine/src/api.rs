//! JSON response shapes of the exposed operations

use morph_core::error::{ErrorKind, OrchestratorError};
use morph_core::types::{PlanId, PlanStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error body; `kind` is the machine-readable classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&OrchestratorError> for ApiError {
    fn from(e: &OrchestratorError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

/// `executePlan` acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub id: PlanId,
    pub accepted: bool,
    pub status: PlanStatus,
}

/// What an abort request did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortOutcome {
    /// Cancellation propagated to the running plan
    Accepted,
    AlreadyTerminal,
    /// Plan was never started; nothing to abort
    NotExecuting,
    /// Plan already failed and is being compensated
    RollingBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortResponse {
    pub id: PlanId,
    pub outcome: AbortOutcome,
    pub status: PlanStatus,
}

/// Orchestrator overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub topology_version: u64,
    pub plans: BTreeMap<PlanStatus, usize>,
    pub executing: usize,
    pub audit_events: usize,
}

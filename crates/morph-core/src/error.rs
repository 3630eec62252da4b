//! Error types for the orchestrator
//!
//! Provides the error taxonomy surfaced to callers:
//! - Plan validation failures (never retried)
//! - Execution lock conflicts (caller may retry later)
//! - Adapter execution failures and health-check failures (trigger rollback)
//! - Rollback failures (plan frozen for manual recovery)

use crate::types::{PlanId, PlanStatus, RoutePattern, ServiceId, StepId, StepStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error classification carried in every error response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    ConflictError,
    ExecutionError,
    HealthCheckFailure,
    RollbackFailure,
    NotFound,
    IllegalTransition,
    VersionConflict,
    Cancelled,
    Timeout,
    ConfigError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Main orchestrator error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    /// Malformed or cyclic plan spec
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Target service locked by another executing plan
    #[error("service {service} is locked by executing plan {holder}")]
    Conflict { service: ServiceId, holder: PlanId },

    /// Adapter mutation failed after bounded retries
    #[error("step {step} failed: {message}")]
    Execution { step: StepId, message: String },

    /// Post-mutation SLA breach or inconclusive evidence
    #[error("step {step}: health check failed for {service}: {reason}")]
    HealthCheck {
        step: StepId,
        service: ServiceId,
        reason: String,
    },

    /// A compensating action failed
    #[error("rollback of step {step} failed: {message}")]
    Rollback { step: StepId, message: String },

    /// Unknown plan
    #[error("plan not found: {0}")]
    NotFound(PlanId),

    /// Rejected status transition
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// Topology edit rejected
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Plan abort observed at a suspension point
    #[error("step {step} cancelled")]
    Cancelled { step: StepId },

    /// Forward-progress or verification timeout
    #[error("step {step} timed out after {after_ms}ms")]
    Timeout { step: StepId, after_ms: u64 },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Classification for API responses
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Conflict { .. } => ErrorKind::ConflictError,
            Self::Execution { .. } => ErrorKind::ExecutionError,
            Self::HealthCheck { .. } => ErrorKind::HealthCheckFailure,
            Self::Rollback { .. } => ErrorKind::RollbackFailure,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::StateMachine(_) => ErrorKind::IllegalTransition,
            Self::Topology(
                TopologyError::VersionConflict { .. } | TopologyError::CasRetriesExhausted { .. },
            ) => ErrorKind::VersionConflict,
            Self::Topology(_) => ErrorKind::ExecutionError,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Caller may retry the same request later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::Topology(TopologyError::CasRetriesExhausted { .. })
        )
    }

    /// Only a human can resolve this
    #[inline]
    #[must_use]
    pub fn requires_human(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

/// Plan definition errors, raised before anything is persisted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("plan has no steps")]
    EmptyPlan,

    #[error("duplicate step id {0}")]
    DuplicateStep(StepId),

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: StepId, dependency: StepId },

    #[error("step {0} depends on itself")]
    SelfDependency(StepId),

    #[error("dependency cycle through step {0}")]
    CycleDetected(StepId),

    #[error("step {step} references unknown service {service}")]
    UnknownService { step: StepId, service: ServiceId },

    #[error("step {step} would create existing service {service}")]
    ServiceAlreadyExists { step: StepId, service: ServiceId },

    #[error("service {0} is produced by more than one step")]
    DuplicateProducer(ServiceId),

    #[error("step {step}: {reason}")]
    InvalidAction { step: StepId, reason: String },

    #[error("step {step} claims route {route} owned by {owner}, which it does not target")]
    RouteOwned {
        step: StepId,
        route: RoutePattern,
        owner: ServiceId,
    },

    #[error("unsupported recommendation: {0}")]
    UnsupportedRecommendation(String),
}

/// Topology store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("unknown service {0}")]
    UnknownService(ServiceId),

    #[error("service {0} already exists")]
    ServiceExists(ServiceId),

    #[error("route {route} targets unknown service {service}")]
    UnknownRouteTarget { route: RoutePattern, service: ServiceId },

    #[error("route {route} is owned by {owner}")]
    RouteTaken { route: RoutePattern, owner: ServiceId },

    #[error("version conflict: proposed {proposed}, current {current}")]
    VersionConflict { proposed: u64, current: u64 },

    #[error("gave up after {attempts} compare-and-swap attempts")]
    CasRetriesExhausted { attempts: u32 },
}

/// Rejected status transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("illegal plan transition {from} -> {to}")]
    IllegalPlanTransition { from: PlanStatus, to: PlanStatus },

    #[error("illegal transition of step {step}: {from} -> {to}")]
    IllegalStepTransition {
        step: StepId,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("unknown step {0}")]
    UnknownStep(StepId),
}

/// Audit log errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("audit chain broken at sequence {0}")]
    IntegrityViolation(u64),
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_follow_taxonomy() {
        let conflict = OrchestratorError::Conflict {
            service: "payment-service".into(),
            holder: PlanId::new(),
        };
        assert_eq!(conflict.kind(), ErrorKind::ConflictError);
        assert!(conflict.is_retryable());

        let validation: OrchestratorError = ValidationError::EmptyPlan.into();
        assert_eq!(validation.kind(), ErrorKind::ValidationError);
        assert!(!validation.is_retryable());

        let rollback = OrchestratorError::Rollback {
            step: "s1".into(),
            message: "gone".into(),
        };
        assert_eq!(rollback.kind(), ErrorKind::RollbackFailure);
        assert!(rollback.requires_human());
    }

    #[test]
    fn version_conflict_kind() {
        let err: OrchestratorError = TopologyError::VersionConflict {
            proposed: 3,
            current: 3,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::VersionConflict);
    }

    #[test]
    fn display_mentions_service() {
        let err = OrchestratorError::HealthCheck {
            step: "s1".into(),
            service: "merged".into(),
            reason: "error rate 0.5".into(),
        };
        assert!(err.to_string().contains("merged"));
    }
}

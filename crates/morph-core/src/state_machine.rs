use crate::error::StateMachineError;
use crate::types::{PlanStatus, StepId, StepStatus};

/// Validates a plan status transition.
///
/// Illegal transitions are rejected, never silently applied.
pub fn validate_plan_transition(from: PlanStatus, to: PlanStatus) -> Result<(), StateMachineError> {
    if allowed_plan_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalPlanTransition { from, to })
    }
}

pub fn allowed_plan_transitions(from: PlanStatus) -> Vec<PlanStatus> {
    use PlanStatus::*;
    match from {
        Draft => vec![Ready],
        Ready => vec![Executing],
        Executing => vec![Completed, Failed],
        Failed => vec![RolledBack, FailedNeedsManualRecovery],
        Completed => vec![],
        RolledBack => vec![],
        FailedNeedsManualRecovery => vec![],
    }
}

/// Validates a step status transition.
pub fn validate_step_transition(
    step: &StepId,
    from: StepStatus,
    to: StepStatus,
) -> Result<(), StateMachineError> {
    if allowed_step_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalStepTransition {
            step: step.clone(),
            from,
            to,
        })
    }
}

pub fn allowed_step_transitions(from: StepStatus) -> Vec<StepStatus> {
    use StepStatus::*;
    match from {
        Pending => vec![Running],
        // a multi-phase step alternates between mutating and verifying
        Running => vec![Verifying, Committed, Failed],
        Verifying => vec![Running, Committed, Failed],
        Committed => vec![Compensated],
        Failed => vec![Compensated],
        Compensated => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        assert!(validate_plan_transition(PlanStatus::Draft, PlanStatus::Ready).is_ok());
        assert!(validate_plan_transition(PlanStatus::Ready, PlanStatus::Executing).is_ok());
        assert!(validate_plan_transition(PlanStatus::Executing, PlanStatus::Completed).is_ok());
    }

    #[test]
    fn failure_paths_are_allowed() {
        assert!(validate_plan_transition(PlanStatus::Executing, PlanStatus::Failed).is_ok());
        assert!(validate_plan_transition(PlanStatus::Failed, PlanStatus::RolledBack).is_ok());
        assert!(validate_plan_transition(
            PlanStatus::Failed,
            PlanStatus::FailedNeedsManualRecovery
        )
        .is_ok());
    }

    #[test]
    fn shortcuts_are_rejected() {
        assert!(validate_plan_transition(PlanStatus::Draft, PlanStatus::Executing).is_err());
        assert!(validate_plan_transition(PlanStatus::Executing, PlanStatus::RolledBack).is_err());
        assert!(validate_plan_transition(PlanStatus::Completed, PlanStatus::Executing).is_err());
        assert!(validate_plan_transition(
            PlanStatus::FailedNeedsManualRecovery,
            PlanStatus::Executing
        )
        .is_err());
    }

    #[test]
    fn pending_step_cannot_commit_directly() {
        let step = StepId::new("s1");
        assert!(
            validate_step_transition(&step, StepStatus::Pending, StepStatus::Committed).is_err()
        );
        assert!(validate_step_transition(&step, StepStatus::Pending, StepStatus::Running).is_ok());
    }
}

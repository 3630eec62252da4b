use async_trait::async_trait;
use morph_core::saga::{AppliedSubAction, SubAction};
use morph_core::types::{PlanStatus, StepId, StepStatus, TransformationStep};
use morph_engine::{
    AbortOutcome, AdapterError, CompensationOutcome, MutationHandle, MutationStatus, Orchestrator,
    PlasticityAdapter, SimulatedTelemetry, TrafficProfile,
};
use morph_test_utils::{fast_config, plan, sample_topology, scale_step};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Applies the first mutation, panics on the second
#[derive(Default)]
struct PanicsOnSecond {
    calls: AtomicU32,
}

#[async_trait]
impl PlasticityAdapter for PanicsOnSecond {
    async fn apply_mutation(
        &self,
        step: &StepId,
        _action: &SubAction,
    ) -> Result<MutationHandle, AdapterError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            panic!("adapter blew up");
        }
        Ok(MutationHandle::new(step.clone()))
    }

    async fn mutation_status(
        &self,
        _handle: &MutationHandle,
    ) -> Result<MutationStatus, AdapterError> {
        Ok(MutationStatus::Applied)
    }

    async fn compensate(
        &self,
        _step: &TransformationStep,
        _applied: &[AppliedSubAction],
    ) -> Result<CompensationOutcome, AdapterError> {
        Ok(CompensationOutcome::Applied)
    }
}

#[tokio::test]
async fn panicking_step_is_rolled_back() {
    let orchestrator = Orchestrator::new(
        fast_config().with_max_concurrent_steps(1),
        sample_topology(),
        Arc::new(PanicsOnSecond::default()),
        Arc::new(SimulatedTelemetry::default()),
    )
    .unwrap();
    let before = orchestrator.topology();

    let id = orchestrator
        .create_plan(plan(
            "two scales",
            vec![
                scale_step("first", "payment-service", 3.0, 3.0),
                scale_step("second", "user-service", 3.0, 3.0).depends_on(["first"]),
            ],
        ))
        .unwrap()
        .id;
    orchestrator.execute_plan(id).unwrap();
    let done = tokio::time::timeout(Duration::from_secs(10), orchestrator.wait_for_plan(id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(done.status, PlanStatus::RolledBack);
    let first = done.step(&StepId::new("first")).unwrap();
    let second = done.step(&StepId::new("second")).unwrap();
    assert_eq!(first.status, StepStatus::Compensated);
    assert_eq!(second.status, StepStatus::Failed);
    assert!(second.error.as_deref().unwrap().contains("panicked"));
    assert!(orchestrator.topology().same_content(&before));
    assert!(orchestrator.plan_store().lock_holder(&"payment-service".into()).is_none());
}

/// Applies everything at once, takes its time undoing
struct SlowCompensation;

#[async_trait]
impl PlasticityAdapter for SlowCompensation {
    async fn apply_mutation(
        &self,
        step: &StepId,
        _action: &SubAction,
    ) -> Result<MutationHandle, AdapterError> {
        Ok(MutationHandle::new(step.clone()))
    }

    async fn mutation_status(
        &self,
        _handle: &MutationHandle,
    ) -> Result<MutationStatus, AdapterError> {
        Ok(MutationStatus::Applied)
    }

    async fn compensate(
        &self,
        _step: &TransformationStep,
        _applied: &[AppliedSubAction],
    ) -> Result<CompensationOutcome, AdapterError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(CompensationOutcome::Applied)
    }
}

#[tokio::test]
async fn abort_while_rolling_back_says_so() {
    let telemetry = Arc::new(SimulatedTelemetry::default());
    telemetry.set_profile("payment-service", TrafficProfile::Erroring { error_rate: 0.5 });
    let orchestrator = Orchestrator::new(
        fast_config(),
        sample_topology(),
        Arc::new(SlowCompensation),
        telemetry,
    )
    .unwrap();

    let id = orchestrator
        .create_plan(plan("doomed", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .unwrap()
        .id;
    let mut status = orchestrator.plan_store().subscribe(id).unwrap();
    orchestrator.execute_plan(id).unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == PlanStatus::Failed),
    )
    .await
    .unwrap()
    .unwrap();

    let response = orchestrator.abort_plan(id).unwrap();
    assert_eq!(response.outcome, AbortOutcome::RollingBack);
    assert_eq!(response.status, PlanStatus::Failed);

    let done = orchestrator.wait_for_plan(id).await.unwrap();
    assert_eq!(done.status, PlanStatus::RolledBack);
}

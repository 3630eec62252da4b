use morph_core::error::{OrchestratorError, ValidationError};
use morph_core::types::{
    PlanStatus, RoutePattern, ServiceId, StepId, StepKind, StepSpec, StepStatus,
    TransformationPlan,
};
use morph_engine::{AbortOutcome, Recommendation, SimulatedAdapter, TrafficProfile};
use morph_test_utils::{
    create_step, fast_config, merge_step, plan, reroute_step, retire_step, sample_topology,
    scale_step, split_step, Harness,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn step_status(plan: &TransformationPlan, id: &str) -> StepStatus {
    plan.step(&StepId::new(id)).unwrap().status
}

fn route(harness: &Harness, pattern: &str) -> Option<ServiceId> {
    harness
        .orchestrator
        .topology()
        .routing
        .get(&RoutePattern::new(pattern))
        .cloned()
}

#[tokio::test]
async fn independent_scales_both_commit() {
    let harness = Harness::new();
    let done = harness
        .run(plan(
            "scale two",
            vec![
                scale_step("scale-payments", "payment-service", 4.0, 8.0),
                scale_step("scale-users", "user-service", 2.0, 4.0),
            ],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::Completed);
    assert_eq!(step_status(&done, "scale-payments"), StepStatus::Committed);
    assert_eq!(step_status(&done, "scale-users"), StepStatus::Committed);

    let topology = harness.orchestrator.topology();
    let payments = topology.service(&"payment-service".into()).unwrap();
    assert_eq!(payments.resource_allocation.cpu, 4.0);
    assert_eq!(payments.resource_allocation.memory, 8.0);

    let metrics = done.metrics.unwrap();
    assert_eq!(metrics.total_steps, 2);
    assert_eq!(metrics.committed_steps, 2);
}

#[tokio::test]
async fn unhealthy_merge_rolls_back_to_original_topology() {
    let harness = Harness::new();
    harness
        .telemetry
        .set_profile("billing", TrafficProfile::Erroring { error_rate: 0.5 });
    let before = harness.orchestrator.topology();

    let done = harness
        .run(plan(
            "merge billing",
            vec![merge_step("merge", &["payment-service", "user-service"], "billing")],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::RolledBack);
    assert_eq!(step_status(&done, "merge"), StepStatus::Compensated);
    assert!(done.error.as_deref().unwrap().contains("health check failed"));

    let after = harness.orchestrator.topology();
    assert!(after.same_content(&before));
    assert!(after.version > before.version);
    assert_eq!(harness.adapter.compensated(), vec![StepId::new("merge")]);

    let history: Vec<PlanStatus> = done.history.iter().map(|t| t.to).collect();
    assert_eq!(
        history,
        vec![
            PlanStatus::Draft,
            PlanStatus::Ready,
            PlanStatus::Executing,
            PlanStatus::Failed,
            PlanStatus::RolledBack,
        ]
    );
}

#[tokio::test]
async fn healthy_merge_moves_routes_and_retires_sources() {
    let harness = Harness::new();
    let done = harness
        .run(plan(
            "merge billing",
            vec![merge_step("merge", &["payment-service", "user-service"], "billing")],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::Completed);
    let topology = harness.orchestrator.topology();
    assert!(!topology.contains(&"payment-service".into()));
    assert!(!topology.contains(&"user-service".into()));

    let billing = topology.service(&"billing".into()).unwrap();
    assert!(billing.capabilities.contains("payments"));
    assert!(billing.capabilities.contains("auth"));
    assert_eq!(billing.resource_allocation.cpu, 3.0);
    for pattern in ["/payments", "/refunds", "/users"] {
        assert_eq!(route(&harness, pattern), Some("billing".into()));
    }
}

#[tokio::test]
async fn cyclic_plan_is_rejected_and_not_persisted() {
    let harness = Harness::new();
    let spec = plan(
        "cycle",
        vec![
            scale_step("step1", "payment-service", 1.0, 1.0).depends_on(["step2"]),
            scale_step("step2", "user-service", 1.0, 1.0).depends_on(["step1"]),
        ],
    );

    let err = harness.orchestrator.create_plan(spec).unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::CycleDetected(_))
    ));
    assert!(harness.orchestrator.list_plans().is_empty());
}

#[tokio::test]
async fn second_plan_on_locked_service_conflicts() {
    let config = fast_config().with_health(morph_core::config::HealthConfig {
        window: Duration::from_millis(300),
        stabilization_delay: Duration::ZERO,
        verification_timeout: Duration::from_secs(2),
        ..Default::default()
    });
    let harness = Harness::with(config, SimulatedAdapter::new());

    let first = harness
        .orchestrator
        .create_plan(plan("first", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .unwrap();
    let second = harness
        .orchestrator
        .create_plan(plan("second", vec![scale_step("s", "payment-service", 5.0, 5.0)]))
        .unwrap();

    harness.orchestrator.execute_plan(first.id).unwrap();
    let err = harness.orchestrator.execute_plan(second.id).unwrap_err();
    match err {
        OrchestratorError::Conflict { service, holder } => {
            assert_eq!(service, ServiceId::new("payment-service"));
            assert_eq!(holder, first.id);
        }
        other => panic!("expected conflict, got {other}"),
    }
    assert_eq!(
        harness.orchestrator.get_plan(second.id).unwrap().status,
        PlanStatus::Ready
    );

    let done = harness.orchestrator.wait_for_plan(first.id).await.unwrap();
    assert_eq!(done.status, PlanStatus::Completed);

    // lock is gone once the first plan finished
    let done = harness.execute_and_wait(second.id).await;
    assert_eq!(done.status, PlanStatus::Completed);
}

#[tokio::test]
async fn failed_retire_compensation_needs_manual_recovery() {
    let harness = Harness::new();
    harness.adapter.fail_compensation_for(StepKind::Retire);
    harness
        .telemetry
        .set_profile("payment-service", TrafficProfile::Erroring { error_rate: 0.4 });

    let done = harness
        .run(plan(
            "retire then scale",
            vec![
                retire_step("retire", "notification-service"),
                scale_step("scale", "payment-service", 3.0, 6.0).depends_on(["retire"]),
            ],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::FailedNeedsManualRecovery);
    assert_eq!(step_status(&done, "scale"), StepStatus::Compensated);
    assert_eq!(step_status(&done, "retire"), StepStatus::Committed);
    assert!(done.error.as_deref().unwrap().contains("rollback of step retire failed"));

    let compensated = harness.adapter.compensated();
    assert_eq!(compensated, vec![StepId::new("scale"), StepId::new("retire")]);

    // nothing else happens to the plan afterwards
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.adapter.compensated(), compensated);
    let later = harness.orchestrator.get_plan(done.id).unwrap();
    assert_eq!(later.status, PlanStatus::FailedNeedsManualRecovery);
    assert_eq!(later.history.len(), done.history.len());
    assert!(!harness
        .orchestrator
        .topology()
        .contains(&"notification-service".into()));

    let again = harness.orchestrator.abort_plan(done.id).unwrap();
    assert_eq!(again.outcome, AbortOutcome::AlreadyTerminal);
}

#[tokio::test]
async fn dependent_step_waits_for_its_dependency() {
    let harness = Harness::new();
    let done = harness
        .run(plan(
            "ordered",
            vec![
                scale_step("second", "payment-service", 3.0, 3.0).depends_on(["first"]),
                scale_step("first", "user-service", 2.0, 2.0),
            ],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::Completed);
    let first = done.step(&StepId::new("first")).unwrap();
    let second = done.step(&StepId::new("second")).unwrap();
    assert!(second.started_at.unwrap() >= first.completed_at.unwrap());
}

#[tokio::test]
async fn failed_dependency_leaves_dependents_pending() {
    let harness = Harness::new();
    harness
        .telemetry
        .set_profile("user-service", TrafficProfile::Slow { latency_ms: 900.0 });

    let done = harness
        .run(plan(
            "blocked",
            vec![
                scale_step("first", "user-service", 2.0, 2.0),
                scale_step("second", "payment-service", 3.0, 3.0).depends_on(["first"]),
            ],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::RolledBack);
    assert_eq!(step_status(&done, "first"), StepStatus::Compensated);
    assert_eq!(step_status(&done, "second"), StepStatus::Pending);
    assert!(harness
        .adapter
        .submitted()
        .iter()
        .all(|(step, _)| step != &StepId::new("second")));
}

#[tokio::test]
async fn steps_sharing_a_service_never_overlap() {
    let harness = Harness::new();
    let done = harness
        .run(plan(
            "twice",
            vec![
                scale_step("a", "payment-service", 3.0, 3.0),
                scale_step("b", "payment-service", 4.0, 4.0),
            ],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::Completed);
    let a = done.step(&StepId::new("a")).unwrap();
    let b = done.step(&StepId::new("b")).unwrap();
    let disjoint = a.completed_at.unwrap() <= b.started_at.unwrap()
        || b.completed_at.unwrap() <= a.started_at.unwrap();
    assert!(disjoint);
}

#[tokio::test]
async fn concurrency_limit_serialises_independent_steps() {
    let harness = Harness::with(
        fast_config().with_max_concurrent_steps(1),
        SimulatedAdapter::new(),
    );
    let done = harness
        .run(plan(
            "one at a time",
            vec![
                scale_step("a", "payment-service", 3.0, 3.0),
                scale_step("b", "user-service", 4.0, 4.0),
            ],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::Completed);
    let a = done.step(&StepId::new("a")).unwrap();
    let b = done.step(&StepId::new("b")).unwrap();
    assert!(
        a.completed_at.unwrap() <= b.started_at.unwrap()
            || b.completed_at.unwrap() <= a.started_at.unwrap()
    );
}

#[tokio::test]
async fn transient_adapter_errors_are_retried() {
    let harness = Harness::new();
    harness.adapter.fail_next_transient(2);

    let done = harness
        .run(plan("retry", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .await;

    assert_eq!(done.status, PlanStatus::Completed);
    assert_eq!(done.step(&StepId::new("s")).unwrap().attempts, 3);
}

#[tokio::test]
async fn exhausted_retries_roll_back() {
    let harness = Harness::new();
    harness.adapter.fail_next_transient(10);
    let before = harness.orchestrator.topology();

    let done = harness
        .run(plan("retry", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .await;

    assert_eq!(done.status, PlanStatus::RolledBack);
    let step = done.step(&StepId::new("s")).unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.attempts, 3);
    assert!(step.applied.is_empty());
    assert!(harness.orchestrator.topology().same_content(&before));
}

#[tokio::test]
async fn adapter_reported_failure_is_not_retried() {
    let harness = Harness::new();
    harness.adapter.fail_mutations_for("payment-service");

    let done = harness
        .run(plan("broken", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .await;

    assert_eq!(done.status, PlanStatus::RolledBack);
    assert_eq!(done.step(&StepId::new("s")).unwrap().attempts, 1);
}

#[tokio::test]
async fn partial_merge_is_undone_in_reverse() {
    let harness = Harness::new();
    harness.adapter.reject_mutations_for("billing");
    let before = harness.orchestrator.topology();

    let done = harness
        .run(plan(
            "merge billing",
            vec![merge_step("merge", &["payment-service", "user-service"], "billing")],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::RolledBack);
    let merge = done.step(&StepId::new("merge")).unwrap();
    assert_eq!(merge.status, StepStatus::Compensated);
    // both drains went through before the registration was refused
    assert_eq!(merge.applied.len(), 2);
    assert!(harness.orchestrator.topology().same_content(&before));
}

#[tokio::test]
async fn silent_service_is_not_trusted() {
    let harness = Harness::new();
    harness.telemetry.set_profile("payment-service", TrafficProfile::Silent);

    let done = harness
        .run(plan("quiet", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .await;

    assert_eq!(done.status, PlanStatus::RolledBack);
    assert!(done.error.as_deref().unwrap().contains("payment-service"));
}

#[tokio::test]
async fn slow_step_times_out_and_undoes_its_late_mutation() {
    let config = fast_config().with_step_timeout(Duration::from_millis(50));
    let harness = Harness::with(
        config,
        SimulatedAdapter::new().with_latency(Duration::from_millis(300)),
    );
    let before = harness.orchestrator.topology();

    let done = harness
        .run(plan("slow", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .await;

    assert_eq!(done.status, PlanStatus::RolledBack);
    assert!(done.error.as_deref().unwrap().contains("timed out"));
    // the allocation landed after the deadline and still made it into the saga log
    let step = done.step(&StepId::new("s")).unwrap();
    assert_eq!(step.status, StepStatus::Compensated);
    assert_eq!(step.applied.len(), 1);
    assert_eq!(harness.adapter.compensated(), vec![StepId::new("s")]);
    assert!(harness.orchestrator.topology().same_content(&before));
}

#[tokio::test]
async fn abort_during_submission_compensates_the_mutation() {
    let harness = Harness::with(
        fast_config(),
        SimulatedAdapter::new().with_latency(Duration::from_millis(300)),
    );
    let before = harness.orchestrator.topology();
    let id = harness
        .orchestrator
        .create_plan(plan("in flight", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .unwrap()
        .id;

    harness.orchestrator.execute_plan(id).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let response = harness.orchestrator.abort_plan(id).unwrap();
    assert_eq!(response.outcome, AbortOutcome::Accepted);

    let done = harness.orchestrator.wait_for_plan(id).await.unwrap();
    assert_eq!(done.status, PlanStatus::RolledBack);
    let step = done.step(&StepId::new("s")).unwrap();
    assert_eq!(step.status, StepStatus::Compensated);
    assert_eq!(step.applied.len(), 1);
    assert_eq!(harness.adapter.compensated(), vec![StepId::new("s")]);
    assert!(harness.orchestrator.topology().same_content(&before));
}

#[tokio::test]
async fn mutation_that_never_settles_needs_manual_recovery() {
    let config = fast_config()
        .with_step_timeout(Duration::from_millis(50))
        .with_settle_timeout(Duration::from_millis(50));
    let harness = Harness::with(config, SimulatedAdapter::new().with_pending_polls(u32::MAX));

    let done = harness
        .run(plan("stuck", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .await;

    assert_eq!(done.status, PlanStatus::FailedNeedsManualRecovery);
    let step = done.step(&StepId::new("s")).unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert!(step.applied.is_empty());
    assert_eq!(step.unsettled.len(), 1);
    assert!(done.error.as_deref().unwrap().contains("unknown"));
    // blind compensation is never requested
    assert!(harness.adapter.compensated().is_empty());
}

#[tokio::test]
async fn abort_cancels_and_compensates() {
    let config = fast_config().with_health(morph_core::config::HealthConfig {
        window: Duration::from_secs(1),
        stabilization_delay: Duration::ZERO,
        verification_timeout: Duration::from_secs(5),
        ..Default::default()
    });
    let harness = Harness::with(config, SimulatedAdapter::new());
    let before = harness.orchestrator.topology();
    let id = harness
        .orchestrator
        .create_plan(plan(
            "abortable",
            vec![
                scale_step("a", "payment-service", 3.0, 3.0),
                scale_step("b", "user-service", 3.0, 3.0).depends_on(["a"]),
            ],
        ))
        .unwrap()
        .id;

    harness.orchestrator.execute_plan(id).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = harness.orchestrator.abort_plan(id).unwrap();
    assert_eq!(response.outcome, AbortOutcome::Accepted);

    let done = harness.orchestrator.wait_for_plan(id).await.unwrap();
    assert_eq!(done.status, PlanStatus::RolledBack);
    assert_eq!(step_status(&done, "a"), StepStatus::Compensated);
    assert_eq!(step_status(&done, "b"), StepStatus::Pending);
    assert!(harness.orchestrator.topology().same_content(&before));
}

#[tokio::test]
async fn abort_before_execution_is_a_no_op() {
    let harness = Harness::new();
    let id = harness
        .orchestrator
        .create_plan(plan("idle", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .unwrap()
        .id;

    let response = harness.orchestrator.abort_plan(id).unwrap();
    assert_eq!(response.outcome, AbortOutcome::NotExecuting);
    assert_eq!(response.status, PlanStatus::Ready);
}

#[tokio::test]
async fn executing_twice_is_rejected() {
    let harness = Harness::new();
    let done = harness
        .run(plan("once", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .await;

    let err = harness.orchestrator.execute_plan(done.id).unwrap_err();
    assert!(matches!(err, OrchestratorError::StateMachine(_)));
}

#[tokio::test]
async fn split_distributes_routes() {
    let harness = Harness::new();
    let done = harness
        .run(plan(
            "split payments",
            vec![split_step(
                "split",
                "payment-service",
                &["charges", "refunds"],
                &[("/refunds", "refunds")],
            )],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::Completed);
    let topology = harness.orchestrator.topology();
    assert!(!topology.contains(&"payment-service".into()));
    assert!(topology.contains(&"charges".into()));
    assert_eq!(route(&harness, "/payments"), Some("charges".into()));
    assert_eq!(route(&harness, "/refunds"), Some("refunds".into()));
}

#[tokio::test]
async fn create_then_reroute_then_retire() {
    let harness = Harness::new();
    let done = harness
        .run(plan(
            "replace inventory",
            vec![
                create_step("create", "stock-service", &["/stock"]),
                reroute_step("reroute", "inventory-service", "stock-service")
                    .depends_on(["create"]),
                retire_step("retire", "inventory-service").depends_on(["reroute"]),
            ],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::Completed);
    let topology = harness.orchestrator.topology();
    assert!(!topology.contains(&"inventory-service".into()));
    assert_eq!(route(&harness, "/stock"), Some("stock-service".into()));
    assert_eq!(route(&harness, "/inventory"), Some("stock-service".into()));
}

#[tokio::test]
async fn create_cannot_take_over_a_route_of_another_service() {
    let harness = Harness::new();
    let err = harness
        .orchestrator
        .create_plan(plan("hijack", vec![create_step("c", "stock-service", &["/payments"])]))
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::RouteOwned { ref owner, .. })
            if owner == &ServiceId::new("payment-service")
    ));
    assert!(harness.orchestrator.list_plans().is_empty());
    assert_eq!(route(&harness, "/payments"), Some("payment-service".into()));
}

#[tokio::test]
async fn split_cannot_reassign_a_route_of_another_service() {
    let harness = Harness::new();
    let err = harness
        .orchestrator
        .create_plan(plan(
            "hijack",
            vec![split_step(
                "split",
                "payment-service",
                &["charges"],
                &[("/orders", "charges")],
            )],
        ))
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::RouteOwned { ref owner, .. })
            if owner == &ServiceId::new("order-service")
    ));
}

/// Run `first` followed by a dependent step that fails verification
async fn undone_after_dependent_fails(first: StepSpec) {
    let harness = Harness::new();
    harness
        .telemetry
        .set_profile("user-service", TrafficProfile::Erroring { error_rate: 0.5 });
    let before = harness.orchestrator.topology();
    let id = first.id.clone();

    let done = harness
        .run(plan(
            "undo",
            vec![
                first,
                scale_step("doomed", "user-service", 3.0, 3.0).depends_on([id.clone()]),
            ],
        ))
        .await;

    assert_eq!(done.status, PlanStatus::RolledBack);
    let step = done.step(&id).unwrap();
    assert_eq!(step.status, StepStatus::Compensated);
    assert!(!step.applied.is_empty());
    assert!(harness.orchestrator.topology().same_content(&before));
}

#[tokio::test]
async fn committed_create_is_undone() {
    undone_after_dependent_fails(create_step("create", "stock-service", &["/stock"])).await;
}

#[tokio::test]
async fn committed_reroute_is_undone() {
    undone_after_dependent_fails(reroute_step("reroute", "inventory-service", "order-service"))
        .await;
}

#[tokio::test]
async fn committed_retire_is_undone() {
    undone_after_dependent_fails(retire_step("retire", "notification-service")).await;
}

#[tokio::test]
async fn committed_split_is_undone() {
    undone_after_dependent_fails(split_step(
        "split",
        "payment-service",
        &["charges", "refund-service"],
        &[("/refunds", "refund-service")],
    ))
    .await;
}

#[tokio::test]
async fn recommendation_becomes_a_completed_plan() {
    let harness = Harness::new();
    let summary = harness
        .orchestrator
        .create_plan_from_recommendation(&Recommendation::new(
            "increase_resources",
            ["order-service"],
        ))
        .unwrap();
    let done = harness.execute_and_wait(summary.id).await;

    assert_eq!(done.status, PlanStatus::Completed);
    assert_eq!(done.source_recommendation.as_deref(), Some("increase_resources"));
    let orders = harness
        .orchestrator
        .topology()
        .service(&"order-service".into())
        .unwrap()
        .resource_allocation;
    assert!((orders.cpu - 1.3).abs() < 1e-9);
}

#[tokio::test]
async fn unsupported_recommendation_is_rejected() {
    let harness = Harness::new();
    let err = harness
        .orchestrator
        .create_plan_from_recommendation(&Recommendation::new(
            "rewrite_in_cobol",
            ["order-service"],
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Validation(ValidationError::UnsupportedRecommendation(_))
    ));
}

#[tokio::test]
async fn status_and_audit_reflect_finished_plans() {
    let harness = Harness::new();
    let initial_version = sample_topology().version;
    let done = harness
        .run(plan("scale", vec![scale_step("s", "payment-service", 3.0, 3.0)]))
        .await;

    let status = harness.orchestrator.status();
    assert_eq!(status.plans.get(&PlanStatus::Completed), Some(&1));
    assert_eq!(status.executing, 0);
    assert!(status.topology_version > initial_version);

    let audit = harness.orchestrator.audit();
    assert!(audit.verify_integrity().is_ok());
    assert!(!audit.events_for(done.id).is_empty());
    assert!(harness.orchestrator.topology_history(10).len() >= 2);
}

#[tokio::test]
async fn waiting_on_unknown_plan_is_not_found() {
    let harness = Harness::new();
    let err = harness
        .orchestrator
        .wait_for_plan(morph_core::types::PlanId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

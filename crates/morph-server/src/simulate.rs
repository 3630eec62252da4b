//! Scripted end-to-end run against the in-memory simulator
//!
//! Every scenario gets a fresh orchestrator over the same demo topology and
//! checks the terminal outcome the orchestrator must reach.

use morph_core::config::{HealthConfig, OrchestratorConfig, RetryConfig};
use morph_core::error::ErrorKind;
use morph_core::types::{
    PlanSpec, PlanStatus, ResourceAllocation, ServiceDescriptor, ServiceId, StepAction, StepKind,
    StepSpec, TopologySnapshot,
};
use morph_engine::{Orchestrator, SimulatedAdapter, SimulatedTelemetry, TrafficProfile};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Seed for telemetry noise
    pub seed: u64,
    /// Health sampling window per verification
    pub window: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            window: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub name: &'static str,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub seed: u64,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl SimulationReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Morph Simulation Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.seed);
        let _ = writeln!(report, "Scenarios: {}\n", self.outcomes.len());
        for outcome in &self.outcomes {
            let _ = writeln!(
                report,
                "[{}] {}: expected {}, got {}",
                if outcome.passed { "PASS" } else { "FAIL" },
                outcome.name,
                outcome.expected,
                outcome.actual
            );
        }
        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

/// Topology the scenarios run against
#[must_use]
pub fn demo_topology() -> TopologySnapshot {
    TopologySnapshot::empty()
        .with_service(
            ServiceDescriptor::new("payment-service")
                .with_capabilities(["payments"])
                .with_allocation(ResourceAllocation::new(2.0, 4.0)),
        )
        .with_service(
            ServiceDescriptor::new("user-service")
                .with_capabilities(["users"])
                .with_allocation(ResourceAllocation::new(1.0, 2.0)),
        )
        .with_service(
            ServiceDescriptor::new("legacy-reports")
                .with_allocation(ResourceAllocation::new(0.5, 1.0)),
        )
        .with_route("/payments", "payment-service")
        .with_route("/users", "user-service")
        .with_route("/reports", "legacy-reports")
}

fn orchestrator_config(config: &SimulationConfig) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_poll_interval(Duration::from_millis(1))
        .with_retry(RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(20),
            ..RetryConfig::default()
        })
        .with_health(HealthConfig {
            window: config.window,
            stabilization_delay: Duration::ZERO,
            verification_timeout: config.window * 4 + Duration::from_secs(1),
            ..HealthConfig::default()
        })
}

struct Rig {
    orchestrator: Orchestrator,
    adapter: Arc<SimulatedAdapter>,
    telemetry: Arc<SimulatedTelemetry>,
}

impl Rig {
    fn new(config: &SimulationConfig) -> anyhow::Result<Self> {
        let adapter = Arc::new(SimulatedAdapter::new());
        let telemetry = Arc::new(SimulatedTelemetry::new(config.seed));
        let orchestrator = Orchestrator::new(
            orchestrator_config(config),
            demo_topology(),
            adapter.clone(),
            telemetry.clone(),
        )?;
        Ok(Self {
            orchestrator,
            adapter,
            telemetry,
        })
    }

    async fn run(&self, spec: PlanSpec) -> anyhow::Result<PlanStatus> {
        let summary = self.orchestrator.create_plan(spec)?;
        self.orchestrator.execute_plan(summary.id)?;
        Ok(self.orchestrator.wait_for_plan(summary.id).await?.status)
    }
}

fn scale(id: &str, service: &str, factor: f64) -> StepSpec {
    StepSpec::new(
        id,
        StepAction::Scale {
            service: service.into(),
            resource_allocation: ResourceAllocation::new(1.0, 2.0).scaled(factor),
        },
    )
}

fn outcome(name: &'static str, expected: impl ToString, actual: impl ToString) -> ScenarioOutcome {
    let expected = expected.to_string();
    let actual = actual.to_string();
    ScenarioOutcome {
        name,
        passed: expected == actual,
        expected,
        actual,
    }
}

/// Run every scenario once
///
/// # Errors
/// When an orchestrator cannot be built or a plan the scenario relies on is
/// rejected unexpectedly.
pub async fn run(config: SimulationConfig) -> anyhow::Result<SimulationReport> {
    let mut outcomes = Vec::new();

    let rig = Rig::new(&config)?;
    let status = rig
        .run(PlanSpec::new(
            "independent scales",
            vec![
                scale("grow-payments", "payment-service", 2.0),
                scale("grow-users", "user-service", 2.0),
            ],
        ))
        .await?;
    outcomes.push(outcome("independent scales", PlanStatus::Completed, status));

    let rig = Rig::new(&config)?;
    rig.telemetry
        .set_profile("billing", TrafficProfile::Erroring { error_rate: 0.3 });
    let before = rig.orchestrator.topology();
    let status = rig
        .run(PlanSpec::new(
            "unhealthy merge",
            vec![StepSpec::new(
                "merge",
                StepAction::Merge {
                    sources: ["payment-service", "user-service"]
                        .into_iter()
                        .map(ServiceId::from)
                        .collect(),
                    merged: "billing".into(),
                },
            )],
        ))
        .await?;
    let restored = rig.orchestrator.topology().same_content(&before);
    outcomes.push(outcome(
        "unhealthy merge rolls back",
        format!("{} (restored)", PlanStatus::RolledBack),
        format!("{status} ({})", if restored { "restored" } else { "diverged" }),
    ));

    let rig = Rig::new(&config)?;
    let rejected = rig
        .orchestrator
        .create_plan(PlanSpec::new(
            "cycle",
            vec![
                scale("step1", "payment-service", 1.0).depends_on(["step2"]),
                scale("step2", "user-service", 1.0).depends_on(["step1"]),
            ],
        ))
        .map_or_else(|e| e.kind().to_string(), |s| s.status.to_string());
    outcomes.push(outcome("cyclic plan", ErrorKind::ValidationError, rejected));

    let rig = Rig::new(&config)?;
    let first = rig.orchestrator.create_plan(PlanSpec::new(
        "first",
        vec![scale("grow", "payment-service", 2.0)],
    ))?;
    let second = rig.orchestrator.create_plan(PlanSpec::new(
        "second",
        vec![scale("shrink", "payment-service", 0.5)],
    ))?;
    rig.orchestrator.execute_plan(first.id)?;
    let conflict = rig
        .orchestrator
        .execute_plan(second.id)
        .map_or_else(|e| e.kind().to_string(), |r| r.status.to_string());
    rig.orchestrator.wait_for_plan(first.id).await?;
    outcomes.push(outcome("conflicting plans", ErrorKind::ConflictError, conflict));

    let rig = Rig::new(&config)?;
    rig.adapter.fail_compensation_for(StepKind::Retire);
    rig.telemetry
        .set_profile("payment-service", TrafficProfile::Erroring { error_rate: 0.3 });
    let status = rig
        .run(PlanSpec::new(
            "retire then scale",
            vec![
                StepSpec::new(
                    "retire",
                    StepAction::Retire {
                        service: "legacy-reports".into(),
                    },
                ),
                scale("grow", "payment-service", 2.0).depends_on(["retire"]),
            ],
        ))
        .await?;
    outcomes.push(outcome(
        "failed compensation",
        PlanStatus::FailedNeedsManualRecovery,
        status,
    ));

    let report = SimulationReport {
        seed: config.seed,
        outcomes,
    };
    info!(seed = report.seed, passed = report.passed(), "simulation finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_scenario_passes() {
        let report = run(SimulationConfig {
            seed: 7,
            window: Duration::from_millis(10),
        })
        .await
        .unwrap();
        assert_eq!(report.outcomes.len(), 5);
        assert!(report.passed(), "{}", report.generate_text());
    }
}

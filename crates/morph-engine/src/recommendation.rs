//! Recommendation ingestion
//!
//! Recommendations arrive from an external producer as loosely typed
//! records; only the actions below are understood.

use morph_core::error::ValidationError;
use morph_core::types::{PlanSpec, ServiceId, StepAction, StepId, StepSpec, TopologySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const REDUCE_FACTOR: f64 = 0.7;
const INCREASE_FACTOR: f64 = 1.3;

/// An accepted architectural recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// `merge_services`, `reduce_resources` or `increase_resources`
    pub action: String,
    #[serde(default)]
    pub services: Vec<ServiceId>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl Recommendation {
    #[must_use]
    pub fn new<I, S>(action: impl Into<String>, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ServiceId>,
    {
        Self {
            action: action.into(),
            services: services.into_iter().map(Into::into).collect(),
            description: None,
            confidence: None,
        }
    }

    /// Turn the recommendation into a plan spec against `topology`
    ///
    /// # Errors
    /// `UnsupportedRecommendation` for unknown actions or missing services,
    /// `UnknownService` when a scaled service is not in the topology.
    pub fn to_plan_spec(&self, topology: &TopologySnapshot) -> Result<PlanSpec, ValidationError> {
        let steps = match self.action.as_str() {
            "merge_services" => vec![self.merge_step()?],
            "reduce_resources" => self.scale_steps(topology, REDUCE_FACTOR)?,
            "increase_resources" => self.scale_steps(topology, INCREASE_FACTOR)?,
            other => return Err(ValidationError::UnsupportedRecommendation(other.to_string())),
        };

        let names: Vec<&str> = self.services.iter().map(ServiceId::as_str).collect();
        let mut spec = PlanSpec::new(format!("{} {}", self.action, names.join(", ")), steps);
        if let Some(description) = &self.description {
            spec = spec.with_description(description.clone());
        }
        spec.source_recommendation = Some(self.action.clone());
        Ok(spec)
    }

    fn merge_step(&self) -> Result<StepSpec, ValidationError> {
        let sources: BTreeSet<ServiceId> = self.services.iter().cloned().collect();
        if sources.len() < 2 {
            return Err(ValidationError::UnsupportedRecommendation(
                "merge_services needs at least two distinct services".into(),
            ));
        }
        let names: Vec<&str> = self.services.iter().map(ServiceId::as_str).collect();
        let merged = ServiceId::new(format!("merged_{}", names.join("_")));
        Ok(StepSpec::new("merge", StepAction::Merge { sources, merged }))
    }

    fn scale_steps(
        &self,
        topology: &TopologySnapshot,
        factor: f64,
    ) -> Result<Vec<StepSpec>, ValidationError> {
        if self.services.is_empty() {
            return Err(ValidationError::UnsupportedRecommendation(format!(
                "{} names no service",
                self.action
            )));
        }
        self.services
            .iter()
            .map(|service| -> Result<StepSpec, ValidationError> {
                let step = StepId::new(format!("scale-{service}"));
                let current = topology.service(service).ok_or_else(|| {
                    ValidationError::UnknownService {
                        step: step.clone(),
                        service: service.clone(),
                    }
                })?;
                Ok(StepSpec::new(
                    step,
                    StepAction::Scale {
                        service: service.clone(),
                        resource_allocation: current.resource_allocation.scaled(factor),
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_core::types::{ResourceAllocation, ServiceDescriptor};

    fn topology() -> TopologySnapshot {
        TopologySnapshot::empty()
            .with_service(
                ServiceDescriptor::new("orders").with_allocation(ResourceAllocation::new(1.0, 2.0)),
            )
            .with_service(ServiceDescriptor::new("users"))
    }

    #[test]
    fn merge_names_the_merged_service() {
        let spec = Recommendation::new("merge_services", ["orders", "users"])
            .to_plan_spec(&topology())
            .unwrap();
        assert_eq!(spec.steps.len(), 1);
        let StepAction::Merge { merged, .. } = &spec.steps[0].action else {
            panic!("expected merge");
        };
        assert_eq!(merged.as_str(), "merged_orders_users");
    }

    #[test]
    fn reduce_scales_down() {
        let spec = Recommendation::new("reduce_resources", ["orders"])
            .to_plan_spec(&topology())
            .unwrap();
        let StepAction::Scale {
            resource_allocation,
            ..
        } = &spec.steps[0].action
        else {
            panic!("expected scale");
        };
        assert!((resource_allocation.cpu - 0.7).abs() < 1e-9);
        assert!((resource_allocation.memory - 1.4).abs() < 1e-9);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = Recommendation::new("optimize_communication", ["orders", "users"])
            .to_plan_spec(&topology())
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedRecommendation(_)));
    }

    #[test]
    fn merge_needs_two_services() {
        assert!(Recommendation::new("merge_services", ["orders"])
            .to_plan_spec(&topology())
            .is_err());
    }
}

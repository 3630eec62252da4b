//! Sub-action saga primitives
//!
//! Every step is carried out as a sequence of small topology edits. Applying
//! an edit to a snapshot yields its exact inverse, computed from the state the
//! edit overwrote, so a step's compensation replays the recorded inverses in
//! reverse order and nothing is guessed.

use crate::error::TopologyError;
use crate::types::{RoutePattern, ServiceDescriptor, ServiceId, ServiceStatus, TopologySnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One externally applied topology edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SubAction {
    /// Stand up a new service
    Register { descriptor: ServiceDescriptor },
    /// Remove a service along with any routes still pointing at it
    Deregister { service: ServiceId },
    /// Re-register a removed service and the routes it owned
    Restore {
        descriptor: ServiceDescriptor,
        routes: BTreeMap<RoutePattern, ServiceId>,
    },
    /// Change lifecycle status (draining, re-activating)
    SetStatus {
        service: ServiceId,
        status: ServiceStatus,
    },
    /// Change resource allocation
    SetAllocation {
        service: ServiceId,
        allocation: crate::types::ResourceAllocation,
    },
    /// Atomically rewrite routing entries; `None` removes the entry
    RewriteRoutes {
        routes: BTreeMap<RoutePattern, Option<ServiceId>>,
    },
}

impl SubAction {
    /// Shorthand for draining a service
    #[must_use]
    pub fn drain(service: ServiceId) -> Self {
        SubAction::SetStatus {
            service,
            status: ServiceStatus::Draining,
        }
    }

    /// Service whose state this edit changes, if there is exactly one
    #[must_use]
    pub fn service(&self) -> Option<&ServiceId> {
        match self {
            SubAction::Register { descriptor } | SubAction::Restore { descriptor, .. } => {
                Some(&descriptor.id)
            }
            SubAction::Deregister { service }
            | SubAction::SetStatus { service, .. }
            | SubAction::SetAllocation { service, .. } => Some(service),
            SubAction::RewriteRoutes { .. } => None,
        }
    }

    /// Apply the edit to `topology` in place, returning its inverse
    ///
    /// # Errors
    /// Fails without modifying `topology` when the edit does not fit the
    /// current state (unknown service, duplicate registration, route to a
    /// missing service).
    pub fn apply(&self, topology: &mut TopologySnapshot) -> Result<SubAction, TopologyError> {
        match self {
            SubAction::Register { descriptor } => {
                if topology.contains(&descriptor.id) {
                    return Err(TopologyError::ServiceExists(descriptor.id.clone()));
                }
                topology
                    .services
                    .insert(descriptor.id.clone(), descriptor.clone());
                Ok(SubAction::Deregister {
                    service: descriptor.id.clone(),
                })
            }
            SubAction::Deregister { service } => {
                let descriptor = topology
                    .services
                    .remove(service)
                    .ok_or_else(|| TopologyError::UnknownService(service.clone()))?;
                let routes = topology.routes_to(service);
                topology.routing.retain(|_, target| target != service);
                Ok(SubAction::Restore { descriptor, routes })
            }
            SubAction::Restore { descriptor, routes } => {
                if topology.contains(&descriptor.id) {
                    return Err(TopologyError::ServiceExists(descriptor.id.clone()));
                }
                if let Some((pattern, target)) = routes
                    .iter()
                    .find(|(_, t)| **t != descriptor.id && !topology.contains(t))
                {
                    return Err(TopologyError::UnknownRouteTarget {
                        route: pattern.clone(),
                        service: target.clone(),
                    });
                }
                topology
                    .services
                    .insert(descriptor.id.clone(), descriptor.clone());
                for (pattern, target) in routes {
                    topology.routing.insert(pattern.clone(), target.clone());
                }
                Ok(SubAction::Deregister {
                    service: descriptor.id.clone(),
                })
            }
            SubAction::SetStatus { service, status } => {
                let descriptor = topology
                    .services
                    .get_mut(service)
                    .ok_or_else(|| TopologyError::UnknownService(service.clone()))?;
                let prior = std::mem::replace(&mut descriptor.status, *status);
                Ok(SubAction::SetStatus {
                    service: service.clone(),
                    status: prior,
                })
            }
            SubAction::SetAllocation {
                service,
                allocation,
            } => {
                let descriptor = topology
                    .services
                    .get_mut(service)
                    .ok_or_else(|| TopologyError::UnknownService(service.clone()))?;
                let prior = std::mem::replace(&mut descriptor.resource_allocation, *allocation);
                Ok(SubAction::SetAllocation {
                    service: service.clone(),
                    allocation: prior,
                })
            }
            SubAction::RewriteRoutes { routes } => {
                for (pattern, target) in routes {
                    if let Some(target) = target {
                        if !topology.contains(target) {
                            return Err(TopologyError::UnknownRouteTarget {
                                route: pattern.clone(),
                                service: target.clone(),
                            });
                        }
                    }
                }
                let mut prior = BTreeMap::new();
                for (pattern, target) in routes {
                    let previous = match target {
                        Some(target) => topology.routing.insert(pattern.clone(), target.clone()),
                        None => topology.routing.remove(pattern),
                    };
                    prior.insert(pattern.clone(), previous);
                }
                Ok(SubAction::RewriteRoutes { routes: prior })
            }
        }
    }
}

impl fmt::Display for SubAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubAction::Register { descriptor } => write!(f, "register {}", descriptor.id),
            SubAction::Deregister { service } => write!(f, "deregister {service}"),
            SubAction::Restore { descriptor, routes } => {
                write!(f, "restore {} ({} routes)", descriptor.id, routes.len())
            }
            SubAction::SetStatus { service, status } => write!(f, "set {service} {status:?}"),
            SubAction::SetAllocation {
                service,
                allocation,
            } => write!(
                f,
                "allocate {service} cpu={} memory={}",
                allocation.cpu, allocation.memory
            ),
            SubAction::RewriteRoutes { routes } => write!(f, "rewrite {} routes", routes.len()),
        }
    }
}

/// A sub-action that was externally applied and committed to the topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedSubAction {
    pub action: SubAction,
    /// Exact edit that undoes `action`
    pub inverse: SubAction,
    /// Topology version published by the commit
    pub topology_version: u64,
    pub applied_at: DateTime<Utc>,
}

//! Server configuration file
//!
//! TOML with three optional sections:
//!
//! ```toml
//! [server]
//! addr = "127.0.0.1:8080"
//!
//! [orchestrator]
//! step_timeout = 120000        # milliseconds
//! max_concurrent_steps = 4
//!
//! [orchestrator.health]
//! window = 30000
//!
//! [[topology.services]]
//! id = "payment-service"
//! capabilities = ["payments"]
//! resource_allocation = { cpu = 2.0, memory = 4.0 }
//!
//! [topology.routes]
//! "/payments" = "payment-service"
//! ```

use morph_core::config::OrchestratorConfig;
use morph_core::error::ConfigError;
use morph_core::types::{
    ResourceAllocation, RoutePattern, ServiceDescriptor, ServiceId, TopologySnapshot,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub orchestrator: OrchestratorConfig,
    pub topology: TopologySeed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub addr: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// Initial topology loaded at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologySeed {
    pub services: Vec<SeedService>,
    pub routes: BTreeMap<RoutePattern, ServiceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedService {
    pub id: ServiceId,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub resource_allocation: ResourceAllocation,
    #[serde(default)]
    pub dependencies: BTreeSet<ServiceId>,
}

impl TopologySeed {
    /// Version 0 snapshot of the seeded services and routes
    ///
    /// # Errors
    /// `Invalid` when a route points at a service that is not seeded.
    pub fn to_snapshot(&self) -> Result<TopologySnapshot, ConfigError> {
        let mut snapshot = TopologySnapshot::empty();
        for seed in &self.services {
            snapshot = snapshot.with_service(
                ServiceDescriptor::new(seed.id.clone())
                    .with_capabilities(seed.capabilities.iter().cloned())
                    .with_allocation(seed.resource_allocation)
                    .with_dependencies(seed.dependencies.iter().cloned()),
            );
        }
        for (pattern, service) in &self.routes {
            if !snapshot.contains(service) {
                return Err(ConfigError::Invalid(format!(
                    "route {pattern} points at unknown service {service}"
                )));
            }
            snapshot = snapshot.with_route(pattern.clone(), service.clone());
        }
        Ok(snapshot)
    }
}

impl ServerConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// `Parse` for malformed TOML, `Invalid` when validation fails.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.orchestrator.validate()?;
        config.topology.to_snapshot()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// `Parse` when the file cannot be read or parsed, `Invalid` when
    /// validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml(&source)
    }
}

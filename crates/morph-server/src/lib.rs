//! Morph Server - HTTP API and command line for the orchestrator
//!
//! - TOML configuration with a seeded initial topology
//! - warp routes over the orchestrator operations
//! - Scripted simulation of the core scenarios

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod http;
pub mod logging;
pub mod simulate;

pub use config::ServerConfig;
pub use simulate::{SimulationConfig, SimulationReport};

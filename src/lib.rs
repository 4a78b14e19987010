//! Aegis Mesh Simulator Library
//! =============================
//! Core library for the agent-swarm cyber-defense simulator.
//!
//! Copyright © 2025 Stephen Bilodeau. All rights reserved.
//! Licensed under GPL-3.0 with proprietary agent clauses.

// Re-export main modules
pub mod agent_framework;
pub mod attackers;
pub mod defense;
pub mod metrics;
pub mod network;
pub mod rng;
pub mod security_layer;
pub mod sim;

// Re-export key types for external use
pub use agent_framework::{Jid, Message, MessageBus, ShutdownSignal};
pub use sim::{FinalReport, Simulation, SimulationConfig};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the simulator library
pub fn init() {
    metrics::init_metrics();
    tracing::info!("Aegis mesh simulator v{} initialized", VERSION);
}

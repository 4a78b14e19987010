//! Simulation Harness
//! ===================
//! Configuration, topology building, agent wiring and the final report.

pub mod config;
pub mod harness;
pub mod report;
pub mod topology;

pub use config::{
    AttackKind, AttackerSpec, RouterTopology, ScheduledMessage, SimError, SimulationConfig,
};
pub use harness::Simulation;
pub use report::FinalReport;

//! Defense Plane
//! ==============
//! Monitoring agents that classify mirrored traffic and raise incidents, and
//! response agents that win those incidents through the Contract-Net auction
//! and execute mitigations.

pub mod incident;
pub mod monitor;
pub mod response;

pub use incident::{Incident, IncidentStatus, Proposal};
pub use monitor::{MonitorAgent, MonitorSnapshot};
pub use response::{ResponseAgent, ResponseSnapshot};

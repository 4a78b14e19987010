//! Security Layer
//! ===============
//! Firewall rule engine shared by nodes and routers, plus the threat
//! keyword scanners backing both firewall advisories and monitor detection.
//!
//! Copyright © 2025 Stephen Bilodeau. All rights reserved.
//! Licensed under GPL-3.0 with proprietary agent clauses.

pub mod firewall;
pub mod threat;

pub use firewall::{Firewall, FirewallCommand, FirewallKind};
pub use threat::ThreatType;

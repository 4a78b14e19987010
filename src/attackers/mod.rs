//! Attack Generators
//! ==================
//! Scripted adversaries driving the scenarios: volumetric DDoS bursts,
//! slow-and-low stealth malware, and a three-phase insider threat.
//!
//! Copyright © 2025 Stephen Bilodeau. All rights reserved.
//! Licensed under GPL-3.0 with proprietary agent clauses.

pub mod ddos;
pub mod insider;
pub mod stealth;

pub use ddos::DdosAttacker;
pub use insider::InsiderAttacker;
pub use stealth::StealthMalwareAttacker;

//! Simulation configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("report output failed: {0}")]
    ReportIo(#[from] std::io::Error),
}

/// How the routers are wired together
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterTopology {
    Ring,
    Mesh,
    Star,
    Line,
}

impl std::str::FromStr for RouterTopology {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ring" => Ok(RouterTopology::Ring),
            "mesh" => Ok(RouterTopology::Mesh),
            "star" => Ok(RouterTopology::Star),
            "line" => Ok(RouterTopology::Line),
            other => Err(SimError::InvalidTopology(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    Ddos,
    StealthMalware,
    InsiderThreat,
}

/// One scripted adversary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttackerSpec {
    pub kind: AttackKind,
    /// Target node indices as (router, node) pairs
    pub targets: Vec<(usize, usize)>,
    pub intensity: u8,
    pub duration_secs: u64,
    pub start_delay_secs: u64,
}

/// Benign traffic injected on a schedule (service pings, requests)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub src_router: usize,
    pub src_node: usize,
    pub dst_router: usize,
    pub dst_node: usize,
    pub body: String,
    pub delay_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub domain: String,
    pub num_routers: usize,
    pub nodes_per_router: usize,
    pub topology: RouterTopology,
    pub num_response_agents: usize,
    pub attackers: Vec<AttackerSpec>,
    pub scheduled_messages: Vec<ScheduledMessage>,
    pub deterministic_resources: bool,
    pub resource_seed_base: u64,
    pub base_cpu: f64,
    pub duration_secs: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            domain: "sim.local".to_string(),
            num_routers: 3,
            nodes_per_router: 2,
            topology: RouterTopology::Ring,
            num_response_agents: 2,
            attackers: Vec::new(),
            scheduled_messages: Vec::new(),
            deterministic_resources: true,
            resource_seed_base: 42,
            base_cpu: 10.0,
            duration_secs: 60,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.num_routers == 0 {
            return Err(SimError::InvalidConfig("need at least one router".into()));
        }
        if self.nodes_per_router == 0 {
            return Err(SimError::InvalidConfig(
                "need at least one node per router".into(),
            ));
        }
        if self.num_response_agents == 0 {
            return Err(SimError::InvalidConfig(
                "need at least one response agent".into(),
            ));
        }
        for attacker in &self.attackers {
            if !(1..=10).contains(&attacker.intensity) {
                return Err(SimError::InvalidConfig(format!(
                    "attacker intensity {} out of range 1..10",
                    attacker.intensity
                )));
            }
            for (r, n) in &attacker.targets {
                if *r >= self.num_routers || *n >= self.nodes_per_router {
                    return Err(SimError::InvalidConfig(format!(
                        "attack target ({}, {}) outside the topology",
                        r, n
                    )));
                }
            }
        }
        for msg in &self.scheduled_messages {
            if msg.src_router >= self.num_routers
                || msg.dst_router >= self.num_routers
                || msg.src_node >= self.nodes_per_router
                || msg.dst_node >= self.nodes_per_router
            {
                return Err(SimError::InvalidConfig(
                    "scheduled message endpoint outside the topology".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn router_jid(&self, idx: usize) -> String {
        format!("router{}@{}", idx, self.domain)
    }

    pub fn node_jid(&self, router: usize, node: usize) -> String {
        format!("router{}_node{}@{}", router, node, self.domain)
    }

    pub fn monitor_jid(&self, idx: usize) -> String {
        format!("monitor{}@{}", idx, self.domain)
    }

    pub fn response_jid(&self, idx: usize) -> String {
        format!("response{}@{}", idx, self.domain)
    }

    pub fn attacker_jid(&self, idx: usize) -> String {
        format!("attacker{}@{}", idx, self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_topology_parse() {
        assert_eq!("ring".parse::<RouterTopology>().unwrap(), RouterTopology::Ring);
        assert_eq!("MESH".parse::<RouterTopology>().unwrap(), RouterTopology::Mesh);
        assert!("torus".parse::<RouterTopology>().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_targets() {
        let mut config = SimulationConfig::default();
        config.attackers.push(AttackerSpec {
            kind: AttackKind::Ddos,
            targets: vec![(7, 0)],
            intensity: 3,
            duration_secs: 30,
            start_delay_secs: 5,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_intensity() {
        let mut config = SimulationConfig::default();
        config.attackers.push(AttackerSpec {
            kind: AttackKind::Ddos,
            targets: vec![(0, 0)],
            intensity: 11,
            duration_secs: 30,
            start_delay_secs: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jid_naming() {
        let config = SimulationConfig::default();
        assert_eq!(config.router_jid(1), "router1@sim.local");
        assert_eq!(config.node_jid(1, 0), "router1_node0@sim.local");
        assert_eq!(config.monitor_jid(2), "monitor2@sim.local");
        assert_eq!(config.response_jid(0), "response0@sim.local");
        assert_eq!(config.attacker_jid(0), "attacker0@sim.local");
    }
}

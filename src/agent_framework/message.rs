//! Message types for inter-agent communication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for an agent, of the form `localpart@domain`
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Jid(pub String);

impl Jid {
    pub fn new(jid: impl Into<String>) -> Self {
        Jid(jid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local part before the `@`, or the whole string when there is none
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }

    pub fn domain(&self) -> Option<&str> {
        self.0.split_once('@').map(|(_, d)| d)
    }

    /// Router prefix of a node or router JID: `router3_node0@d` -> `router3`
    pub fn router_prefix(&self) -> &str {
        let local = self.local_part();
        local.split('_').next().unwrap_or(local)
    }

    /// Parent router of a node JID: `router1_node0@d` -> `router1@d`
    pub fn parent_router(&self) -> Option<Jid> {
        let domain = self.domain()?;
        let prefix = self.router_prefix();
        if prefix == self.local_part() {
            return None;
        }
        Some(Jid(format!("{}@{}", prefix, domain)))
    }

    /// Node index of a node JID: `router1_node2@d` -> `Some(2)`
    pub fn node_index(&self) -> Option<usize> {
        let local = self.local_part();
        let (_, node_part) = local.split_once("_node")?;
        node_part.parse().ok()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Jid {
    fn from(s: &str) -> Self {
        Jid(s.to_string())
    }
}

/// Reserved metadata keys carried on the wire
pub mod meta {
    pub const PROTOCOL: &str = "protocol";
    pub const PERFORMATIVE: &str = "performative";
    pub const DST: &str = "dst";
    pub const VIA: &str = "via";
    pub const TTL: &str = "ttl";
    pub const ORIGINAL_SENDER: &str = "original_sender";
    pub const ORIGINAL_DESTINATION: &str = "original_destination";
    pub const TASK: &str = "task";
    pub const ATTACKER_INTENSITY: &str = "attacker_intensity";
    pub const SPREAD_INTENSITY: &str = "spread_intensity";
    pub const INCIDENT_ID: &str = "incident_id";
    pub const THREAT_TYPE: &str = "threat_type";
    pub const OFFENDER: &str = "offender";
    pub const OFFENDER_JID: &str = "offender_jid";
    pub const VICTIM_JID: &str = "victim_jid";
    pub const INTENSITY: &str = "intensity";
    pub const AVAILABILITY_SCORE: &str = "availability_score";
    pub const SEVERITY: &str = "severity";
    pub const STATUS: &str = "status";
}

/// Reserved protocol identifiers
pub mod protocol {
    pub const ATTACK: &str = "attack";
    pub const NETWORK_COPY: &str = "network-copy";
    pub const THREAT_ALERT: &str = "threat-alert";
    pub const MALWARE_INFECTION: &str = "malware-infection";
    pub const MALWARE_CURE: &str = "malware-cure";
    pub const WORM_PAYLOAD: &str = "worm-payload";
    pub const FIREWALL_CONTROL: &str = "firewall-control";
    pub const CNP_CFP: &str = "cnp-cfp";
    pub const CNP_PROPOSE: &str = "cnp-propose";
    pub const CNP_REFUSE: &str = "cnp-refuse";
    pub const CNP_ACCEPT: &str = "cnp-accept";
    pub const CNP_REJECT: &str = "cnp-reject";
    pub const CNP_INFORM: &str = "cnp-inform";
    pub const HEALTH_REPORT: &str = "health-report";
    pub const NODE_DEATH: &str = "node-death";
    pub const HEALTH_CHECK: &str = "health-check";
    pub const INCIDENT_RESPONSE: &str = "incident-response";
}

/// Contract-Net performatives
pub mod performative {
    pub const CFP: &str = "CFP";
    pub const PROPOSE: &str = "PROPOSE";
    pub const REFUSE: &str = "REFUSE";
    pub const ACCEPT_PROPOSAL: &str = "ACCEPT_PROPOSAL";
    pub const REJECT_PROPOSAL: &str = "REJECT_PROPOSAL";
    pub const INFORM: &str = "INFORM";
}

pub const DEFAULT_TTL: i64 = 64;

/// Resource cost attached to a message via the `task` metadata key
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// CPU load in percent while the task runs
    pub cpu_load: f64,
    /// Task lifetime in seconds
    pub duration: f64,
}

impl TaskSpec {
    pub fn new(cpu_load: f64, duration: f64) -> Self {
        TaskSpec { cpu_load, duration }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A message passed between agents over the bus
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Destination agent
    pub to: Jid,

    /// Source agent
    pub sender: Jid,

    /// Message body text
    pub body: String,

    /// String key/value metadata (protocol, performative, routing keys, ...)
    pub metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(to: Jid, sender: Jid, body: impl Into<String>) -> Self {
        Message {
            to,
            sender,
            body: body.into(),
            metadata: HashMap::new(),
        }
    }

    /// Set a metadata key (builder style)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_protocol(self, proto: &str) -> Self {
        self.with_metadata(meta::PROTOCOL, proto)
    }

    pub fn with_performative(self, perf: &str) -> Self {
        self.with_metadata(meta::PERFORMATIVE, perf)
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn protocol(&self) -> Option<&str> {
        self.get_metadata(meta::PROTOCOL)
    }

    pub fn performative(&self) -> Option<&str> {
        self.get_metadata(meta::PERFORMATIVE)
    }

    /// Final destination when forwarded, falling back to the addressed JID
    pub fn dst(&self) -> Jid {
        match self.get_metadata(meta::DST) {
            Some(d) => Jid::new(d),
            None => self.to.clone(),
        }
    }

    /// TTL parsed leniently; missing or malformed values fall back to 64
    pub fn ttl(&self) -> i64 {
        self.get_metadata(meta::TTL)
            .and_then(|t| t.parse().ok())
            .unwrap_or(DEFAULT_TTL)
    }

    /// The original sender of a forwarded packet, falling back to `sender`
    pub fn original_sender(&self) -> Jid {
        match self.get_metadata(meta::ORIGINAL_SENDER) {
            Some(s) => Jid::new(s),
            None => self.sender.clone(),
        }
    }

    /// Task payload parsed from the `task` metadata JSON; malformed input
    /// yields None rather than an error
    pub fn task(&self) -> Option<TaskSpec> {
        let raw = self.get_metadata(meta::TASK)?;
        serde_json::from_str(raw).ok()
    }

    /// Attacker intensity with a caller-supplied default
    pub fn attacker_intensity(&self, default: u8) -> u8 {
        self.get_metadata(meta::ATTACKER_INTENSITY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

//! Firewall Engine
//! ================
//! Inbound filtering, outbound checks and the runtime control protocol for
//! both node-level and router-level firewalls.
//!
//! Copyright © 2025 Stephen Bilodeau. All rights reserved.
//! Licensed under GPL-3.0 with proprietary agent clauses.

use crate::agent_framework::{protocol, Jid, Message, MessageBus};
use crate::metrics::FIREWALL_DENIALS_TOTAL;
use crate::security_layer::threat::scan_threat_keywords;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Which decision rules apply: routers judge by `original_sender` and skip
/// keyword checks for intra-subnet forwards
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirewallKind {
    Node,
    Router,
}

/// Per-sender rate limit window
#[derive(Clone, Debug)]
pub struct RateLimit {
    pub max_per_sec: u32,
    pub count: u32,
    pub last_reset: Instant,
}

/// Mutable rule storage shared by both firewall variants
#[derive(Default)]
pub struct RuleSet {
    pub blocked_jids: HashSet<String>,
    pub blocked_keywords: HashSet<String>,
    pub rate_limits: HashMap<String, RateLimit>,
    pub temp_blocks: HashMap<String, Instant>,
    pub suspended_accounts: HashSet<String>,
}

/// Firewall control command, parsed once at ingress
#[derive(Clone, Debug, PartialEq)]
pub enum FirewallCommand {
    BlockJid(String),
    UnblockJid(String),
    BlockKey(String),
    UnblockKey(String),
    RateLimit { jid: String, max_per_sec: u32 },
    TempBlock { jid: String, seconds: u64 },
    SuspendAccess(String),
    UnsuspendAccess(String),
    QuarantineAdvisory(String),
    List,
}

impl FirewallCommand {
    /// Parse a control command body. Errors carry the reply text.
    pub fn parse(body: &str) -> Result<Self, String> {
        let body = body.trim();
        let upper = body.to_uppercase();

        let arg = |prefix: &str| body[prefix.len()..].trim().to_string();

        if upper.starts_with("BLOCK_JID:") {
            return Ok(FirewallCommand::BlockJid(arg("BLOCK_JID:")));
        }
        if upper.starts_with("UNBLOCK_JID:") {
            return Ok(FirewallCommand::UnblockJid(arg("UNBLOCK_JID:")));
        }
        if upper.starts_with("BLOCK_KEY:") {
            return Ok(FirewallCommand::BlockKey(arg("BLOCK_KEY:")));
        }
        if upper.starts_with("UNBLOCK_KEY:") {
            return Ok(FirewallCommand::UnblockKey(arg("UNBLOCK_KEY:")));
        }
        if upper.starts_with("RATE_LIMIT:") {
            let mut parts = body.splitn(3, ':');
            parts.next();
            let jid = parts.next().map(str::trim).unwrap_or_default();
            let rate = parts.next().map(str::trim).unwrap_or_default();
            if jid.is_empty() || rate.is_empty() {
                return Err("Invalid RATE_LIMIT format (use RATE_LIMIT:jid:10msg/s)".into());
            }
            let digits = rate.to_uppercase().replace("MSG/S", "");
            let max_per_sec = digits
                .trim()
                .parse()
                .map_err(|_| format!("Invalid rate format: {}", rate))?;
            return Ok(FirewallCommand::RateLimit {
                jid: jid.to_string(),
                max_per_sec,
            });
        }
        if upper.starts_with("TEMP_BLOCK:") {
            let mut parts = body.splitn(3, ':');
            parts.next();
            let jid = parts.next().map(str::trim).unwrap_or_default();
            let dur = parts.next().map(str::trim).unwrap_or_default();
            if jid.is_empty() || dur.is_empty() {
                return Err("Invalid TEMP_BLOCK format (use TEMP_BLOCK:jid:15s)".into());
            }
            let digits = dur.to_uppercase().replace('S', "");
            let seconds = digits
                .trim()
                .parse()
                .map_err(|_| format!("Invalid duration format: {}", dur))?;
            return Ok(FirewallCommand::TempBlock {
                jid: jid.to_string(),
                seconds,
            });
        }
        if upper.starts_with("SUSPEND_ACCESS:") {
            return Ok(FirewallCommand::SuspendAccess(arg("SUSPEND_ACCESS:")));
        }
        if upper.starts_with("UNSUSPEND_ACCESS:") {
            return Ok(FirewallCommand::UnsuspendAccess(arg("UNSUSPEND_ACCESS:")));
        }
        if upper.starts_with("QUARANTINE_ADVISORY:") {
            return Ok(FirewallCommand::QuarantineAdvisory(arg("QUARANTINE_ADVISORY:")));
        }
        if upper == "LIST" {
            return Ok(FirewallCommand::List);
        }

        let head = body.split(':').next().unwrap_or(body);
        Err(format!("Unknown firewall command: {}", head))
    }

    /// Whether a plain payload body is a firewall control command
    pub fn is_control_body(body: &str) -> bool {
        const PREFIXES: [&str; 7] = [
            "BLOCK_JID:",
            "UNBLOCK_JID:",
            "RATE_LIMIT:",
            "TEMP_BLOCK:",
            "SUSPEND_ACCESS:",
            "UNSUSPEND_ACCESS:",
            "QUARANTINE_ADVISORY:",
        ];
        let upper = body.trim().to_uppercase();
        PREFIXES.iter().any(|p| upper.starts_with(p))
    }
}

/// Firewall attached to a single agent. Rules are owned here and mutated
/// only through control-command handling.
pub struct Firewall {
    owner: Jid,
    kind: FirewallKind,
    /// Node-side: the parent router that receives advisory threat alerts
    parent_router: Option<Jid>,
    /// Router-side: JIDs treated as intra-subnet for outbound bypass
    local_nodes: Mutex<HashSet<String>>,
    rules: Mutex<RuleSet>,
    bus: Arc<MessageBus>,
}

impl Firewall {
    pub fn new(owner: Jid, kind: FirewallKind, bus: Arc<MessageBus>) -> Self {
        Firewall {
            owner,
            kind,
            parent_router: None,
            local_nodes: Mutex::new(HashSet::new()),
            rules: Mutex::new(RuleSet::default()),
            bus,
        }
    }

    /// Configure the router that receives node-side threat alerts
    pub fn with_parent_router(mut self, router: Jid) -> Self {
        self.parent_router = Some(router);
        self
    }

    pub fn set_local_nodes(&self, nodes: impl IntoIterator<Item = Jid>) {
        let mut local = self.local_nodes.lock();
        local.clear();
        local.extend(nodes.into_iter().map(|j| j.0));
    }

    pub fn owner(&self) -> &Jid {
        &self.owner
    }

    /// Inbound decision. Rule order is the contract: the earliest matching
    /// rule wins. The trailing threat scan is advisory and never denies.
    pub async fn allow_message(&self, msg: &Message) -> bool {
        let sender = msg.sender.as_str();

        // Whitelist monitoring/response agents by role
        if sender.contains("response") || sender.contains("monitor") {
            return true;
        }

        // Don't scan control/alert traffic (prevents feedback loops)
        if let Some(proto) = msg.protocol() {
            if matches!(
                proto,
                protocol::FIREWALL_CONTROL | protocol::THREAT_ALERT | protocol::NETWORK_COPY
            ) {
                return true;
            }
        }

        // Routers judge the originator of forwarded packets, not the last hop
        let effective_sender = match self.kind {
            FirewallKind::Node => msg.sender.clone(),
            FirewallKind::Router => msg.original_sender(),
        };
        let effective = effective_sender.as_str();

        {
            let mut rules = self.rules.lock();
            let now = Instant::now();

            if rules.suspended_accounts.contains(effective) {
                FIREWALL_DENIALS_TOTAL.with_label_values(&["suspended"]).inc();
                return false;
            }

            if let Some(expiry) = rules.temp_blocks.get(effective).copied() {
                if now < expiry {
                    FIREWALL_DENIALS_TOTAL.with_label_values(&["temp_block"]).inc();
                    return false;
                }
                rules.temp_blocks.remove(effective);
            }

            if let Some(limit) = rules.rate_limits.get_mut(effective) {
                if now.duration_since(limit.last_reset) >= Duration::from_secs(1) {
                    limit.count = 0;
                    limit.last_reset = now;
                }
                limit.count += 1;
                if limit.count > limit.max_per_sec {
                    FIREWALL_DENIALS_TOTAL.with_label_values(&["rate_limit"]).inc();
                    return false;
                }
            }

            if rules.blocked_jids.contains(effective) {
                FIREWALL_DENIALS_TOTAL.with_label_values(&["blocked_jid"]).inc();
                return false;
            }

            if rules
                .blocked_keywords
                .iter()
                .any(|kw| !kw.is_empty() && msg.body.contains(kw))
            {
                FIREWALL_DENIALS_TOTAL.with_label_values(&["keyword"]).inc();
                return false;
            }
        }

        // Advisory threat scan: report to the parent router, let it through
        let detected = scan_threat_keywords(&msg.body);
        if !detected.is_empty() {
            if let Some(router) = &self.parent_router {
                let excerpt: String = msg.body.chars().take(100).collect();
                let alert = Message::new(
                    router.clone(),
                    self.owner.clone(),
                    format!(
                        "THREAT from {} to {}: {} - {}",
                        effective,
                        self.owner,
                        detected.join(", "),
                        excerpt
                    ),
                )
                .with_protocol(protocol::THREAT_ALERT);
                self.bus.send(alert);
                info!(
                    firewall = %self.owner,
                    sender = effective,
                    keywords = ?detected,
                    "threat detected, reported to parent router"
                );
            }
        }

        true
    }

    /// Outbound helper: apply blocklists and send on success. Routers skip
    /// keyword checks for intra-subnet forwards.
    pub async fn send_through(
        &self,
        to: &Jid,
        body: impl Into<String>,
        metadata: Vec<(String, String)>,
    ) -> bool {
        let body = body.into();

        let intra_subnet = self.kind == FirewallKind::Router && {
            let local = self.local_nodes.lock();
            local.contains(self.owner.as_str()) && local.contains(to.as_str())
        };

        if !intra_subnet {
            let rules = self.rules.lock();
            if rules.blocked_jids.contains(to.as_str()) {
                return false;
            }
            if rules
                .blocked_keywords
                .iter()
                .any(|kw| !kw.is_empty() && body.contains(kw))
            {
                return false;
            }
        }

        let mut msg = Message::new(to.clone(), self.owner.clone(), body);
        for (k, v) in metadata {
            msg.set_metadata(k, v);
        }
        self.bus.send(msg);
        true
    }

    /// Apply a control message and reply OK/ERROR to its sender
    pub async fn handle_control(&self, msg: &Message) {
        let reply_body = match FirewallCommand::parse(&msg.body) {
            Ok(cmd) => self.apply_command(cmd),
            Err(err) => {
                warn!(firewall = %self.owner, error = %err, "bad firewall command");
                format!("ERROR {}", err)
            }
        };

        let reply = Message::new(msg.sender.clone(), self.owner.clone(), reply_body)
            .with_protocol(protocol::FIREWALL_CONTROL);
        self.bus.send(reply);
    }

    /// Apply a parsed command to the rule set, returning the reply text
    pub fn apply_command(&self, cmd: FirewallCommand) -> String {
        let mut rules = self.rules.lock();
        match cmd {
            FirewallCommand::BlockJid(jid) => {
                rules.blocked_jids.insert(jid.clone());
                info!(firewall = %self.owner, jid = %jid, "JID blocked");
                format!("OK BLOCKED {}", jid)
            }
            FirewallCommand::UnblockJid(jid) => {
                rules.blocked_jids.remove(&jid);
                format!("OK UNBLOCKED {}", jid)
            }
            FirewallCommand::BlockKey(kw) => {
                rules.blocked_keywords.insert(kw.clone());
                format!("OK BLOCKED_KEY {}", kw)
            }
            FirewallCommand::UnblockKey(kw) => {
                rules.blocked_keywords.remove(&kw);
                format!("OK UNBLOCKED_KEY {}", kw)
            }
            FirewallCommand::RateLimit { jid, max_per_sec } => {
                rules.rate_limits.insert(
                    jid.clone(),
                    RateLimit {
                        max_per_sec,
                        count: 0,
                        last_reset: Instant::now(),
                    },
                );
                info!(firewall = %self.owner, jid = %jid, max_per_sec, "rate limit applied");
                format!("OK RATE_LIMITED {} to {} msg/s", jid, max_per_sec)
            }
            FirewallCommand::TempBlock { jid, seconds } => {
                rules
                    .temp_blocks
                    .insert(jid.clone(), Instant::now() + Duration::from_secs(seconds));
                info!(firewall = %self.owner, jid = %jid, seconds, "temporary block");
                format!("OK TEMP_BLOCKED {} for {}s", jid, seconds)
            }
            FirewallCommand::SuspendAccess(jid) => {
                rules.suspended_accounts.insert(jid.clone());
                info!(firewall = %self.owner, jid = %jid, "account suspended");
                format!("OK SUSPENDED {}", jid)
            }
            FirewallCommand::UnsuspendAccess(jid) => {
                rules.suspended_accounts.remove(&jid);
                format!("OK UNSUSPENDED {}", jid)
            }
            FirewallCommand::QuarantineAdvisory(id) => {
                debug!(firewall = %self.owner, incident = %id, "quarantine advisory acknowledged");
                "OK QUARANTINE_ACKNOWLEDGED".to_string()
            }
            FirewallCommand::List => {
                let now = Instant::now();
                let mut lines = vec!["BLOCKED_JIDS:".to_string()];
                lines.extend(rules.blocked_jids.iter().cloned());
                lines.push("BLOCKED_KEYWORDS:".to_string());
                lines.extend(rules.blocked_keywords.iter().cloned());
                lines.push("SUSPENDED_ACCOUNTS:".to_string());
                lines.extend(rules.suspended_accounts.iter().cloned());
                lines.push("RATE_LIMITS:".to_string());
                lines.extend(
                    rules
                        .rate_limits
                        .iter()
                        .map(|(jid, l)| format!("{}: {} msg/s", jid, l.max_per_sec)),
                );
                lines.push("TEMP_BLOCKS:".to_string());
                lines.extend(rules.temp_blocks.iter().map(|(jid, expiry)| {
                    let left = expiry.saturating_duration_since(now).as_secs_f64();
                    format!("{}: expires {:.1}s", jid, left)
                }));
                lines.join("\n")
            }
        }
    }

    // Inspection helpers for callers and tests

    pub fn is_blocked(&self, jid: &str) -> bool {
        self.rules.lock().blocked_jids.contains(jid)
    }

    pub fn is_suspended(&self, jid: &str) -> bool {
        self.rules.lock().suspended_accounts.contains(jid)
    }

    pub fn has_rate_limit(&self, jid: &str) -> bool {
        self.rules.lock().rate_limits.contains_key(jid)
    }

    pub fn blocked_jid_count(&self) -> usize {
        self.rules.lock().blocked_jids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_framework::{meta, MessageBus};

    fn node_firewall(bus: Arc<MessageBus>) -> Firewall {
        Firewall::new(Jid::new("router0_node0@sim"), FirewallKind::Node, bus)
    }

    fn attack_msg(sender: &str, body: &str) -> Message {
        Message::new(Jid::new("router0_node0@sim"), Jid::new(sender), body)
            .with_protocol(protocol::ATTACK)
    }

    #[tokio::test]
    async fn test_role_whitelist_beats_blocklist() {
        let bus = MessageBus::new();
        let fw = node_firewall(bus);
        fw.apply_command(FirewallCommand::BlockJid("response0@sim".into()));

        let msg = attack_msg("response0@sim", "anything");
        assert!(fw.allow_message(&msg).await);
    }

    #[tokio::test]
    async fn test_control_protocol_whitelisted() {
        let bus = MessageBus::new();
        let fw = node_firewall(bus);
        fw.apply_command(FirewallCommand::BlockJid("attacker0@sim".into()));

        let msg = Message::new(
            Jid::new("router0_node0@sim"),
            Jid::new("attacker0@sim"),
            "BLOCK_JID:x@sim",
        )
        .with_protocol(protocol::FIREWALL_CONTROL);
        assert!(fw.allow_message(&msg).await);
    }

    #[tokio::test]
    async fn test_blocked_jid_denied() {
        let bus = MessageBus::new();
        let fw = node_firewall(bus);
        fw.apply_command(FirewallCommand::BlockJid("attacker0@sim".into()));
        assert!(!fw.allow_message(&attack_msg("attacker0@sim", "hi")).await);
        assert!(fw.allow_message(&attack_msg("other@sim", "hi")).await);
    }

    #[tokio::test]
    async fn test_block_idempotent_unblock_noop() {
        let bus = MessageBus::new();
        let fw = node_firewall(bus);
        fw.apply_command(FirewallCommand::BlockJid("x@sim".into()));
        fw.apply_command(FirewallCommand::BlockJid("x@sim".into()));
        assert_eq!(fw.blocked_jid_count(), 1);

        fw.apply_command(FirewallCommand::UnblockJid("never-blocked@sim".into()));
        assert_eq!(fw.blocked_jid_count(), 1);
        fw.apply_command(FirewallCommand::UnblockJid("x@sim".into()));
        assert_eq!(fw.blocked_jid_count(), 0);
    }

    #[tokio::test]
    async fn test_suspension_checked_before_blocklist() {
        let bus = MessageBus::new();
        let fw = node_firewall(bus);
        fw.apply_command(FirewallCommand::SuspendAccess("insider@sim".into()));
        assert!(!fw.allow_message(&attack_msg("insider@sim", "hello")).await);

        fw.apply_command(FirewallCommand::UnsuspendAccess("insider@sim".into()));
        assert!(fw.allow_message(&attack_msg("insider@sim", "hello")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_temp_block_expires() {
        let bus = MessageBus::new();
        let fw = node_firewall(bus);
        fw.apply_command(FirewallCommand::TempBlock {
            jid: "attacker0@sim".into(),
            seconds: 15,
        });
        assert!(!fw.allow_message(&attack_msg("attacker0@sim", "x")).await);

        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(fw.allow_message(&attack_msg("attacker0@sim", "x")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_window() {
        let bus = MessageBus::new();
        let fw = node_firewall(bus);
        fw.apply_command(FirewallCommand::RateLimit {
            jid: "flooder@sim".into(),
            max_per_sec: 3,
        });

        for _ in 0..3 {
            assert!(fw.allow_message(&attack_msg("flooder@sim", "p")).await);
        }
        assert!(!fw.allow_message(&attack_msg("flooder@sim", "p")).await);

        // window resets exactly at the 1.0 s boundary
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(fw.allow_message(&attack_msg("flooder@sim", "p")).await);
    }

    #[tokio::test]
    async fn test_keyword_block() {
        let bus = MessageBus::new();
        let fw = node_firewall(bus);
        fw.apply_command(FirewallCommand::BlockKey("secret-plans".into()));
        assert!(!fw.allow_message(&attack_msg("x@sim", "send secret-plans now")).await);
        assert!(fw.allow_message(&attack_msg("x@sim", "send plans now")).await);
    }

    #[tokio::test]
    async fn test_threat_scan_is_advisory_and_reports() {
        let bus = MessageBus::new();
        let router = Jid::new("router0@sim");
        let mut router_inbox = bus.register(&router);
        let fw = Firewall::new(
            Jid::new("router0_node0@sim"),
            FirewallKind::Node,
            bus.clone(),
        )
        .with_parent_router(router.clone());

        let msg = attack_msg("attacker0@sim", "installing trojan malware");
        assert!(fw.allow_message(&msg).await, "threat scan must not deny");

        let alert = router_inbox
            .recv_timeout(Duration::from_millis(100))
            .await
            .expect("alert expected");
        assert_eq!(alert.protocol(), Some(protocol::THREAT_ALERT));
        assert!(alert.body.starts_with("THREAT from attacker0@sim"));
        assert!(alert.body.contains("malware"));
        assert!(alert.body.contains("trojan"));
    }

    #[tokio::test]
    async fn test_router_judges_original_sender() {
        let bus = MessageBus::new();
        let fw = Firewall::new(Jid::new("router1@sim"), FirewallKind::Router, bus);
        fw.apply_command(FirewallCommand::BlockJid("attacker0@sim".into()));

        // Forwarded by router0, originated by the blocked attacker
        let msg = Message::new(Jid::new("router1@sim"), Jid::new("router0@sim"), "hi")
            .with_protocol(protocol::ATTACK)
            .with_metadata(meta::ORIGINAL_SENDER, "attacker0@sim");
        assert!(!fw.allow_message(&msg).await);

        // Same body straight from router0 passes
        let direct = Message::new(Jid::new("router1@sim"), Jid::new("router0@sim"), "hi")
            .with_protocol(protocol::ATTACK);
        assert!(fw.allow_message(&direct).await);
    }

    #[tokio::test]
    async fn test_router_outbound_intra_subnet_bypass() {
        let bus = MessageBus::new();
        let node = Jid::new("router0_node0@sim");
        let mut node_inbox = bus.register(&node);
        let fw = Firewall::new(Jid::new("router0@sim"), FirewallKind::Router, bus);
        fw.set_local_nodes([Jid::new("router0@sim"), node.clone()]);
        fw.apply_command(FirewallCommand::BlockKey("worm".into()));

        // keyword would block an external send, but not a local forward
        assert!(fw.send_through(&node, "worm payload", vec![]).await);
        assert!(node_inbox.recv_timeout(Duration::from_millis(100)).await.is_some());

        let external = Jid::new("router9_node0@sim");
        assert!(!fw.send_through(&external, "worm payload", vec![]).await);
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(
            FirewallCommand::parse("BLOCK_JID:attacker0@sim").unwrap(),
            FirewallCommand::BlockJid("attacker0@sim".into())
        );
        assert_eq!(
            FirewallCommand::parse("rate_limit:node@sim:10msg/s").unwrap(),
            FirewallCommand::RateLimit {
                jid: "node@sim".into(),
                max_per_sec: 10
            }
        );
        assert_eq!(
            FirewallCommand::parse("TEMP_BLOCK:node@sim:15s").unwrap(),
            FirewallCommand::TempBlock {
                jid: "node@sim".into(),
                seconds: 15
            }
        );
        assert_eq!(FirewallCommand::parse("LIST").unwrap(), FirewallCommand::List);
        assert!(FirewallCommand::parse("RATE_LIMIT:node@sim:fastmsg/s").is_err());
        assert!(FirewallCommand::parse("MAKE_COFFEE:now").is_err());
    }

    #[test]
    fn test_is_control_body() {
        assert!(FirewallCommand::is_control_body("BLOCK_JID:x@sim"));
        assert!(FirewallCommand::is_control_body("rate_limit:x@sim:10msg/s"));
        assert!(!FirewallCommand::is_control_body("PING"));
        assert!(!FirewallCommand::is_control_body("CURE_INFECTION"));
    }
}

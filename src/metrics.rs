//! Prometheus metrics for the defense simulator
//!
//! This module provides metrics collection for:
//! - Bus delivery and drop counts
//! - Router forwarding, mirroring and drop reasons
//! - Threat detection and evasion events
//! - Contract-Net auctions and mitigation outcomes

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

lazy_static! {
    pub static ref METRICS_REGISTRY: prometheus::Registry = {
        let registry = prometheus::Registry::new();

        registry.register(Box::new(MESSAGES_DELIVERED_TOTAL.clone())).unwrap();
        registry.register(Box::new(MESSAGES_DROPPED_TOTAL.clone())).unwrap();
        registry.register(Box::new(PACKETS_FORWARDED_TOTAL.clone())).unwrap();
        registry.register(Box::new(PACKETS_DROPPED_TOTAL.clone())).unwrap();
        registry.register(Box::new(PACKETS_MIRRORED_TOTAL.clone())).unwrap();
        registry.register(Box::new(FIREWALL_DENIALS_TOTAL.clone())).unwrap();
        registry.register(Box::new(THREAT_EVENTS_TOTAL.clone())).unwrap();
        registry.register(Box::new(DETECTION_EVASIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(CNP_AUCTIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(CNP_REFUSALS_TOTAL.clone())).unwrap();
        registry.register(Box::new(MITIGATIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(NODES_DEAD_TOTAL.clone())).unwrap();
        registry.register(Box::new(AGENTS_ACTIVE.clone())).unwrap();

        registry
    };

    // Bus metrics
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = IntCounter::new(
        "aegis_messages_delivered_total",
        "Total messages delivered by the bus"
    ).unwrap();

    pub static ref MESSAGES_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("aegis_messages_dropped_total", "Messages dropped by the bus"),
        &["reason"]
    ).unwrap();

    // Router metrics
    pub static ref PACKETS_FORWARDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("aegis_packets_forwarded_total", "Packets forwarded by routers"),
        &["hop"]
    ).unwrap();

    pub static ref PACKETS_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("aegis_packets_dropped_total", "Packets dropped in the forwarding plane"),
        &["reason"]
    ).unwrap();

    pub static ref PACKETS_MIRRORED_TOTAL: IntCounter = IntCounter::new(
        "aegis_packets_mirrored_total",
        "Traffic copies delivered to monitoring agents"
    ).unwrap();

    // Firewall / detection metrics
    pub static ref FIREWALL_DENIALS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("aegis_firewall_denials_total", "Inbound messages denied by firewalls"),
        &["rule"]
    ).unwrap();

    pub static ref THREAT_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("aegis_threat_events_total", "Threat detection events"),
        &["threat_type"]
    ).unwrap();

    pub static ref DETECTION_EVASIONS_TOTAL: IntCounter = IntCounter::new(
        "aegis_detection_evasions_total",
        "Suspicious events that evaded the probabilistic detector"
    ).unwrap();

    // Contract-Net metrics
    pub static ref CNP_AUCTIONS_TOTAL: IntCounter = IntCounter::new(
        "aegis_cnp_auctions_total",
        "Incident-response auctions initiated"
    ).unwrap();

    pub static ref CNP_REFUSALS_TOTAL: IntCounter = IntCounter::new(
        "aegis_cnp_refusals_total",
        "CFPs refused by saturated responders"
    ).unwrap();

    pub static ref MITIGATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("aegis_mitigations_total", "Mitigations executed by responders"),
        &["outcome"]
    ).unwrap();

    // Lifecycle metrics
    pub static ref NODES_DEAD_TOTAL: IntCounter = IntCounter::new(
        "aegis_nodes_dead_total",
        "Nodes crashed by CPU saturation"
    ).unwrap();

    pub static ref AGENTS_ACTIVE: IntGauge = IntGauge::new(
        "aegis_agents_active",
        "Agents currently running"
    ).unwrap();
}

/// Initialize metrics with default values
pub fn init_metrics() {
    AGENTS_ACTIVE.set(0);
    MESSAGES_DROPPED_TOTAL.with_label_values(&["unknown_receiver"]).reset();
}

/// Render the registry in Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&METRICS_REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

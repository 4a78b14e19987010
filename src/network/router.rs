//! Router Agent
//! =============
//! Forwarding plane for a subnet: inbound firewalling, TTL handling, traffic
//! mirroring to monitors, cost-aware next-hop selection and periodic resource
//! accounting.
//!
//! Copyright © 2025 Stephen Bilodeau. All rights reserved.
//! Licensed under GPL-3.0 with proprietary agent clauses.

use crate::agent_framework::{
    meta, protocol, Jid, Mailbox, Message, MessageBus, ShutdownSignal,
};
use crate::metrics::{PACKETS_DROPPED_TOTAL, PACKETS_FORWARDED_TOTAL, PACKETS_MIRRORED_TOTAL};
use crate::network::routing::{best_next_hop, NeighborLoad, NeighborMap, RoutingTable};
use crate::security_layer::{Firewall, FirewallKind};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const BASE_CPU: f64 = 15.0;
const BASE_BW: f64 = 8.0;
const RESOURCE_PERIOD: Duration = Duration::from_secs(2);
/// Pause between mirroring and forwarding so monitors can react to a burst
/// while it is still in flight. Timing contract, not an implementation detail.
const MIRROR_DELAY: Duration = Duration::from_millis(300);

/// Metadata keys the forwarding plane owns; everything else is payload
/// metadata and gets preserved on forwards
const ROUTING_KEYS: [&str; 4] = [meta::DST, meta::VIA, meta::TTL, meta::ORIGINAL_SENDER];

/// Metadata preserved on monitor copies alongside the mirror envelope
const MIRROR_KEYS: [&str; 3] = [meta::ATTACKER_INTENSITY, meta::TASK, meta::SPREAD_INTENSITY];

struct RouterShared {
    local_nodes: HashSet<String>,
    routing_table: RoutingTable,
    neighbors: NeighborMap,
    monitor_jids: Vec<Jid>,
    internal_monitor_jids: Vec<Jid>,
    cpu_usage: f64,
    bandwidth_usage: f64,
}

/// Read-only sample for the final report
#[derive(Clone, Debug)]
pub struct RouterSnapshot {
    pub jid: Jid,
    pub cpu_usage: f64,
    pub bandwidth_usage: f64,
    pub local_nodes: Vec<String>,
}

pub struct RouterConfig {
    pub jid: Jid,
    pub local_nodes: Vec<Jid>,
    pub monitor_jids: Vec<Jid>,
    pub internal_monitor_jids: Vec<Jid>,
    pub neighbors: Vec<Jid>,
    pub routes: Vec<(String, Jid)>,
}

pub struct RouterAgent {
    jid: Jid,
    shared: Mutex<RouterShared>,
    messages_routed: AtomicU64,
    firewall: Firewall,
    bus: Arc<MessageBus>,
    shutdown: ShutdownSignal,
}

impl RouterAgent {
    pub fn new(config: RouterConfig, bus: Arc<MessageBus>, shutdown: ShutdownSignal) -> Arc<Self> {
        let firewall = Firewall::new(config.jid.clone(), FirewallKind::Router, bus.clone());

        // The router itself counts as local so the outbound helper can apply
        // the intra-subnet bypass for router -> node forwards
        let mut fw_local: Vec<Jid> = config.local_nodes.clone();
        fw_local.push(config.jid.clone());
        firewall.set_local_nodes(fw_local);

        let mut routing_table = RoutingTable::new();
        for (pattern, next_hop) in config.routes {
            routing_table.add_route(pattern, next_hop);
        }
        let mut neighbors = NeighborMap::new();
        for n in config.neighbors {
            neighbors.add_neighbor(n);
        }

        Arc::new(RouterAgent {
            jid: config.jid,
            shared: Mutex::new(RouterShared {
                local_nodes: config.local_nodes.into_iter().map(|j| j.0).collect(),
                routing_table,
                neighbors,
                monitor_jids: config.monitor_jids,
                internal_monitor_jids: config.internal_monitor_jids,
                cpu_usage: BASE_CPU,
                bandwidth_usage: BASE_BW,
            }),
            messages_routed: AtomicU64::new(0),
            firewall,
            bus,
            shutdown,
        })
    }

    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn firewall(&self) -> &Firewall {
        &self.firewall
    }

    pub fn snapshot(&self) -> RouterSnapshot {
        let shared = self.shared.lock();
        RouterSnapshot {
            jid: self.jid.clone(),
            cpu_usage: shared.cpu_usage,
            bandwidth_usage: shared.bandwidth_usage,
            local_nodes: shared.local_nodes.iter().cloned().collect(),
        }
    }

    /// Update a neighbor's reported load for next-hop cost weighting
    pub fn update_neighbor_load(&self, neighbor: &Jid, load: NeighborLoad) {
        self.shared.lock().neighbors.update_load(neighbor, load);
    }

    pub fn spawn(self: &Arc<Self>, mailbox: Mailbox) {
        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.recv_loop(mailbox).await });

        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.resource_loop().await });

        let shared = self.shared.lock();
        info!(
            router = %self.jid,
            local_nodes = shared.local_nodes.len(),
            neighbors = shared.neighbors.len(),
            "router agent started"
        );
    }

    async fn recv_loop(self: Arc<Self>, mut mailbox: Mailbox) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                msg = mailbox.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },
            }
        }
        debug!(router = %self.jid, "routing behaviour stopped");
    }

    pub async fn handle_message(self: &Arc<Self>, msg: Message) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);

        match msg.protocol() {
            Some(protocol::NODE_DEATH) => {
                self.handle_node_death(&msg);
                return;
            }
            // Alerts and infection notices are fanned out to the monitors
            // with their auction metadata intact, never forwarded as traffic
            Some(protocol::THREAT_ALERT) | Some(protocol::MALWARE_INFECTION) => {
                self.fan_out_alert(&msg);
                return;
            }
            Some(protocol::FIREWALL_CONTROL) => {
                self.firewall.handle_control(&msg).await;
                return;
            }
            _ => {}
        }

        if !self.firewall.allow_message(&msg).await {
            debug!(router = %self.jid, sender = %msg.sender, "firewall blocked inbound message");
            PACKETS_DROPPED_TOTAL.with_label_values(&["firewall"]).inc();
            return;
        }

        let dst = match msg.get_metadata(meta::DST) {
            Some(d) => Jid::new(d),
            None if msg.to != self.jid => msg.to.clone(),
            None => {
                debug!(router = %self.jid, sender = %msg.sender, "message missing dst metadata; dropping");
                PACKETS_DROPPED_TOTAL.with_label_values(&["no_dst"]).inc();
                return;
            }
        };

        // Decrement-then-test: a packet arriving with TTL 1 still makes the
        // next hop, one arriving with TTL 0 does not
        let ttl = msg.ttl();
        if ttl <= 0 {
            warn!(router = %self.jid, dst = %dst, "TTL expired; dropping packet");
            PACKETS_DROPPED_TOTAL.with_label_values(&["ttl"]).inc();
            return;
        }
        let ttl = ttl - 1;

        let original_sender = msg.original_sender();

        self.mirror_to_monitors(&msg, &dst, &original_sender).await;

        // Give monitors time to react before the packet lands
        tokio::time::sleep(MIRROR_DELAY).await;

        self.forward(&msg, &dst, ttl, &original_sender).await;
    }

    fn handle_node_death(&self, msg: &Message) {
        let dead = msg.sender.as_str();
        let mut shared = self.shared.lock();
        if shared.local_nodes.remove(dead) {
            info!(router = %self.jid, node = dead, "node reported death, removed from local nodes");
        }
    }

    fn fan_out_alert(&self, msg: &Message) {
        let monitors = self.shared.lock().monitor_jids.clone();
        for monitor in monitors {
            let mut copy = Message::new(monitor.clone(), self.jid.clone(), msg.body.clone());
            if let Some(proto) = msg.protocol() {
                copy.set_metadata(meta::PROTOCOL, proto);
            }
            for key in [
                meta::OFFENDER,
                meta::DST,
                meta::THREAT_TYPE,
                meta::ATTACKER_INTENSITY,
            ] {
                if let Some(v) = msg.get_metadata(key) {
                    copy.set_metadata(key, v);
                }
            }
            self.bus.send(copy);
            debug!(router = %self.jid, monitor = %monitor, "forwarded alert to monitor");
        }
    }

    async fn mirror_to_monitors(&self, msg: &Message, dst: &Jid, original_sender: &Jid) {
        let (targets, is_internal) = {
            let shared = self.shared.lock();
            let sender_local = shared.local_nodes.contains(msg.sender.as_str());
            let dst_local = shared.local_nodes.contains(dst.as_str());
            let is_internal = sender_local && dst_local;
            let targets = if is_internal && !shared.internal_monitor_jids.is_empty() {
                shared.internal_monitor_jids.clone()
            } else {
                shared.monitor_jids.clone()
            };
            (targets, is_internal)
        };

        for monitor in targets {
            let mut copy_meta: Vec<(String, String)> = vec![
                (meta::PROTOCOL.into(), protocol::NETWORK_COPY.into()),
                (meta::ORIGINAL_SENDER.into(), original_sender.0.clone()),
                (meta::ORIGINAL_DESTINATION.into(), dst.0.clone()),
            ];
            for key in MIRROR_KEYS {
                if let Some(v) = msg.get_metadata(key) {
                    copy_meta.push((key.into(), v.into()));
                }
            }
            if self
                .firewall
                .send_through(&monitor, msg.body.clone(), copy_meta)
                .await
            {
                PACKETS_MIRRORED_TOTAL.inc();
                debug!(
                    router = %self.jid,
                    monitor = %monitor,
                    internal = is_internal,
                    "mirrored packet to monitor"
                );
            }
        }
    }

    async fn forward(&self, msg: &Message, dst: &Jid, ttl: i64, original_sender: &Jid) {
        let is_local = self.shared.lock().local_nodes.contains(dst.as_str());

        if is_local {
            let mut fwd_meta: Vec<(String, String)> = vec![
                (meta::VIA.into(), self.jid.0.clone()),
                (meta::TTL.into(), ttl.to_string()),
                (meta::ORIGINAL_SENDER.into(), original_sender.0.clone()),
            ];
            for (key, value) in &msg.metadata {
                if !ROUTING_KEYS.contains(&key.as_str()) {
                    fwd_meta.push((key.clone(), value.clone()));
                }
            }
            if self
                .firewall
                .send_through(dst, msg.body.clone(), fwd_meta)
                .await
            {
                PACKETS_FORWARDED_TOTAL.with_label_values(&["local"]).inc();
                debug!(router = %self.jid, dst = %dst, "forwarded locally");
            } else {
                PACKETS_DROPPED_TOTAL.with_label_values(&["firewall_out"]).inc();
                debug!(router = %self.jid, dst = %dst, "outbound firewall blocked local delivery");
            }
            return;
        }

        let next_hop = {
            let shared = self.shared.lock();
            best_next_hop(&self.jid, &shared.neighbors, dst)
                .or_else(|| shared.routing_table.lookup(dst.as_str()).cloned())
        };

        let next_hop = match next_hop {
            Some(hop) => hop,
            None => {
                warn!(router = %self.jid, dst = %dst, "no route; dropping packet");
                PACKETS_DROPPED_TOTAL.with_label_values(&["no_route"]).inc();
                return;
            }
        };

        let mut fwd_meta: Vec<(String, String)> = vec![
            (meta::DST.into(), dst.0.clone()),
            (meta::VIA.into(), self.jid.0.clone()),
            (meta::TTL.into(), ttl.to_string()),
            (meta::ORIGINAL_SENDER.into(), original_sender.0.clone()),
        ];
        for (key, value) in &msg.metadata {
            if !ROUTING_KEYS.contains(&key.as_str()) {
                fwd_meta.push((key.clone(), value.clone()));
            }
        }

        if self
            .firewall
            .send_through(&next_hop, msg.body.clone(), fwd_meta)
            .await
        {
            PACKETS_FORWARDED_TOTAL.with_label_values(&["next_hop"]).inc();
            debug!(router = %self.jid, dst = %dst, next_hop = %next_hop, "forwarded to next hop");
        } else {
            PACKETS_DROPPED_TOTAL.with_label_values(&["firewall_out"]).inc();
            debug!(router = %self.jid, next_hop = %next_hop, "outbound firewall blocked forward");
        }
    }

    async fn resource_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(RESOURCE_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {}
            }
            self.resource_tick();
        }
    }

    /// Load scales with routing activity since the last period
    fn resource_tick(&self) {
        let routed = self.messages_routed.swap(0, Ordering::Relaxed);
        let cpu = (BASE_CPU + routed as f64 * 2.0).min(100.0);
        let bw = (BASE_BW + routed as f64 * 1.5).min(100.0);

        let mut shared = self.shared.lock();
        shared.cpu_usage = cpu;
        shared.bandwidth_usage = bw;
        if routed > 0 {
            debug!(
                router = %self.jid,
                cpu,
                bw,
                msgs_routed = routed,
                "resource update"
            );
        }
    }
}

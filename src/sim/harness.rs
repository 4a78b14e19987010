//! Simulation Harness
//! ===================
//! Builds the topology, wires every agent onto the bus, launches attackers
//! and scheduled traffic, and collects the final report.
//!
//! Copyright © 2025 Stephen Bilodeau. All rights reserved.
//! Licensed under GPL-3.0 with proprietary agent clauses.

use crate::agent_framework::{meta, Jid, Message, MessageBus, ShutdownSignal};
use crate::attackers::{DdosAttacker, InsiderAttacker, StealthMalwareAttacker};
use crate::defense::{MonitorAgent, ResponseAgent};
use crate::metrics::AGENTS_ACTIVE;
use crate::network::{NodeAgent, NodeConfig, RouterAgent, RouterConfig};
use crate::rng::SimRng;
use crate::sim::config::{AttackKind, SimError, SimulationConfig};
use crate::sim::report::FinalReport;
use crate::sim::topology::{router_neighbors, static_routes};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Simulation { config })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run the scenario to completion and produce the final report
    pub async fn run(self) -> Result<FinalReport, SimError> {
        let config = self.config;
        let bus = MessageBus::new();
        let shutdown = ShutdownSignal::new();
        let rng = if config.deterministic_resources {
            SimRng::seeded(config.resource_seed_base)
        } else {
            SimRng::from_entropy()
        };

        let all_node_jids: Vec<Jid> = (0..config.num_routers)
            .flat_map(|r| {
                (0..config.nodes_per_router).map(move |n| (r, n))
            })
            .map(|(r, n)| Jid::new(config.node_jid(r, n)))
            .collect();
        let all_router_jids: Vec<Jid> = (0..config.num_routers)
            .map(|r| Jid::new(config.router_jid(r)))
            .collect();

        // Responders may issue firewall commands to every node and router
        let mut protected: Vec<Jid> = all_node_jids.clone();
        protected.extend(all_router_jids.iter().cloned());

        let response_jids: Vec<Jid> = (0..config.num_response_agents)
            .map(|i| Jid::new(config.response_jid(i)))
            .collect();

        // Defense first, then the network, attackers last
        let mut responders = Vec::new();
        for jid in &response_jids {
            let mailbox = bus.register(jid);
            let agent = ResponseAgent::new(
                jid.clone(),
                protected.clone(),
                bus.clone(),
                rng.clone(),
                shutdown.clone(),
            );
            agent.spawn(mailbox);
            AGENTS_ACTIVE.inc();
            responders.push(agent);
        }

        let mut monitors = Vec::new();
        for r in 0..config.num_routers {
            let jid = Jid::new(config.monitor_jid(r));
            let mailbox = bus.register(&jid);
            let agent = MonitorAgent::new(
                jid,
                response_jids.clone(),
                bus.clone(),
                rng.clone(),
                shutdown.clone(),
            );
            agent.spawn(mailbox);
            AGENTS_ACTIVE.inc();
            monitors.push(agent);
        }

        let adjacency = router_neighbors(config.topology, config.num_routers);
        let mut routers = Vec::new();
        for r in 0..config.num_routers {
            let jid = Jid::new(config.router_jid(r));
            let local_nodes: Vec<Jid> = (0..config.nodes_per_router)
                .map(|n| Jid::new(config.node_jid(r, n)))
                .collect();
            let monitor = Jid::new(config.monitor_jid(r));
            let router_config = RouterConfig {
                jid: jid.clone(),
                local_nodes,
                monitor_jids: vec![monitor.clone()],
                internal_monitor_jids: vec![monitor],
                neighbors: adjacency[r]
                    .iter()
                    .map(|n| Jid::new(config.router_jid(*n)))
                    .collect(),
                routes: static_routes(&config, &adjacency, r),
            };
            let mailbox = bus.register(&jid);
            let agent = RouterAgent::new(router_config, bus.clone(), shutdown.clone());
            agent.spawn(mailbox);
            AGENTS_ACTIVE.inc();
            routers.push(agent);
        }

        let mut nodes = Vec::new();
        for r in 0..config.num_routers {
            for n in 0..config.nodes_per_router {
                let jid = Jid::new(config.node_jid(r, n));
                let subnet_peers: Vec<Jid> = (0..config.nodes_per_router)
                    .filter(|other| *other != n)
                    .map(|other| Jid::new(config.node_jid(r, other)))
                    .collect();
                let mut node_config = NodeConfig::new(
                    jid.clone(),
                    Jid::new(config.router_jid(r)),
                    Jid::new(config.monitor_jid(r)),
                    subnet_peers,
                );
                node_config.base_cpu = config.base_cpu;
                let mailbox = bus.register(&jid);
                let agent = NodeAgent::new(node_config, bus.clone(), rng.clone(), shutdown.clone());
                agent.spawn(mailbox);
                AGENTS_ACTIVE.inc();
                nodes.push(agent);
            }
        }

        info!(
            routers = config.num_routers,
            nodes = nodes.len(),
            monitors = monitors.len(),
            responders = responders.len(),
            "network up, scheduling traffic and attackers"
        );

        // Benign scheduled traffic enters through the source node's router
        for scheduled in &config.scheduled_messages {
            let src = Jid::new(config.node_jid(scheduled.src_router, scheduled.src_node));
            let src_router = Jid::new(config.router_jid(scheduled.src_router));
            let dst = config.node_jid(scheduled.dst_router, scheduled.dst_node);
            let body = scheduled.body.clone();
            let delay = Duration::from_secs(scheduled.delay_secs);
            let bus = bus.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.recv() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                bus.send(Message::new(src_router, src, body).with_metadata(meta::DST, dst));
            });
        }

        // Attackers join after their start delay; the earliest start is the
        // report's attack timestamp
        let attack_start: Arc<Mutex<Option<DateTime<Utc>>>> = Arc::new(Mutex::new(None));
        let mut victim_set: HashSet<String> = HashSet::new();

        for (idx, spec) in config.attackers.iter().enumerate() {
            let attacker_jid = Jid::new(config.attacker_jid(idx));
            let targets: Vec<Jid> = spec
                .targets
                .iter()
                .map(|(r, n)| Jid::new(config.node_jid(*r, *n)))
                .collect();
            victim_set.extend(targets.iter().map(|j| j.0.clone()));

            let kind = spec.kind;
            let intensity = spec.intensity;
            let duration = Duration::from_secs(spec.duration_secs);
            let delay = Duration::from_secs(spec.start_delay_secs);
            let bus = bus.clone();
            let rng = rng.clone();
            let shutdown = shutdown.clone();
            let attack_start = Arc::clone(&attack_start);

            tokio::spawn(async move {
                let mut stop = shutdown.subscribe();
                tokio::select! {
                    _ = stop.recv() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                attack_start.lock().get_or_insert_with(Utc::now);

                match kind {
                    AttackKind::Ddos => {
                        DdosAttacker::new(attacker_jid, targets, intensity, bus, shutdown).spawn();
                    }
                    AttackKind::StealthMalware => {
                        StealthMalwareAttacker::new(
                            attacker_jid,
                            targets,
                            intensity,
                            duration,
                            bus,
                            shutdown,
                        )
                        .spawn();
                    }
                    AttackKind::InsiderThreat => {
                        let mailbox = bus.register(&attacker_jid);
                        InsiderAttacker::new(
                            attacker_jid,
                            targets,
                            intensity,
                            duration,
                            bus,
                            rng,
                            shutdown,
                        )
                        .spawn(mailbox);
                    }
                }
            });
        }

        // Let the scenario play out, then stop every behaviour
        tokio::time::sleep(Duration::from_secs(config.duration_secs)).await;
        info!("simulation time over, signalling shutdown");
        shutdown.trigger();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Collect the report from agent snapshots
        let node_status: Vec<_> = nodes.iter().map(|n| n.snapshot()).collect();
        let victims: Vec<String> = {
            let mut v: Vec<String> = victim_set.into_iter().collect();
            v.sort();
            v
        };

        let total_leakage = node_status.iter().map(|n| n.ddos_packets_received).sum();
        let total_overload_ticks = node_status.iter().map(|n| n.cpu_overload_ticks).sum();
        let nodes_alive = node_status.iter().filter(|n| !n.node_dead).count();
        let total_pings_answered = node_status.iter().map(|n| n.pings_answered).sum();
        let refused_cfps = responders.iter().map(|r| r.snapshot().refused_cfps).sum();

        let mitigation_start = responders
            .iter()
            .flat_map(|r| r.snapshot().mitigation_history)
            .min();

        let victim_peak_cpu = node_status
            .iter()
            .filter(|n| victims.contains(&n.jid.0))
            .map(|n| n.cpu_peak)
            .fold(0.0f64, f64::max);
        let victim_crashed = node_status
            .iter()
            .any(|n| victims.contains(&n.jid.0) && n.node_dead);

        let attack_start = *attack_start.lock();
        Ok(FinalReport {
            total_leakage,
            total_overload_ticks,
            nodes_alive,
            nodes_total: node_status.len(),
            total_pings_answered,
            refused_cfps,
            attack_start,
            mitigation_start,
            node_status,
            victims,
            victim_peak_cpu,
            victim_crashed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_quiet_network_reports_all_alive() {
        let config = SimulationConfig {
            duration_secs: 5,
            ..SimulationConfig::default()
        };
        let report = Simulation::new(config).unwrap().run().await.unwrap();

        assert_eq!(report.nodes_total, 6);
        assert_eq!(report.nodes_alive, 6);
        assert_eq!(report.total_leakage, 0);
        assert!(report.attack_start.is_none());
        assert!(report.mitigation_start.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_ping_round_trip() {
        let config = SimulationConfig {
            duration_secs: 10,
            scheduled_messages: vec![crate::sim::config::ScheduledMessage {
                src_router: 0,
                src_node: 0,
                dst_router: 1,
                dst_node: 0,
                body: "PING".to_string(),
                delay_secs: 1,
            }],
            ..SimulationConfig::default()
        };
        let report = Simulation::new(config).unwrap().run().await.unwrap();

        let target = report
            .node_status
            .iter()
            .find(|n| n.jid.as_str() == "router1_node0@sim.local")
            .unwrap();
        assert_eq!(target.pings_answered, 1);
        assert_eq!(report.total_pings_answered, 1);
    }
}

//! Node Agent
//! ===========
//! Simulated workstation/server: resource accounting, attack-state machine
//! (infection, compromise, exfiltration, isolation, backlog, crash), service
//! responses and firewall enforcement.
//!
//! Copyright © 2025 Stephen Bilodeau. All rights reserved.
//! Licensed under GPL-3.0 with proprietary agent clauses.

use crate::agent_framework::{
    meta, protocol, Jid, Mailbox, Message, MessageBus, ShutdownSignal, TaskSpec,
};
use crate::metrics::NODES_DEAD_TOTAL;
use crate::rng::SimRng;
use crate::security_layer::firewall::FirewallCommand;
use crate::security_layer::threat::scan_infection_keyword;
use crate::security_layer::{Firewall, FirewallKind};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const BASE_CPU_DEFAULT: f64 = 10.0;
const BASE_BW_DEFAULT: f64 = 5.0;
/// Flat CPU overhead while infected
const INFECTION_LOAD: f64 = 20.0;
/// Average-load-per-task above this reads as an infection signature
const INFECTION_AVG_THRESHOLD: f64 = 15.0;
const WORM_PERIOD: Duration = Duration::from_secs(10);
const HEALTH_REPORT_PERIOD: Duration = Duration::from_secs(5);
const INFECTION_ALERT_COOLDOWN: Duration = Duration::from_secs(10);

/// A scheduled unit of load that expires on its own
#[derive(Clone, Copy, Debug)]
pub struct ActiveTask {
    pub end: Instant,
    pub load: f64,
}

/// Everything a node owns exclusively; behaviours share it via one mutex
#[derive(Debug)]
pub struct NodeState {
    pub active_tasks: HashMap<u64, ActiveTask>,
    task_counter: u64,
    pub cpu_usage: f64,
    pub bandwidth_usage: f64,
    pub cpu_peak: f64,
    pub cpu_overload_ticks: u64,
    pub ddos_packets_received: u64,
    pub pings_answered: u64,
    send_adjust: f64,

    pub is_infected: bool,
    pub malware_type: Option<String>,
    pub attacker_intensity: u8,
    pub infection_source: Option<Jid>,
    worm_active: bool,

    pub compromised: bool,
    pub backdoor_type: Option<String>,
    pub compromised_intensity: u8,
    pub compromised_by: Option<Jid>,
    pub exfiltration_active: bool,
    pub exfiltration_bandwidth: f64,
    pub lateral_movement_active: bool,
    pub infected_peers: HashSet<Jid>,

    pub self_isolated: bool,
    isolation_start: Option<Instant>,
    pub backlog_mode: bool,
    backlog_start: Option<Instant>,
    pub node_dead: bool,
    pending_infection_alert: bool,
    last_infection_alert: Option<Instant>,
    last_health_report: Option<Instant>,
}

impl NodeState {
    fn new() -> Self {
        NodeState {
            active_tasks: HashMap::new(),
            task_counter: 0,
            cpu_usage: BASE_CPU_DEFAULT,
            bandwidth_usage: BASE_BW_DEFAULT,
            cpu_peak: 0.0,
            cpu_overload_ticks: 0,
            ddos_packets_received: 0,
            pings_answered: 0,
            send_adjust: 0.0,
            is_infected: false,
            malware_type: None,
            attacker_intensity: 0,
            infection_source: None,
            worm_active: false,
            compromised: false,
            backdoor_type: None,
            compromised_intensity: 0,
            compromised_by: None,
            exfiltration_active: false,
            exfiltration_bandwidth: 0.0,
            lateral_movement_active: false,
            infected_peers: HashSet::new(),
            self_isolated: false,
            isolation_start: None,
            backlog_mode: false,
            backlog_start: None,
            node_dead: false,
            pending_infection_alert: false,
            last_infection_alert: None,
            last_health_report: None,
        }
    }

    fn schedule_task(&mut self, task: TaskSpec, now: Instant) -> u64 {
        self.task_counter += 1;
        let id = self.task_counter;
        self.active_tasks.insert(
            id,
            ActiveTask {
                end: now + Duration::from_secs_f64(task.duration.max(0.0)),
                load: task.cpu_load,
            },
        );
        id
    }

    fn task_load(&self) -> f64 {
        self.active_tasks.values().map(|t| t.load).sum()
    }

    fn compute_cpu(&self, base_cpu: f64) -> f64 {
        let infection = if self.is_infected { INFECTION_LOAD } else { 0.0 };
        (base_cpu + self.task_load() + infection + self.send_adjust).min(100.0)
    }
}

/// Read-only state sample for the final report
#[derive(Clone, Debug)]
pub struct NodeSnapshot {
    pub jid: Jid,
    pub cpu_usage: f64,
    pub cpu_peak: f64,
    pub cpu_overload_ticks: u64,
    pub ddos_packets_received: u64,
    pub pings_answered: u64,
    pub is_infected: bool,
    pub compromised: bool,
    pub self_isolated: bool,
    pub node_dead: bool,
}

pub struct NodeConfig {
    pub jid: Jid,
    pub router: Jid,
    pub monitor: Jid,
    /// Other nodes on the same router, in index order
    pub subnet_peers: Vec<Jid>,
    pub base_cpu: f64,
    pub base_bw: f64,
}

impl NodeConfig {
    pub fn new(jid: Jid, router: Jid, monitor: Jid, subnet_peers: Vec<Jid>) -> Self {
        NodeConfig {
            jid,
            router,
            monitor,
            subnet_peers,
            base_cpu: BASE_CPU_DEFAULT,
            base_bw: BASE_BW_DEFAULT,
        }
    }
}

pub struct NodeAgent {
    jid: Jid,
    router: Jid,
    monitor: Jid,
    subnet_peers: Vec<Jid>,
    base_cpu: f64,
    base_bw: f64,
    state: Mutex<NodeState>,
    firewall: Firewall,
    bus: Arc<MessageBus>,
    rng: SimRng,
    shutdown: ShutdownSignal,
}

impl NodeAgent {
    pub fn new(
        config: NodeConfig,
        bus: Arc<MessageBus>,
        rng: SimRng,
        shutdown: ShutdownSignal,
    ) -> Arc<Self> {
        let firewall = Firewall::new(config.jid.clone(), FirewallKind::Node, bus.clone())
            .with_parent_router(config.router.clone());
        Arc::new(NodeAgent {
            jid: config.jid,
            router: config.router,
            monitor: config.monitor,
            subnet_peers: config.subnet_peers,
            base_cpu: config.base_cpu,
            base_bw: config.base_bw,
            state: Mutex::new(NodeState::new()),
            firewall,
            bus,
            rng,
            shutdown,
        })
    }

    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn firewall(&self) -> &Firewall {
        &self.firewall
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let state = self.state.lock();
        NodeSnapshot {
            jid: self.jid.clone(),
            cpu_usage: state.cpu_usage,
            cpu_peak: state.cpu_peak,
            cpu_overload_ticks: state.cpu_overload_ticks,
            ddos_packets_received: state.ddos_packets_received,
            pings_answered: state.pings_answered,
            is_infected: state.is_infected,
            compromised: state.compromised,
            self_isolated: state.self_isolated,
            node_dead: state.node_dead,
        }
    }

    /// Start the receive and resource behaviours
    pub fn spawn(self: &Arc<Self>, mailbox: Mailbox) {
        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.recv_loop(mailbox).await });

        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.resource_loop().await });

        info!(node = %self.jid, "node agent started");
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
        debug!(node = %self.jid, "receive behaviour stopped");
    }

    /// Full inbound pipeline: pre-checks, firewall, metrics, task intake and
    /// payload dispatch
    pub async fn handle_message(self: &Arc<Self>, msg: Message) {
        let body = msg.body.trim().to_string();
        let body_lower = body.to_lowercase();
        let proto = msg.protocol().map(str::to_string);

        // Pre-checks run against a consistent view of the containment state
        {
            let state = self.state.lock();
            if state.node_dead {
                return;
            }

            if state.self_isolated {
                // Only cure/forensic traffic and health checks break isolation
                let is_cure = matches!(
                    proto.as_deref(),
                    Some(protocol::MALWARE_CURE) | Some(protocol::INCIDENT_RESPONSE)
                ) || body_lower.contains("cure_infection")
                    || body_lower.contains("forensic_clean");
                let is_health_check = proto.as_deref() == Some(protocol::HEALTH_CHECK)
                    || body_lower.starts_with("ping");
                if !is_cure && !is_health_check {
                    return;
                }
            }

            if state.backlog_mode {
                // Shed everything but critical control traffic
                let is_critical = matches!(
                    proto.as_deref(),
                    Some(protocol::FIREWALL_CONTROL) | Some(protocol::MALWARE_CURE)
                ) || ["cure_infection", "forensic_clean", "block_jid", "rate_limit"]
                    .iter()
                    .any(|kw| body_lower.contains(kw));
                if !is_critical {
                    return;
                }
            }
        }

        if !self.firewall.allow_message(&msg).await {
            debug!(node = %self.jid, sender = %msg.sender, "firewall blocked inbound message");
            return;
        }

        if proto.as_deref() == Some(protocol::FIREWALL_CONTROL) {
            self.firewall.handle_control(&msg).await;
            return;
        }

        // Leakage metric: an attack packet survived every filter
        if proto.as_deref() == Some(protocol::ATTACK) {
            let mut state = self.state.lock();
            state.ddos_packets_received += 1;
        }

        // Unpatched vulnerability: infection-capable keywords take hold on
        // first contact and make this node patient zero
        if scan_infection_keyword(&body_lower).is_some() {
            let intensity = msg.attacker_intensity(5);
            let source = msg.original_sender();
            let newly_infected = {
                let mut state = self.state.lock();
                if state.is_infected {
                    false
                } else {
                    state.is_infected = true;
                    state.attacker_intensity = intensity;
                    state.infection_source = Some(source.clone());
                    true
                }
            };
            if newly_infected {
                warn!(
                    node = %self.jid,
                    intensity,
                    source = %source,
                    "vulnerability exploited, node is now infected"
                );
                self.notify_infection("keyword_payload", intensity, &source).await;
                self.start_worm_propagation();
            }
        }

        // Schedule the carried task, except PINGs during isolation which are
        // answered without CPU cost
        let skip_task = {
            let state = self.state.lock();
            state.self_isolated && body.eq_ignore_ascii_case("PING")
        };
        if !skip_task {
            if let Some(task) = msg.task() {
                self.schedule_task_with_check(task).await;
            }
        }

        self.dispatch_payload(&msg, &body, &body_lower, proto.as_deref())
            .await;
    }

    /// Insert a task and re-run the infection check immediately, before any
    /// further messages are accepted
    async fn schedule_task_with_check(self: &Arc<Self>, task: TaskSpec) {
        let now = Instant::now();
        let isolate_now = {
            let mut state = self.state.lock();
            let id = state.schedule_task(task, now);
            if task.cpu_load > 5.0 {
                debug!(node = %self.jid, task = id, load = task.cpu_load, duration = task.duration, "scheduled task");
            }

            let cpu = state.compute_cpu(self.base_cpu);
            let tasks = state.active_tasks.len();
            let avg = if tasks > 0 {
                state.task_load() / tasks as f64
            } else {
                cpu
            };

            if cpu > 65.0 && !state.self_isolated && avg > INFECTION_AVG_THRESHOLD {
                state.self_isolated = true;
                state.isolation_start = Some(now);
                state.pending_infection_alert = true;
                Some((cpu, tasks, avg))
            } else {
                None
            }
        };

        if let Some((cpu, tasks, avg)) = isolate_now {
            warn!(
                node = %self.jid,
                cpu,
                tasks,
                avg_per_task = avg,
                "immediate infection signature on task intake, self-isolating"
            );
        }
    }

    async fn dispatch_payload(
        self: &Arc<Self>,
        msg: &Message,
        body: &str,
        body_lower: &str,
        proto: Option<&str>,
    ) {
        if let Some(rest) = body.strip_prefix("INFECT:") {
            self.handle_infect(msg, rest.trim(), proto).await;
        } else if body.starts_with("DATA_EXFILTRATION:") {
            self.handle_exfiltration(msg);
        } else if let Some(rest) = body.strip_prefix("BACKDOOR_INSTALL:") {
            self.handle_backdoor(msg, rest.trim());
        } else if let Some(rest) = body.strip_prefix("LATERAL_SPREAD:") {
            self.handle_lateral_spread(msg, rest.trim());
        } else if FirewallCommand::is_control_body(body) {
            // Response agents issue firewall commands as plain payloads
            let control = Message::new(self.jid.clone(), msg.sender.clone(), body)
                .with_protocol(protocol::FIREWALL_CONTROL);
            self.firewall.handle_control(&control).await;
            debug!(node = %self.jid, command = body.split(':').next().unwrap_or(body), "processed firewall command");
        } else if body_lower.starts_with("cure_infection") {
            self.handle_cure();
        } else if body_lower.starts_with("forensic_clean") {
            self.handle_forensic_clean();
        } else if body.eq_ignore_ascii_case("PING") {
            self.handle_ping(msg).await;
        } else if let Some(content) = body.strip_prefix("REQUEST:") {
            self.handle_request(msg, content).await;
        } else {
            debug!(node = %self.jid, "no handler for message body; ignoring");
        }
    }

    async fn handle_infect(self: &Arc<Self>, msg: &Message, malware_type: &str, proto: Option<&str>) {
        if proto != Some(protocol::MALWARE_INFECTION) {
            debug!(
                node = %self.jid,
                protocol = ?proto,
                "INFECT payload without malware-infection protocol; ignoring"
            );
            return;
        }
        let intensity = msg.attacker_intensity(5);
        let source = msg.original_sender();
        let newly_infected = {
            let mut state = self.state.lock();
            if state.is_infected {
                false
            } else {
                state.is_infected = true;
                state.malware_type = Some(malware_type.to_string());
                state.attacker_intensity = intensity;
                state.infection_source = Some(source.clone());
                true
            }
        };

        if newly_infected {
            warn!(
                node = %self.jid,
                malware = malware_type,
                intensity,
                "infected, persistent CPU overhead active"
            );
            self.notify_infection(malware_type, intensity, &source).await;
            self.start_worm_propagation();
        } else {
            debug!(node = %self.jid, malware = malware_type, "already infected, re-infection ignored");
        }
    }

    /// Tell the parent router (which fans out to monitors) about an infection
    async fn notify_infection(&self, malware_type: &str, intensity: u8, source: &Jid) {
        let alert = Message::new(
            self.router.clone(),
            self.jid.clone(),
            format!("INFECTED:{}", malware_type),
        )
        .with_protocol(protocol::MALWARE_INFECTION)
        .with_metadata(meta::ATTACKER_INTENSITY, intensity.to_string())
        .with_metadata(meta::OFFENDER, source.as_str())
        .with_metadata(meta::DST, self.jid.as_str());
        self.bus.send(alert);
    }

    fn handle_exfiltration(&self, msg: &Message) {
        let mut state = self.state.lock();
        if state.exfiltration_active {
            return;
        }
        let intensity = msg.attacker_intensity(6);
        let overhead = intensity as f64 * 5.0;
        state.exfiltration_active = true;
        state.exfiltration_bandwidth = overhead;
        warn!(
            node = %self.jid,
            intensity,
            bandwidth_overhead = overhead,
            "data exfiltration started"
        );
    }

    fn handle_backdoor(self: &Arc<Self>, msg: &Message, backdoor_type: &str) {
        let started = {
            let mut state = self.state.lock();
            if state.compromised {
                false
            } else {
                let intensity = msg.attacker_intensity(6);
                state.compromised = true;
                state.backdoor_type = Some(backdoor_type.to_string());
                state.compromised_intensity = intensity;
                state.compromised_by = Some(msg.original_sender());
                true
            }
        };
        if started {
            let intensity = self.state.lock().compromised_intensity;
            warn!(
                node = %self.jid,
                backdoor = backdoor_type,
                intensity,
                "backdoor installed, lateral movement enabled"
            );
            self.start_lateral_movement(intensity);
        }
    }

    fn handle_lateral_spread(self: &Arc<Self>, msg: &Message, backdoor_type: &str) {
        let intensity: u8 = msg
            .get_metadata(meta::SPREAD_INTENSITY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(7);

        {
            let state = self.state.lock();
            if state.compromised {
                return;
            }
        }

        // Endpoint protection gets a chance to stop the spread
        let success_rate = (40.0 + intensity as f64 * 5.0).min(90.0);
        if !self.rng.passes(success_rate) {
            info!(
                node = %self.jid,
                source = %msg.sender,
                success_rate,
                "lateral infection attempt blocked by local security"
            );
            return;
        }

        {
            let mut state = self.state.lock();
            state.compromised = true;
            state.backdoor_type = Some(backdoor_type.to_string());
            state.compromised_by = Some(msg.sender.clone());
            state.compromised_intensity = intensity;
            state.exfiltration_active = true;
            state.exfiltration_bandwidth = intensity as f64 * 5.0;
        }
        warn!(
            node = %self.jid,
            source = %msg.sender,
            backdoor = backdoor_type,
            "lateral infection succeeded"
        );
        self.start_lateral_movement(intensity);
    }

    fn handle_cure(&self) {
        let mut state = self.state.lock();
        if !state.is_infected {
            debug!(node = %self.jid, "not infected, cure command ignored");
            return;
        }
        let intensity = state.attacker_intensity.max(1);
        let malware = state.malware_type.clone().unwrap_or_else(|| "unknown".into());
        let success_rate = (100.0 - intensity as f64 * 7.0).clamp(30.0, 95.0);

        info!(
            node = %self.jid,
            malware = %malware,
            intensity,
            success_rate,
            "hard reset initiated"
        );

        if self.rng.passes(success_rate) {
            let cleared = state.active_tasks.len();
            state.active_tasks.clear();
            state.is_infected = false;
            state.malware_type = None;
            state.attacker_intensity = 0;
            state.infection_source = None;
            state.self_isolated = false;
            info!(node = %self.jid, malware = %malware, tasks_cleared = cleared, "hard reset complete");
        } else {
            warn!(node = %self.jid, malware = %malware, "hard reset failed, persistence mechanisms survived");
        }
    }

    fn handle_forensic_clean(&self) {
        let mut state = self.state.lock();
        if !state.compromised {
            debug!(node = %self.jid, "not compromised, forensic clean ignored");
            return;
        }
        let intensity = state.compromised_intensity.max(1);
        let backdoor = state
            .backdoor_type
            .clone()
            .unwrap_or_else(|| "unknown_backdoor".into());
        let success_rate = (100.0 - intensity as f64 * 6.0).clamp(40.0, 95.0);

        info!(
            node = %self.jid,
            backdoor = %backdoor,
            intensity,
            success_rate,
            "forensic clean initiated"
        );

        if self.rng.passes(success_rate) {
            state.compromised = false;
            state.backdoor_type = None;
            state.compromised_by = None;
            state.compromised_intensity = 0;
            state.exfiltration_active = false;
            state.exfiltration_bandwidth = 0.0;
            state.lateral_movement_active = false;
            state.infected_peers.clear();
            info!(node = %self.jid, backdoor = %backdoor, "forensic clean complete, system restored");
        } else {
            warn!(node = %self.jid, backdoor = %backdoor, "forensic clean failed, rootkit persistence");
        }
    }

    async fn handle_ping(&self, msg: &Message) {
        {
            let mut state = self.state.lock();
            state.pings_answered += 1;
            state.send_adjust = -2.0;
        }
        let original_sender = msg.original_sender();
        let reply = Message::new(self.router.clone(), self.jid.clone(), "PONG")
            .with_metadata(meta::DST, original_sender.as_str());
        self.bus.send(reply);
        debug!(node = %self.jid, to = %original_sender, "answered PING");
    }

    async fn handle_request(&self, msg: &Message, content: &str) {
        let original_sender = msg.original_sender();
        let reply = Message::new(
            self.router.clone(),
            self.jid.clone(),
            format!("RESPONSE: processed '{}'", content.trim()),
        )
        .with_metadata(meta::DST, original_sender.as_str());
        self.bus.send(reply);
    }

    /// Start worm propagation unless it already runs; stops on cure or death
    fn start_worm_propagation(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.worm_active {
                return;
            }
            state.worm_active = true;
        }

        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = agent.shutdown.subscribe();
            let mut tick: usize = 0;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(WORM_PERIOD) => {}
                }

                {
                    let state = agent.state.lock();
                    if !state.is_infected || state.node_dead {
                        break;
                    }
                }

                if agent.subnet_peers.is_empty() {
                    continue;
                }
                let target = &agent.subnet_peers[tick % agent.subnet_peers.len()];
                tick += 1;

                // Benign-looking PING with a CPU bomb in the task metadata
                let payload = Message::new(agent.router.clone(), agent.jid.clone(), "PING")
                    .with_protocol(protocol::WORM_PAYLOAD)
                    .with_metadata(meta::DST, target.as_str())
                    .with_metadata(meta::TASK, TaskSpec::new(20.0, 10.0).to_json());
                agent.bus.send(payload);
                debug!(node = %agent.jid, target = %target, "worm payload sent");
            }
            agent.state.lock().worm_active = false;
        });
    }

    /// Start lateral movement unless it already runs; stops when cleaned
    fn start_lateral_movement(self: &Arc<Self>, intensity: u8) {
        {
            let mut state = self.state.lock();
            if state.lateral_movement_active {
                return;
            }
            state.lateral_movement_active = true;
        }

        let period = Duration::from_secs_f64((30.0 - intensity as f64 * 2.5).max(5.0));
        info!(node = %self.jid, period_secs = period.as_secs_f64(), "lateral movement scheduled");

        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = agent.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(period) => {}
                }

                let (intensity, backdoor) = {
                    let state = agent.state.lock();
                    if !state.compromised || state.node_dead {
                        break;
                    }
                    (
                        state.compromised_intensity.max(1),
                        state
                            .backdoor_type
                            .clone()
                            .unwrap_or_else(|| "insider_backdoor".into()),
                    )
                };

                let spread_rate = (intensity as f64 * 10.0).min(95.0);
                if !agent.rng.passes(spread_rate) {
                    debug!(node = %agent.jid, spread_rate, "lateral movement attempt failed");
                    continue;
                }

                let available: Vec<Jid> = {
                    let state = agent.state.lock();
                    agent
                        .subnet_peers
                        .iter()
                        .filter(|p| !state.infected_peers.contains(p))
                        .cloned()
                        .collect()
                };
                if available.is_empty() {
                    continue;
                }

                let count = if intensity < 7 { 1 } else { 2 };
                let targets = agent.rng.sample(&available, count);
                for target in targets {
                    let msg = Message::new(
                        agent.router.clone(),
                        agent.jid.clone(),
                        format!("LATERAL_SPREAD:{}", backdoor),
                    )
                    .with_protocol(protocol::ATTACK)
                    .with_metadata(meta::DST, target.as_str())
                    .with_metadata(meta::SPREAD_INTENSITY, intensity.to_string());
                    agent.bus.send(msg);

                    agent.state.lock().infected_peers.insert(target.clone());
                    info!(node = %agent.jid, target = %target, intensity, "lateral movement attempt");
                }
            }
            agent.state.lock().lateral_movement_active = false;
        });
    }

    async fn resource_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {}
            }
            if self.resource_tick().await {
                break;
            }
        }
        debug!(node = %self.jid, "resource behaviour stopped");
    }

    /// One accounting step. Returns true when the node died.
    async fn resource_tick(self: &Arc<Self>) -> bool {
        let now = Instant::now();
        let mut outbound: Vec<Message> = Vec::new();
        let mut died = false;

        {
            let mut state = self.state.lock();
            if state.node_dead {
                return true;
            }

            state.active_tasks.retain(|_, t| t.end > now);

            let cpu = state.compute_cpu(self.base_cpu);
            let task_load = state.task_load();
            let bw = (self.base_bw + task_load * 0.2 + state.exfiltration_bandwidth).min(100.0);
            state.cpu_usage = cpu;
            state.bandwidth_usage = bw;
            state.send_adjust = 0.0;

            if cpu > state.cpu_peak {
                state.cpu_peak = cpu;
            }
            if cpu > 90.0 {
                state.cpu_overload_ticks += 1;
            }

            let tasks = state.active_tasks.len();
            let avg = if tasks > 0 { task_load / tasks as f64 } else { cpu };

            if cpu > 70.0 {
                if avg > INFECTION_AVG_THRESHOLD || tasks == 0 {
                    // Infection signature: too much load per task
                    if !state.self_isolated {
                        warn!(
                            node = %self.jid,
                            cpu,
                            tasks,
                            avg_per_task = avg,
                            "infection signature detected, self-isolating"
                        );
                        state.self_isolated = true;
                        state.isolation_start = Some(now);
                    }
                    state.pending_infection_alert = true;
                } else if !state.backlog_mode {
                    // Legitimate overload: shed load instead of isolating
                    warn!(
                        node = %self.jid,
                        cpu,
                        tasks,
                        avg_per_task = avg,
                        "high load with normal task profile, entering backlog mode"
                    );
                    state.backlog_mode = true;
                    state.backlog_start = Some(now);
                }
            } else if cpu < 40.0 {
                if state.self_isolated {
                    let duration = state
                        .isolation_start
                        .map(|s| now.duration_since(s).as_secs_f64())
                        .unwrap_or(0.0);
                    info!(node = %self.jid, cpu, duration_secs = duration, "ending self-isolation");
                    state.self_isolated = false;
                    state.isolation_start = None;
                }
                if state.backlog_mode {
                    let duration = state
                        .backlog_start
                        .map(|s| now.duration_since(s).as_secs_f64())
                        .unwrap_or(0.0);
                    info!(node = %self.jid, cpu, duration_secs = duration, "ending backlog mode");
                    state.backlog_mode = false;
                    state.backlog_start = None;
                }
            }

            // Pending infection alert, rate-limited to one per cooldown window
            if state.pending_infection_alert {
                let due = state
                    .last_infection_alert
                    .map(|t| now.duration_since(t) >= INFECTION_ALERT_COOLDOWN)
                    .unwrap_or(true);
                if due {
                    state.last_infection_alert = Some(now);
                    state.pending_infection_alert = false;
                    let offender = state
                        .infection_source
                        .as_ref()
                        .map(|j| j.0.clone())
                        .unwrap_or_else(|| "unknown".to_string());
                    let alert = Message::new(
                        self.router.clone(),
                        self.jid.clone(),
                        format!("INFECTED:CPU={:.1}%,tasks={},avg={:.1}%", cpu, tasks, avg),
                    )
                    .with_protocol(protocol::THREAT_ALERT)
                    .with_metadata(meta::THREAT_TYPE, "suspected_malware")
                    .with_metadata(meta::OFFENDER, offender)
                    .with_metadata(meta::DST, self.jid.as_str());
                    outbound.push(alert);
                }
            }

            if cpu >= 100.0 {
                warn!(node = %self.jid, "FATAL: CPU saturated, node crashed and is offline");
                state.node_dead = true;
                state.active_tasks.clear();
                state.cpu_usage = 0.0;
                died = true;
                outbound.push(
                    Message::new(
                        self.router.clone(),
                        self.jid.clone(),
                        format!("NODE_DEATH: {}", self.jid),
                    )
                    .with_protocol(protocol::NODE_DEATH),
                );
            } else {
                // Periodic health report to the monitor of this subnet
                let due = state
                    .last_health_report
                    .map(|t| now.duration_since(t) >= HEALTH_REPORT_PERIOD)
                    .unwrap_or(true);
                if due {
                    state.last_health_report = Some(now);
                    outbound.push(
                        Message::new(
                            self.monitor.clone(),
                            self.jid.clone(),
                            format!("CPU:{:.1}", cpu),
                        )
                        .with_protocol(protocol::HEALTH_REPORT),
                    );
                }
            }
        }

        for msg in outbound {
            self.bus.send(msg);
        }

        if died {
            NODES_DEAD_TOTAL.inc();
            // A dead node neither sends nor receives from here on
            self.bus.deregister(&self.jid);
        }
        died
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_framework::MessageBus;

    fn test_node(bus: Arc<MessageBus>) -> Arc<NodeAgent> {
        let config = NodeConfig::new(
            Jid::new("router0_node0@sim"),
            Jid::new("router0@sim"),
            Jid::new("monitor0@sim"),
            vec![Jid::new("router0_node1@sim")],
        );
        NodeAgent::new(config, bus, SimRng::seeded(11), ShutdownSignal::new())
    }

    fn attack(body: &str, load: f64, duration: f64) -> Message {
        Message::new(
            Jid::new("router0_node0@sim"),
            Jid::new("attacker0@sim"),
            body,
        )
        .with_protocol(protocol::ATTACK)
        .with_metadata(meta::TASK, TaskSpec::new(load, duration).to_json())
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_scheduling_and_expiry() {
        let bus = MessageBus::new();
        let node = test_node(bus);

        node.handle_message(attack("REQUEST:work", 12.0, 3.0)).await;
        assert_eq!(node.state.lock().active_tasks.len(), 1);

        node.resource_tick().await;
        let cpu = node.state.lock().cpu_usage;
        assert!((cpu - 22.0).abs() < 1e-9, "base 10 + task 12, got {}", cpu);

        tokio::time::advance(Duration::from_secs(4)).await;
        node.resource_tick().await;
        assert!(node.state.lock().active_tasks.is_empty());
        assert_eq!(node.state.lock().cpu_usage, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ddos_leakage_counted() {
        let bus = MessageBus::new();
        let node = test_node(bus);
        for _ in 0..3 {
            node.handle_message(attack("REQUEST:1/30", 9.0, 2.0)).await;
        }
        assert_eq!(node.state.lock().ddos_packets_received, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cpu_65_boundary_no_isolation() {
        let bus = MessageBus::new();
        let node = test_node(bus);
        // 10 base + 55 task = 65 exactly: not yet isolating
        node.handle_message(attack("payload", 55.0, 10.0)).await;
        assert!(!node.state.lock().self_isolated);

        // one more high-average task pushes past 65 with avg > 15
        node.handle_message(attack("payload", 20.0, 10.0)).await;
        assert!(node.state.lock().self_isolated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overload_backlog_vs_isolation() {
        let bus = MessageBus::new();
        let node = test_node(bus);
        // Many small tasks: avg/task stays <= 15, so backlog, not isolation
        for _ in 0..8 {
            node.handle_message(attack("small", 9.0, 30.0)).await;
        }
        node.resource_tick().await;
        let state = node.state.lock();
        assert!(state.backlog_mode);
        assert!(!state.self_isolated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_admits_only_critical() {
        let bus = MessageBus::new();
        let node = test_node(bus.clone());
        node.state.lock().backlog_mode = true;

        node.handle_message(Message::new(
            node.jid.clone(),
            Jid::new("router0_node1@sim"),
            "PING",
        ))
        .await;
        assert_eq!(node.state.lock().pings_answered, 0, "non-critical dropped");

        node.handle_message(Message::new(
            node.jid.clone(),
            Jid::new("response0@sim"),
            "BLOCK_JID:attacker0@sim",
        ))
        .await;
        assert!(node.firewall.is_blocked("attacker0@sim"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_death_exactly_once() {
        let bus = MessageBus::new();
        let router = Jid::new("router0@sim");
        let mut router_inbox = bus.register(&router);
        let node = test_node(bus.clone());

        node.handle_message(attack("flood", 120.0, 3.0)).await;
        assert!(node.resource_tick().await, "cpu >= 100 kills the node");

        let state = node.state.lock();
        assert!(state.node_dead);
        assert!(state.active_tasks.is_empty());
        assert_eq!(state.cpu_usage, 0.0);
        drop(state);

        // death announcement (the task intake may also have raised an alert)
        let mut saw_death = false;
        while let Some(msg) = router_inbox.try_recv() {
            if msg.protocol() == Some(protocol::NODE_DEATH) {
                saw_death = true;
                assert!(msg.body.contains("router0_node0@sim"));
            }
        }
        assert!(saw_death);

        // terminal: further ticks still report dead, no second announcement
        assert!(node.resource_tick().await);
        assert!(!bus.is_registered(&node.jid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_answered_via_router() {
        let bus = MessageBus::new();
        let router = Jid::new("router0@sim");
        let mut router_inbox = bus.register(&router);
        let node = test_node(bus);

        let ping = Message::new(node.jid.clone(), router.clone(), "PING")
            .with_metadata(meta::ORIGINAL_SENDER, "router1_node0@sim");
        node.handle_message(ping).await;

        assert_eq!(node.state.lock().pings_answered, 1);
        let pong = router_inbox
            .recv_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(pong.body, "PONG");
        assert_eq!(pong.get_metadata(meta::DST), Some("router1_node0@sim"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_infect_requires_protocol() {
        let bus = MessageBus::new();
        let node = test_node(bus);

        // "virus" is not infection-capable by keyword and the protocol is
        // wrong, so nothing happens
        let msg = Message::new(node.jid.clone(), Jid::new("attacker0@sim"), "INFECT:virus");
        node.handle_message(msg).await;
        assert!(!node.state.lock().is_infected);

        let msg = Message::new(node.jid.clone(), Jid::new("attacker0@sim"), "INFECT:virus")
            .with_protocol(protocol::MALWARE_INFECTION)
            .with_metadata(meta::ATTACKER_INTENSITY, "7");
        node.handle_message(msg).await;
        let state = node.state.lock();
        assert!(state.is_infected);
        assert_eq!(state.malware_type.as_deref(), Some("virus"));
        assert_eq!(state.attacker_intensity, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keyword_payload_infects_patient_zero() {
        let bus = MessageBus::new();
        let router = Jid::new("router0@sim");
        let mut router_inbox = bus.register(&router);
        let node = test_node(bus);

        let msg = Message::new(
            node.jid.clone(),
            Jid::new("attacker0@sim"),
            "ATTACK: Attempting to install trojan backdoor",
        )
        .with_protocol(protocol::ATTACK)
        .with_metadata(meta::ATTACKER_INTENSITY, "5");
        node.handle_message(msg).await;

        assert!(node.state.lock().is_infected);
        // both the firewall advisory and the infection notice reach the router
        let mut protos = Vec::new();
        while let Some(m) = router_inbox.try_recv() {
            protos.push(m.protocol().unwrap_or_default().to_string());
        }
        assert!(protos.contains(&protocol::MALWARE_INFECTION.to_string()));
        assert!(protos.contains(&protocol::THREAT_ALERT.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_infected_cpu_includes_parasite_load() {
        let bus = MessageBus::new();
        let node = test_node(bus);
        node.state.lock().is_infected = true;
        node.resource_tick().await;
        assert_eq!(node.state.lock().cpu_usage, 30.0); // 10 base + 20 infection
    }

    #[tokio::test(start_paused = true)]
    async fn test_cure_eventually_clears_infection() {
        let bus = MessageBus::new();
        let node = test_node(bus);
        {
            let mut state = node.state.lock();
            state.is_infected = true;
            state.malware_type = Some("trojan".into());
            state.attacker_intensity = 5; // 65% cure success
            state.self_isolated = true;
        }

        for _ in 0..100 {
            node.handle_cure();
            if !node.state.lock().is_infected {
                break;
            }
        }
        let state = node.state.lock();
        assert!(!state.is_infected, "cure succeeds within the attempt budget");
        assert!(!state.self_isolated);
        assert!(state.malware_type.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolation_admits_cure_and_ping_only() {
        let bus = MessageBus::new();
        let node = test_node(bus);
        {
            let mut state = node.state.lock();
            state.self_isolated = true;
            state.is_infected = true;
            state.malware_type = Some("worm".into());
            state.attacker_intensity = 1; // 93% cure success
        }

        // payload task is ignored during isolation
        node.handle_message(attack("payload", 30.0, 5.0)).await;
        assert!(node.state.lock().active_tasks.is_empty());

        // cure breaks through
        for _ in 0..100 {
            let cure = Message::new(node.jid.clone(), Jid::new("response0@sim"), "CURE_INFECTION")
                .with_protocol(protocol::MALWARE_CURE);
            node.handle_message(cure).await;
            if !node.state.lock().is_infected {
                break;
            }
        }
        assert!(!node.state.lock().is_infected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backdoor_then_forensic_clean() {
        let bus = MessageBus::new();
        let node = test_node(bus);

        let msg = Message::new(
            node.jid.clone(),
            Jid::new("attacker0@sim"),
            "BACKDOOR_INSTALL:insider_backdoor",
        )
        .with_protocol(protocol::ATTACK)
        .with_metadata(meta::ATTACKER_INTENSITY, "4");
        node.handle_message(msg).await;
        {
            let state = node.state.lock();
            assert!(state.compromised);
            assert_eq!(state.backdoor_type.as_deref(), Some("insider_backdoor"));
        }

        for _ in 0..100 {
            node.handle_forensic_clean();
            if !node.state.lock().compromised {
                break;
            }
        }
        let state = node.state.lock();
        assert!(!state.compromised);
        assert!(!state.exfiltration_active);
        assert!(state.infected_peers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exfiltration_adds_bandwidth() {
        let bus = MessageBus::new();
        let node = test_node(bus);
        let msg = Message::new(
            node.jid.clone(),
            Jid::new("attacker0@sim"),
            "DATA_EXFILTRATION:sensitive_data",
        )
        .with_protocol(protocol::ATTACK)
        .with_metadata(meta::ATTACKER_INTENSITY, "6");
        node.handle_message(msg).await;

        node.resource_tick().await;
        let state = node.state.lock();
        assert!(state.exfiltration_active);
        assert_eq!(state.exfiltration_bandwidth, 30.0);
        assert_eq!(state.bandwidth_usage, 35.0); // 5 base + 30 exfiltration
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_node_drops_everything() {
        let bus = MessageBus::new();
        let node = test_node(bus);
        node.state.lock().node_dead = true;
        node.handle_message(Message::new(
            node.jid.clone(),
            Jid::new("router0@sim"),
            "PING",
        ))
        .await;
        assert_eq!(node.state.lock().pings_answered, 0);
    }
}

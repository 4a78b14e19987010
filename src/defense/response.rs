//! Response Agent
//! ===============
//! Contract-Net participant: bids on incidents by availability, refuses under
//! saturation, and executes intensity-weighted phased mitigations.

use crate::agent_framework::{
    meta, performative, protocol, Jid, Mailbox, Message, MessageBus, ShutdownSignal,
};
use crate::metrics::{CNP_REFUSALS_TOTAL, MITIGATIONS_TOTAL};
use crate::rng::SimRng;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const BASE_CPU: f64 = 10.0;
/// CPU cost of one running mitigation
const MITIGATION_CPU: f64 = 15.0;
/// Above this estimated load a CFP is refused outright
const REFUSAL_CPU_THRESHOLD: f64 = 85.0;
const CLEANUP_PERIOD: Duration = Duration::from_secs(3);
const COMPLETED_RETENTION: Duration = Duration::from_secs(5);
const RESOURCE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MitigationStatus {
    Mitigating,
    Resolved,
    Failed,
}

#[derive(Clone, Debug)]
struct ActiveIncident {
    threat_type: String,
    offender_jid: Jid,
    victim_jid: Jid,
    intensity: u8,
    status: MitigationStatus,
    end_time: Option<Instant>,
}

struct ResponseState {
    active_incidents: HashMap<String, ActiveIncident>,
    refused_cfps: u64,
    mitigations_succeeded: u64,
    mitigations_failed: u64,
    /// Wall-clock start of every mitigation; the first entry is the
    /// time-to-first-mitigation metric
    mitigation_history: Vec<chrono::DateTime<chrono::Utc>>,
    cpu_usage: f64,
    bandwidth_usage: f64,
}

/// Read-only sample for the final report
#[derive(Clone, Debug)]
pub struct ResponseSnapshot {
    pub jid: Jid,
    pub refused_cfps: u64,
    pub mitigations_succeeded: u64,
    pub mitigations_failed: u64,
    pub mitigation_history: Vec<chrono::DateTime<chrono::Utc>>,
    pub active_mitigations: usize,
    pub cpu_usage: f64,
}

pub struct ResponseAgent {
    jid: Jid,
    /// Node and router JIDs this responder may issue firewall commands to
    protected_jids: Vec<Jid>,
    state: Mutex<ResponseState>,
    bus: Arc<MessageBus>,
    rng: SimRng,
    shutdown: ShutdownSignal,
}

impl ResponseAgent {
    pub fn new(
        jid: Jid,
        protected_jids: Vec<Jid>,
        bus: Arc<MessageBus>,
        rng: SimRng,
        shutdown: ShutdownSignal,
    ) -> Arc<Self> {
        Arc::new(ResponseAgent {
            jid,
            protected_jids,
            state: Mutex::new(ResponseState {
                active_incidents: HashMap::new(),
                refused_cfps: 0,
                mitigations_succeeded: 0,
                mitigations_failed: 0,
                mitigation_history: Vec::new(),
                cpu_usage: BASE_CPU,
                bandwidth_usage: 3.0,
            }),
            bus,
            rng,
            shutdown,
        })
    }

    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn snapshot(&self) -> ResponseSnapshot {
        let state = self.state.lock();
        ResponseSnapshot {
            jid: self.jid.clone(),
            refused_cfps: state.refused_cfps,
            mitigations_succeeded: state.mitigations_succeeded,
            mitigations_failed: state.mitigations_failed,
            mitigation_history: state.mitigation_history.clone(),
            active_mitigations: Self::active_count(&state),
            cpu_usage: state.cpu_usage,
        }
    }

    fn active_count(state: &ResponseState) -> usize {
        state
            .active_incidents
            .values()
            .filter(|i| i.status == MitigationStatus::Mitigating)
            .count()
    }

    pub fn spawn(self: &Arc<Self>, mailbox: Mailbox) {
        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.recv_loop(mailbox).await });

        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.cleanup_loop().await });

        let agent = Arc::clone(self);
        tokio::spawn(async move { agent.resource_loop().await });

        info!(
            responder = %self.jid,
            protected = self.protected_jids.len(),
            "response agent started"
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
        debug!(responder = %self.jid, "participant behaviour stopped");
    }

    pub async fn handle_message(self: &Arc<Self>, msg: Message) {
        match (msg.protocol(), msg.performative()) {
            (Some(protocol::CNP_CFP), Some(performative::CFP)) => {
                self.handle_cfp(&msg).await;
            }
            (Some(protocol::CNP_ACCEPT), Some(performative::ACCEPT_PROPOSAL)) => {
                self.handle_accept(&msg).await;
            }
            (Some(protocol::CNP_REJECT), _) => {
                debug!(responder = %self.jid, "proposal rejected");
            }
            _ => {
                // firewall-control OK/ERROR replies and stray traffic
                debug!(responder = %self.jid, sender = %msg.sender, "ignoring message");
            }
        }
    }

    /// Refuse outright when saturated, otherwise bid the availability score
    async fn handle_cfp(&self, msg: &Message) {
        let incident_id = msg.get_metadata(meta::INCIDENT_ID).unwrap_or("unknown").to_string();
        let threat_type = msg.get_metadata(meta::THREAT_TYPE).unwrap_or("unknown");

        let (current_cpu, active) = {
            let state = self.state.lock();
            let active = Self::active_count(&state);
            (BASE_CPU + active as f64 * MITIGATION_CPU, active)
        };

        if current_cpu > REFUSAL_CPU_THRESHOLD {
            {
                let mut state = self.state.lock();
                state.refused_cfps += 1;
            }
            CNP_REFUSALS_TOTAL.inc();
            warn!(
                responder = %self.jid,
                incident = %incident_id,
                cpu = current_cpu,
                active,
                "refusing CFP, no capacity"
            );
            let refuse = Message::new(
                msg.sender.clone(),
                self.jid.clone(),
                format!("Overloaded: CPU={:.1}%", current_cpu),
            )
            .with_protocol(protocol::CNP_REFUSE)
            .with_performative(performative::REFUSE)
            .with_metadata(meta::INCIDENT_ID, incident_id);
            self.bus.send(refuse);
            return;
        }

        let score = current_cpu + active as f64 * 10.0;
        debug!(
            responder = %self.jid,
            incident = %incident_id,
            threat_type,
            score,
            "bidding on incident"
        );
        let proposal = Message::new(
            msg.sender.clone(),
            self.jid.clone(),
            format!("Proposal for incident {}", incident_id),
        )
        .with_protocol(protocol::CNP_PROPOSE)
        .with_performative(performative::PROPOSE)
        .with_metadata(meta::INCIDENT_ID, incident_id)
        .with_metadata(meta::AVAILABILITY_SCORE, format!("{:.2}", score));
        self.bus.send(proposal);
    }

    /// Contract won: record the incident and run the mitigation as its own
    /// task so further CFPs stay servable
    async fn handle_accept(self: &Arc<Self>, msg: &Message) {
        let incident_id = match msg.get_metadata(meta::INCIDENT_ID) {
            Some(id) => id.to_string(),
            None => return,
        };
        let threat_type = msg
            .get_metadata(meta::THREAT_TYPE)
            .unwrap_or("unknown")
            .to_string();
        let offender = Jid::new(msg.get_metadata(meta::OFFENDER_JID).unwrap_or("unknown"));
        let victim = Jid::new(msg.get_metadata(meta::VICTIM_JID).unwrap_or("unknown"));
        let intensity: u8 = msg
            .get_metadata(meta::INTENSITY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let monitor = msg.sender.clone();

        info!(
            responder = %self.jid,
            incident = %incident_id,
            threat_type = %threat_type,
            "won contract, executing mitigation"
        );

        {
            let mut state = self.state.lock();
            state.active_incidents.insert(
                incident_id.clone(),
                ActiveIncident {
                    threat_type: threat_type.clone(),
                    offender_jid: offender.clone(),
                    victim_jid: victim.clone(),
                    intensity,
                    status: MitigationStatus::Mitigating,
                    end_time: None,
                },
            );
        }

        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let success = agent
                .execute_mitigation(&incident_id, &threat_type, &offender, &victim, intensity)
                .await;

            {
                let mut state = agent.state.lock();
                if let Some(incident) = state.active_incidents.get_mut(&incident_id) {
                    incident.status = if success {
                        MitigationStatus::Resolved
                    } else {
                        MitigationStatus::Failed
                    };
                    incident.end_time = Some(Instant::now());
                }
                if success {
                    state.mitigations_succeeded += 1;
                } else {
                    state.mitigations_failed += 1;
                }
            }
            MITIGATIONS_TOTAL
                .with_label_values(&[if success { "success" } else { "failure" }])
                .inc();

            let inform = Message::new(
                monitor,
                agent.jid.clone(),
                format!(
                    "Incident {} {}",
                    incident_id,
                    if success { "resolved" } else { "failed" }
                ),
            )
            .with_protocol(protocol::CNP_INFORM)
            .with_performative(performative::INFORM)
            .with_metadata(meta::INCIDENT_ID, incident_id.clone())
            .with_metadata(meta::STATUS, if success { "success" } else { "failure" });
            agent.bus.send(inform);
        });
    }

    /// Broadcast a firewall command to every protected JID
    fn broadcast_control(&self, body: &str) {
        for jid in &self.protected_jids {
            let ctrl = Message::new(jid.clone(), self.jid.clone(), body)
                .with_protocol(protocol::FIREWALL_CONTROL);
            self.bus.send(ctrl);
        }
    }

    fn send_forensic_clean(&self, victim: &Jid) {
        let msg = Message::new(
            victim.clone(),
            self.jid.clone(),
            "FORENSIC_CLEAN:insider_threat",
        )
        .with_protocol(protocol::INCIDENT_RESPONSE);
        self.bus.send(msg);
    }

    /// Phase timings scale with attacker intensity; they control overlap and
    /// responder saturation, so they are part of the behavioural contract.
    pub(crate) async fn execute_mitigation(
        self: &Arc<Self>,
        incident_id: &str,
        threat_type: &str,
        offender: &Jid,
        victim: &Jid,
        intensity: u8,
    ) -> bool {
        {
            let mut state = self.state.lock();
            state.mitigation_history.push(chrono::Utc::now());
        }
        let i = intensity as f64;

        // Phase 1: investigation, longer for more sophisticated attacks
        let investigation = Duration::from_secs_f64(2.0 + 0.8 * i);
        info!(
            responder = %self.jid,
            incident = incident_id,
            threat_type,
            secs = investigation.as_secs_f64(),
            "investigating"
        );
        tokio::time::sleep(investigation).await;

        // Friendly-fire safeguard: only ever mitigate actual attackers
        if !offender.as_str().contains("attacker") {
            warn!(
                responder = %self.jid,
                incident = incident_id,
                offender = %offender,
                "safeguard: refusing to mitigate internal JID"
            );
            return false;
        }

        if threat_type == "malware" || threat_type == "resource_anomaly" {
            self.mitigate_malware(incident_id, offender, victim, i).await
        } else if threat_type == "ddos" {
            self.mitigate_ddos(incident_id, offender, i).await
        } else if threat_type.contains("insider_threat") {
            self.mitigate_insider(incident_id, threat_type, offender, victim, intensity)
                .await
        } else {
            warn!(responder = %self.jid, incident = incident_id, threat_type, "unknown threat type");
            false
        }
    }

    async fn mitigate_malware(&self, incident_id: &str, offender: &Jid, victim: &Jid, i: f64) -> bool {
        info!(responder = %self.jid, incident = incident_id, offender = %offender, "malware containment");

        // Containment: evasive strains take longer to fence in
        tokio::time::sleep(Duration::from_secs_f64(1.0 + 0.6 * i)).await;
        self.broadcast_control(&format!("BLOCK_JID:{}", offender));

        if victim.as_str() != "unknown" && !victim.as_str().contains("attacker") {
            // Eradication on the victim
            tokio::time::sleep(Duration::from_secs_f64(1.0 + 0.4 * i)).await;
            let cure = Message::new(victim.clone(), self.jid.clone(), "CURE_INFECTION")
                .with_protocol(protocol::MALWARE_CURE);
            self.bus.send(cure);
        }

        self.broadcast_control(&format!("QUARANTINE_ADVISORY:{}", incident_id));
        true
    }

    async fn mitigate_ddos(&self, incident_id: &str, offender: &Jid, i: f64) -> bool {
        info!(responder = %self.jid, incident = incident_id, offender = %offender, "ddos defense, rate limiting");

        tokio::time::sleep(Duration::from_secs_f64(3.0 + 0.8 * i)).await;
        self.broadcast_control(&format!("RATE_LIMIT:{}:10msg/s", offender));

        tokio::time::sleep(Duration::from_secs_f64(1.0 + 0.3 * i)).await;
        self.broadcast_control(&format!("TEMP_BLOCK:{}:15s", offender));
        true
    }

    async fn mitigate_insider(
        &self,
        incident_id: &str,
        threat_type: &str,
        offender: &Jid,
        victim: &Jid,
        intensity: u8,
    ) -> bool {
        let i = intensity as f64;
        if victim.as_str() == "unknown" {
            warn!(responder = %self.jid, incident = incident_id, "insider mitigation without identified target");
            return false;
        }

        // Evidence gathering before any enforcement
        tokio::time::sleep(Duration::from_secs_f64(2.0 + 0.7 * i)).await;

        let success_rate = (95.0 - 5.0 * i).max(40.0);
        let mut apply = self.rng.passes(success_rate);

        let is_credential = threat_type.contains("login") || threat_type.contains("unauthorized");
        let is_exfiltration = threat_type.contains("exfiltration");
        let is_backdoor = threat_type.contains("backdoor") || threat_type.contains("lateral");

        // Entrenched backdoors get an extra chance to survive enforcement
        if apply && is_backdoor && intensity != 9 {
            apply = self.rng.coin();
        }

        if !apply || (!is_credential && !is_exfiltration && !is_backdoor) {
            warn!(
                responder = %self.jid,
                incident = incident_id,
                success_rate,
                "insider evaded enforcement, forensic clean only"
            );
            self.send_forensic_clean(victim);
            return false;
        }

        if is_credential {
            info!(responder = %self.jid, incident = incident_id, offender = %offender, "suspending insider access");

            tokio::time::sleep(Duration::from_secs_f64(1.0 + 0.4 * i)).await;
            let suspend = Message::new(
                victim.clone(),
                self.jid.clone(),
                format!("SUSPEND_ACCESS:{}", offender),
            )
            .with_protocol(protocol::FIREWALL_CONTROL);
            self.bus.send(suspend);

            let notice = Message::new(
                offender.clone(),
                self.jid.clone(),
                "ACCOUNT_SUSPENDED: Your account has been suspended due to suspicious activity",
            );
            self.bus.send(notice);

            self.send_forensic_clean(victim);
            return true;
        }

        // Exfiltration and backdoor cases escalate to a permanent ban
        let notice_body = if is_exfiltration {
            "ACCOUNT_BANNED: Permanent ban due to repeated security violations"
        } else {
            "ACCOUNT_BANNED: Permanent ban enforced due to repeated severe violations"
        };
        info!(responder = %self.jid, incident = incident_id, offender = %offender, "applying permanent ban");
        let notice = Message::new(offender.clone(), self.jid.clone(), notice_body);
        self.bus.send(notice);

        for jid in &self.protected_jids {
            let ctrl = Message::new(
                jid.clone(),
                self.jid.clone(),
                format!("BLOCK_JID:{}", offender),
            )
            .with_protocol(protocol::FIREWALL_CONTROL);
            self.bus.send(ctrl);

            let forensic = Message::new(jid.clone(), self.jid.clone(), "FORENSIC_CLEAN:insider_threat")
                .with_protocol(protocol::INCIDENT_RESPONSE);
            self.bus.send(forensic);
        }
        true
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(CLEANUP_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {}
            }
            self.cleanup_completed();
        }
    }

    fn cleanup_completed(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.active_incidents.len();
        state.active_incidents.retain(|_, incident| {
            !(incident.status != MitigationStatus::Mitigating
                && incident
                    .end_time
                    .map(|t| now.duration_since(t) >= COMPLETED_RETENTION)
                    .unwrap_or(false))
        });
        let removed = before - state.active_incidents.len();
        if removed > 0 {
            debug!(responder = %self.jid, removed, "cleaned up completed incidents");
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
            let mut state = self.state.lock();
            let active = Self::active_count(&state) as f64;
            state.cpu_usage = (BASE_CPU + active * MITIGATION_CPU).min(100.0);
            state.bandwidth_usage = (3.0 + active * 5.0).min(100.0);
        }
    }
}

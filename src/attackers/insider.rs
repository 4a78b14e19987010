//! Insider threat attacker: three-phase escalation with ban awareness
//!
//! Phase 1 probes credentials, phase 2 exfiltrates, phase 3 installs
//! backdoors. The attacker watches its own inbox for suspension and ban
//! notices; how much pressure it takes to actually stop depends on intensity.

use crate::agent_framework::{
    meta, protocol, Jid, Mailbox, Message, MessageBus, ShutdownSignal, TaskSpec,
};
use crate::rng::SimRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const ATTEMPT_PERIOD: Duration = Duration::from_secs(3);
/// Attempts 1-5 probe logins, 6-10 exfiltrate, 11+ install backdoors
const PHASE1_ATTEMPTS: usize = 5;
const PHASE2_ATTEMPTS: usize = 10;

pub struct InsiderAttacker {
    jid: Jid,
    targets: Vec<Jid>,
    intensity: u8,
    duration: Duration,
    bus: Arc<MessageBus>,
    rng: SimRng,
    shutdown: ShutdownSignal,
}

impl InsiderAttacker {
    pub fn new(
        jid: Jid,
        targets: Vec<Jid>,
        intensity: u8,
        duration: Duration,
        bus: Arc<MessageBus>,
        rng: SimRng,
        shutdown: ShutdownSignal,
    ) -> Self {
        InsiderAttacker {
            jid,
            targets,
            intensity: intensity.clamp(1, 10),
            duration,
            bus,
            rng,
            shutdown,
        }
    }

    pub fn spawn(self, mailbox: Mailbox) {
        tokio::spawn(async move { self.run(mailbox).await });
    }

    /// Whether a countermeasure notice stops the attack.
    /// Low-intensity attackers fold immediately; APT-grade ones keep going
    /// until the bans become repeated and severe.
    pub fn stops_on_notice(&self, body: &str) -> bool {
        let lower = body.to_lowercase();
        if !(lower.contains("suspend") || lower.contains("block") || lower.contains("ban")) {
            return false;
        }
        if self.intensity <= 7 {
            return true;
        }
        if !lower.contains("repeated") {
            // first notice: shrug it off and rotate credentials
            return false;
        }
        if lower.contains("severe") {
            if self.intensity <= 9 {
                return true;
            }
            // maximum intensity: even a repeated severe ban is a coin flip
            return self.rng.coin();
        }
        self.intensity < 9
    }

    async fn run(self, mut mailbox: Mailbox) {
        if self.targets.is_empty() {
            return;
        }
        let max_attempts = (self.duration.as_secs() / ATTEMPT_PERIOD.as_secs()).max(1) as usize;
        info!(
            attacker = %self.jid,
            intensity = self.intensity,
            max_attempts,
            "insider threat attack started: 5 failed logins -> exfiltration -> backdoor"
        );

        let mut shutdown = self.shutdown.subscribe();
        let started = Instant::now();
        let mut attempt = 0usize;
        let mut target_index = 0usize;
        let mut phase = 0u8;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(ATTEMPT_PERIOD) => {}
            }

            // Drain countermeasure notices before acting again
            let mut stopped = false;
            while let Some(notice) = mailbox.try_recv() {
                if self.stops_on_notice(&notice.body) {
                    warn!(attacker = %self.jid, notice = %notice.body, "attack stopped by countermeasures");
                    stopped = true;
                    break;
                } else if !notice.body.is_empty() {
                    info!(attacker = %self.jid, notice = %notice.body, "ignoring countermeasure, continuing with evasion");
                }
            }
            if stopped {
                break;
            }

            if started.elapsed() > self.duration || attempt >= max_attempts {
                info!(attacker = %self.jid, attempt, "insider attack duration expired");
                break;
            }

            let target = &self.targets[target_index % self.targets.len()];
            target_index += 1;
            let router = target.parent_router().unwrap_or_else(|| target.clone());

            let mut msg = Message::new(router, self.jid.clone(), String::new())
                .with_protocol(protocol::ATTACK)
                .with_metadata(meta::DST, target.as_str())
                .with_metadata(meta::ATTACKER_INTENSITY, self.intensity.to_string())
                .with_metadata(meta::ORIGINAL_SENDER, self.jid.as_str());

            if attempt < PHASE1_ATTEMPTS {
                if phase != 1 {
                    phase = 1;
                    info!(attacker = %self.jid, "phase 1: failed login attempts (probing)");
                }
                msg.body = format!(
                    "ATTACK: Failed login attempt for admin user (try #{}) on TARGET:{}",
                    attempt + 1,
                    target
                );
                msg.set_metadata(meta::TASK, TaskSpec::new(8.0, 5.0).to_json());
            } else if attempt < PHASE2_ATTEMPTS {
                if phase != 2 {
                    phase = 2;
                    info!(attacker = %self.jid, "phase 2: data exfiltration");
                }
                msg.body = format!(
                    "DATA_EXFILTRATION:sensitive_data (intensity={}) TARGET:{}",
                    self.intensity, target
                );
            } else {
                if phase != 3 {
                    phase = 3;
                    info!(attacker = %self.jid, "phase 3: backdoor installation");
                }
                msg.body = format!(
                    "BACKDOOR_INSTALL:insider_backdoor (intensity={}) TARGET:{}",
                    self.intensity, target
                );
            }

            self.bus.send(msg);
            attempt += 1;
        }
    }
}

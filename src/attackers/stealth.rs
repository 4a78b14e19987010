//! Stealth malware attacker: slow periodic payloads that dodge rate detection

use crate::agent_framework::{meta, protocol, Jid, Message, MessageBus, ShutdownSignal, TaskSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Payload rotation; every body carries a keyword the defense can learn
const MALWARE_MESSAGES: [&str; 6] = [
    "ATTACK: Attempting to install trojan backdoor",
    "ATTACK: Trying to inject malware payload",
    "ATTACK: Attempting virus propagation",
    "ATTACK: Trying to deploy ransomware",
    "ATTACK: Attempting worm replication",
    "ATTACK: Trying to exploit system vulnerability",
];

pub struct StealthMalwareAttacker {
    jid: Jid,
    targets: Vec<Jid>,
    intensity: u8,
    duration: Duration,
    bus: Arc<MessageBus>,
    shutdown: ShutdownSignal,
}

impl StealthMalwareAttacker {
    pub fn new(
        jid: Jid,
        targets: Vec<Jid>,
        intensity: u8,
        duration: Duration,
        bus: Arc<MessageBus>,
        shutdown: ShutdownSignal,
    ) -> Self {
        StealthMalwareAttacker {
            jid,
            targets,
            intensity: intensity.clamp(1, 10),
            duration,
            bus,
            shutdown,
        }
    }

    /// Higher intensity sends more often, but never faster than every 2 s
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64((10.0 / self.intensity as f64).max(2.0))
    }

    pub fn spawn(self) {
        tokio::spawn(async move { self.run().await });
    }

    async fn run(self) {
        if self.targets.is_empty() {
            return;
        }
        let period = self.period();
        info!(
            attacker = %self.jid,
            intensity = self.intensity,
            period_secs = period.as_secs_f64(),
            "stealth malware attack started"
        );

        let mut shutdown = self.shutdown.subscribe();
        let started = Instant::now();
        let mut target_index = 0usize;
        let mut msg_index = 0usize;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(period) => {}
            }
            if started.elapsed() > self.duration {
                info!(attacker = %self.jid, "stealth malware attack duration expired");
                break;
            }

            let target = &self.targets[target_index % self.targets.len()];
            target_index += 1;
            let body = MALWARE_MESSAGES[msg_index % MALWARE_MESSAGES.len()];
            msg_index += 1;

            let router = target.parent_router().unwrap_or_else(|| target.clone());
            let msg = Message::new(router, self.jid.clone(), body)
                .with_protocol(protocol::ATTACK)
                .with_metadata(meta::DST, target.as_str())
                .with_metadata(meta::ATTACKER_INTENSITY, self.intensity.to_string())
                .with_metadata(
                    meta::TASK,
                    TaskSpec::new(self.intensity as f64 * 5.0, 3.0).to_json(),
                );
            self.bus.send(msg);
        }
    }
}

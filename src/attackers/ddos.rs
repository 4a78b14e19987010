//! DDoS attacker: three high-volume bursts against round-robin targets

use crate::agent_framework::{meta, protocol, Jid, Message, MessageBus, ShutdownSignal, TaskSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const MAX_BURSTS: usize = 3;
const BURST_INTERVAL: Duration = Duration::from_secs(5);
/// Pacing inside a burst so the platform queue is not the bottleneck
const SEND_PACING: Duration = Duration::from_millis(10);

pub struct DdosAttacker {
    jid: Jid,
    targets: Vec<Jid>,
    intensity: u8,
    bus: Arc<MessageBus>,
    shutdown: ShutdownSignal,
}

impl DdosAttacker {
    pub fn new(
        jid: Jid,
        targets: Vec<Jid>,
        intensity: u8,
        bus: Arc<MessageBus>,
        shutdown: ShutdownSignal,
    ) -> Self {
        DdosAttacker {
            jid,
            targets,
            intensity: intensity.clamp(1, 10),
            bus,
            shutdown,
        }
    }

    pub fn spawn(self) {
        tokio::spawn(async move { self.run().await });
    }

    async fn run(self) {
        if self.targets.is_empty() {
            return;
        }
        let burst_size = self.intensity as usize * 10;
        info!(
            attacker = %self.jid,
            intensity = self.intensity,
            burst_size,
            "DDoS attack plan: {} bursts x {} messages",
            MAX_BURSTS,
            burst_size
        );

        let mut shutdown = self.shutdown.subscribe();
        let mut target_index = 0usize;

        for burst in 1..=MAX_BURSTS {
            info!(attacker = %self.jid, burst, "sending DDoS burst");
            for seq in 0..burst_size {
                let target = &self.targets[target_index % self.targets.len()];
                target_index += 1;

                // Attacks are addressed to the target's parent router; a
                // target without one is flooded directly
                let router = target.parent_router().unwrap_or_else(|| target.clone());

                let msg = Message::new(
                    router,
                    self.jid.clone(),
                    format!("REQUEST:{}/{}", seq + 1, burst_size),
                )
                .with_protocol(protocol::ATTACK)
                .with_metadata(meta::DST, target.as_str())
                .with_metadata(meta::ATTACKER_INTENSITY, self.intensity.to_string())
                .with_metadata(
                    meta::TASK,
                    TaskSpec::new(self.intensity as f64 * 3.0, 2.0).to_json(),
                );
                self.bus.send(msg);

                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = tokio::time::sleep(SEND_PACING) => {}
                }
            }
            info!(attacker = %self.jid, burst, "burst complete");

            if burst < MAX_BURSTS {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = tokio::time::sleep(BURST_INTERVAL) => {}
                }
            }
        }
        info!(attacker = %self.jid, "DDoS attack finished");
    }
}

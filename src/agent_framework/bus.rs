//! In-process message bus with JID addressing
//!
//! The bus is the only channel between agents. Each registered JID owns an
//! unbounded inbox; `send` is best-effort and drops silently when the
//! receiver is unknown (matching the transport's semantics). A single queue
//! per receiver gives FIFO ordering per (sender, receiver) pair; ordering
//! across pairs is unspecified.

use crate::agent_framework::message::{Jid, Message};
use crate::metrics::{MESSAGES_DELIVERED_TOTAL, MESSAGES_DROPPED_TOTAL};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Routes messages between registered agents by exact JID
pub struct MessageBus {
    inboxes: DashMap<Jid, mpsc::UnboundedSender<Message>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Arc<Self> {
        Arc::new(MessageBus {
            inboxes: DashMap::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Register a JID and hand back its mailbox. Re-registering replaces the
    /// previous inbox.
    pub fn register(&self, jid: &Jid) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(jid.clone(), tx);
        debug!(jid = %jid, "agent registered on bus");
        Mailbox {
            jid: jid.clone(),
            rx,
        }
    }

    /// Remove a JID from the bus; subsequent sends to it drop silently
    pub fn deregister(&self, jid: &Jid) {
        self.inboxes.remove(jid);
        debug!(jid = %jid, "agent deregistered from bus");
    }

    pub fn is_registered(&self, jid: &Jid) -> bool {
        self.inboxes.contains_key(jid)
    }

    /// Non-blocking enqueue for the receiver; fails silently if the receiver
    /// is unknown or gone
    pub fn send(&self, msg: Message) {
        match self.inboxes.get(&msg.to) {
            Some(tx) => {
                if tx.send(msg).is_ok() {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    MESSAGES_DELIVERED_TOTAL.inc();
                } else {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    MESSAGES_DROPPED_TOTAL
                        .with_label_values(&["receiver_gone"])
                        .inc();
                }
            }
            None => {
                debug!(to = %msg.to, "no inbox for receiver; message dropped");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                MESSAGES_DROPPED_TOTAL
                    .with_label_values(&["unknown_receiver"])
                    .inc();
            }
        }
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving side of an agent's inbox
pub struct Mailbox {
    jid: Jid,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Mailbox {
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    /// Next message, or None once the bus side is gone
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Next message or None after the timeout elapses
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drain without waiting; used by agents that poll their inbox
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

/// Simulation-wide stop signal observed by every behaviour loop
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        ShutdownSignal { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signal all behaviours to stop at their next suspension point
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

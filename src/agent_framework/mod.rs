//! Agent Framework for the defense simulator
//! ===========================================
//! Provides the core infrastructure shared by every agent in the simulated
//! network: the typed message, the JID-addressed bus, and the shutdown
//! signal behaviours observe at their suspension points.
//!
//! # Architecture
//!
//! - **Typed messages** with string metadata carrying the wire conventions
//!   (`protocol`, `performative`, `dst`, `ttl`, `task`, ...)
//! - **Best-effort bus** with one FIFO inbox per registered JID
//! - **Event-driven behaviours** as tokio tasks sharing per-agent state
//! - **Cooperative shutdown** via a broadcast channel

pub mod bus;
pub mod message;

pub use bus::{Mailbox, MessageBus, ShutdownSignal};
pub use message::{meta, performative, protocol, Jid, Message, TaskSpec};

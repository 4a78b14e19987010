//! Network Plane
//! ==============
//! The simulated enterprise network: workstation/server nodes, subnet
//! routers and the routing primitives they share.
//!
//! Copyright © 2025 Stephen Bilodeau. All rights reserved.
//! Licensed under GPL-3.0 with proprietary agent clauses.

pub mod node;
pub mod router;
pub mod routing;

pub use node::{NodeAgent, NodeConfig, NodeSnapshot};
pub use router::{RouterAgent, RouterConfig, RouterSnapshot};
pub use routing::{NeighborLoad, NeighborMap, RoutingTable};

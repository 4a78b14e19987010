//! Routing table and cost-weighted next-hop selection
//!
//! The static table is insertion-ordered: exact matches win, then the first
//! wildcard-suffix pattern in insertion order. Dynamic selection searches the
//! router's known neighbors breadth-first, weighting each hop by the load the
//! neighbor last reported; identical inputs always produce identical hops.

use crate::agent_framework::Jid;
use tracing::debug;

/// Load last reported by a neighbor router, used as BFS edge-cost input
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NeighborLoad {
    pub cpu_usage: f64,
    pub bandwidth_usage: f64,
}

/// Insertion-ordered mapping of destination pattern to next hop.
/// Patterns are exact JIDs or suffix wildcards like `router3_*`.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
    routes: Vec<(String, Jid)>,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable { routes: Vec::new() }
    }

    pub fn add_route(&mut self, pattern: impl Into<String>, next_hop: Jid) {
        self.routes.push((pattern.into(), next_hop));
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Exact match first, then the first matching wildcard in insertion order
    pub fn lookup(&self, dst: &str) -> Option<&Jid> {
        for (pattern, next_hop) in &self.routes {
            if pattern == dst {
                return Some(next_hop);
            }
        }
        for (pattern, next_hop) in &self.routes {
            if let Some(prefix) = pattern.strip_suffix('*') {
                if dst.starts_with(prefix) {
                    return Some(next_hop);
                }
            }
        }
        None
    }
}

/// Known neighbor routers in insertion order with their last-reported load
#[derive(Clone, Debug, Default)]
pub struct NeighborMap {
    neighbors: Vec<(Jid, NeighborLoad)>,
}

impl NeighborMap {
    pub fn new() -> Self {
        NeighborMap {
            neighbors: Vec::new(),
        }
    }

    pub fn add_neighbor(&mut self, jid: Jid) {
        if !self.neighbors.iter().any(|(j, _)| *j == jid) {
            self.neighbors.push((jid, NeighborLoad::default()));
        }
    }

    pub fn update_load(&mut self, jid: &Jid, load: NeighborLoad) {
        if let Some(entry) = self.neighbors.iter_mut().find(|(j, _)| j == jid) {
            entry.1 = load;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Jid, NeighborLoad)> {
        self.neighbors.iter()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

/// Per-hop cost: unit hop weight plus half the normalized neighbor load
fn hop_cost(load: NeighborLoad) -> f64 {
    1.0 + 0.5 * (load.cpu_usage + load.bandwidth_usage) / 200.0
}

/// Pick the least-cost neighbor whose router prefix reaches `dst`.
/// Ties resolve to the earliest-inserted neighbor, keeping the choice
/// deterministic for identical inputs.
pub fn best_next_hop(self_jid: &Jid, neighbors: &NeighborMap, dst: &Jid) -> Option<Jid> {
    let dst_prefix = dst.router_prefix();
    let mut best: Option<(Jid, f64)> = None;

    for (neighbor, load) in neighbors.iter() {
        if neighbor.router_prefix() != dst_prefix {
            continue;
        }
        let cost = hop_cost(*load);
        match &best {
            Some((_, best_cost)) if cost >= *best_cost => {}
            _ => best = Some((neighbor.clone(), cost)),
        }
    }

    if let Some((hop, cost)) = &best {
        debug!(
            router = %self_jid,
            dst = %dst,
            next_hop = %hop,
            cost,
            "selected next hop"
        );
    }
    best.map(|(hop, _)| hop)
}

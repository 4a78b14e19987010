//! Topology builder: router adjacency and derived static routes

use crate::agent_framework::Jid;
use crate::sim::config::{RouterTopology, SimulationConfig};
use std::collections::VecDeque;

/// Neighbor indices for every router under the chosen shape, ascending and
/// de-duplicated so route derivation is deterministic
pub fn router_neighbors(topology: RouterTopology, n: usize) -> Vec<Vec<usize>> {
    let mut adjacency = vec![Vec::new(); n];
    if n <= 1 {
        return adjacency;
    }
    match topology {
        RouterTopology::Ring => {
            for i in 0..n {
                let prev = (i + n - 1) % n;
                let next = (i + 1) % n;
                adjacency[i] = if prev == next { vec![prev] } else { vec![prev.min(next), prev.max(next)] };
            }
        }
        RouterTopology::Mesh => {
            for i in 0..n {
                adjacency[i] = (0..n).filter(|j| *j != i).collect();
            }
        }
        RouterTopology::Star => {
            adjacency[0] = (1..n).collect();
            for item in adjacency.iter_mut().skip(1) {
                *item = vec![0];
            }
        }
        RouterTopology::Line => {
            for i in 0..n {
                let mut neighbors = Vec::new();
                if i > 0 {
                    neighbors.push(i - 1);
                }
                if i + 1 < n {
                    neighbors.push(i + 1);
                }
                adjacency[i] = neighbors;
            }
        }
    }
    adjacency
}

/// Shortest-path first hop from `from` to every other router (BFS over the
/// adjacency, neighbors explored in ascending order)
fn first_hops(adjacency: &[Vec<usize>], from: usize) -> Vec<Option<usize>> {
    let n = adjacency.len();
    let mut parent: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    visited[from] = true;
    let mut queue = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        for &next in &adjacency[current] {
            if !visited[next] {
                visited[next] = true;
                parent[next] = Some(current);
                queue.push_back(next);
            }
        }
    }

    (0..n)
        .map(|dst| {
            if dst == from || !visited[dst] {
                return None;
            }
            let mut hop = dst;
            while let Some(p) = parent[hop] {
                if p == from {
                    return Some(hop);
                }
                hop = p;
            }
            None
        })
        .collect()
}

/// Static wildcard routes for one router: `routerD_*` (node traffic) and the
/// exact router JID, each mapped to the first hop on the shortest path
pub fn static_routes(
    config: &SimulationConfig,
    adjacency: &[Vec<usize>],
    from: usize,
) -> Vec<(String, Jid)> {
    let hops = first_hops(adjacency, from);
    let mut routes = Vec::new();
    for (dst, hop) in hops.iter().enumerate() {
        if let Some(hop) = hop {
            let next_jid = Jid::new(config.router_jid(*hop));
            routes.push((format!("router{}_", dst) + "*", next_jid.clone()));
            routes.push((config.router_jid(dst), next_jid));
        }
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(n: usize) -> SimulationConfig {
        SimulationConfig {
            num_routers: n,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_ring_neighbors() {
        let adj = router_neighbors(RouterTopology::Ring, 4);
        assert_eq!(adj[0], vec![1, 3]);
        assert_eq!(adj[1], vec![0, 2]);
        assert_eq!(adj[3], vec![0, 2]);
    }

    #[test]
    fn test_two_router_ring_dedupes() {
        let adj = router_neighbors(RouterTopology::Ring, 2);
        assert_eq!(adj[0], vec![1]);
        assert_eq!(adj[1], vec![0]);
    }

    #[test]
    fn test_star_neighbors() {
        let adj = router_neighbors(RouterTopology::Star, 4);
        assert_eq!(adj[0], vec![1, 2, 3]);
        assert_eq!(adj[2], vec![0]);
    }

    #[test]
    fn test_line_neighbors() {
        let adj = router_neighbors(RouterTopology::Line, 3);
        assert_eq!(adj[0], vec![1]);
        assert_eq!(adj[1], vec![0, 2]);
        assert_eq!(adj[2], vec![1]);
    }

    #[test]
    fn test_mesh_is_all_pairs() {
        let adj = router_neighbors(RouterTopology::Mesh, 3);
        assert_eq!(adj[1], vec![0, 2]);
    }

    #[test]
    fn test_ring_first_hops_shortest_way_around() {
        let adj = router_neighbors(RouterTopology::Ring, 5);
        let hops = first_hops(&adj, 0);
        assert_eq!(hops[1], Some(1));
        assert_eq!(hops[4], Some(4)); // backwards is shorter
        assert_eq!(hops[2], Some(1)); // two hops via 1
        assert_eq!(hops[0], None);
    }

    #[test]
    fn test_star_routes_via_hub() {
        let adj = router_neighbors(RouterTopology::Star, 4);
        let hops = first_hops(&adj, 2);
        assert_eq!(hops[0], Some(0));
        assert_eq!(hops[3], Some(0)); // leaf to leaf passes the hub
    }

    #[test]
    fn test_static_routes_patterns() {
        let config = config(3);
        let adj = router_neighbors(RouterTopology::Line, 3);
        let routes = static_routes(&config, &adj, 0);

        // router2 traffic leaves router0 via router1
        let node_route = routes
            .iter()
            .find(|(pat, _)| pat == "router2_*")
            .expect("wildcard route");
        assert_eq!(node_route.1, Jid::new("router1@sim.local"));

        let exact_route = routes
            .iter()
            .find(|(pat, _)| pat == "router2@sim.local")
            .expect("exact route");
        assert_eq!(exact_route.1, Jid::new("router1@sim.local"));
    }
}

//! Property tests for the parsing and rule-engine surfaces

use aegis_mesh::agent_framework::{meta, Jid, Message};
use aegis_mesh::network::routing::{best_next_hop, NeighborLoad, NeighborMap, RoutingTable};
use aegis_mesh::security_layer::firewall::FirewallCommand;
use aegis_mesh::security_layer::threat::scan_threat_keywords;
use proptest::prelude::*;

proptest! {
    /// TTL parsing is total: any metadata string yields a value, and absent
    /// or malformed input falls back to 64
    #[test]
    fn ttl_parse_never_panics(raw in ".*") {
        let msg = Message::new(Jid::new("a@d"), Jid::new("b@d"), "x")
            .with_metadata(meta::TTL, raw.clone());
        let ttl = msg.ttl();
        match raw.parse::<i64>() {
            Ok(parsed) => prop_assert_eq!(ttl, parsed),
            Err(_) => prop_assert_eq!(ttl, 64),
        }
    }

    /// Task metadata parsing is total; junk JSON yields None, never a panic
    #[test]
    fn task_parse_never_panics(raw in ".*") {
        let msg = Message::new(Jid::new("a@d"), Jid::new("b@d"), "x")
            .with_metadata(meta::TASK, raw);
        let _ = msg.task();
    }

    /// Firewall command parsing is total over arbitrary bodies
    #[test]
    fn firewall_command_parse_never_panics(body in ".*") {
        let _ = FirewallCommand::parse(&body);
    }

    /// BLOCK_JID parses for any colon-free JID-ish argument
    #[test]
    fn block_jid_round_trips(jid in "[a-z0-9_]{1,16}@[a-z0-9.]{1,16}") {
        let cmd = FirewallCommand::parse(&format!("BLOCK_JID:{}", jid)).unwrap();
        prop_assert_eq!(cmd, FirewallCommand::BlockJid(jid));
    }

    /// Rate-limit commands preserve the numeric limit
    #[test]
    fn rate_limit_round_trips(jid in "[a-z0-9_]{1,16}@[a-z0-9.]{1,16}", rate in 1u32..1000) {
        let cmd = FirewallCommand::parse(&format!("RATE_LIMIT:{}:{}msg/s", jid, rate)).unwrap();
        prop_assert_eq!(cmd, FirewallCommand::RateLimit { jid, max_per_sec: rate });
    }

    /// The threat scanner only ever reports words actually present
    #[test]
    fn threat_scan_reports_only_present_keywords(body in ".{0,200}") {
        let lower = body.to_lowercase();
        for hit in scan_threat_keywords(&body) {
            prop_assert!(lower.contains(hit), "reported {} missing from body", hit);
        }
    }

    /// Routing lookups are deterministic: the same table gives the same hop
    #[test]
    fn routing_lookup_deterministic(dst in "[a-z0-9_]{1,24}@[a-z0-9.]{1,12}") {
        let mut table = RoutingTable::new();
        table.add_route("router1_*", Jid::new("hop1@sim"));
        table.add_route("router2_*", Jid::new("hop2@sim"));
        table.add_route(dst.clone(), Jid::new("exact@sim"));

        let first = table.lookup(&dst).cloned();
        let second = table.lookup(&dst).cloned();
        prop_assert_eq!(first.clone(), second);
        // the exact entry always wins over any wildcard
        prop_assert_eq!(first, Some(Jid::new("exact@sim")));
    }

    /// Next-hop selection is stable under identical neighbor metrics
    #[test]
    fn next_hop_stable(loads in proptest::collection::vec((0.0f64..100.0, 0.0f64..100.0), 1..6)) {
        let mut neighbors = NeighborMap::new();
        for (i, (cpu, bw)) in loads.iter().enumerate() {
            let jid = Jid::new(format!("router7@host{}", i));
            neighbors.add_neighbor(jid.clone());
            neighbors.update_load(&jid, NeighborLoad { cpu_usage: *cpu, bandwidth_usage: *bw });
        }
        let me = Jid::new("router0@sim");
        let dst = Jid::new("router7_node0@host0");

        let first = best_next_hop(&me, &neighbors, &dst);
        let second = best_next_hop(&me, &neighbors, &dst);
        prop_assert_eq!(first, second);
    }
}

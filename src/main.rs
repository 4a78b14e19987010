//! Aegis Mesh Simulator
//! =====================
//! Main entry point for the cyber-defense simulation harness.
//!
//! Copyright © 2025 Stephen Bilodeau. All rights reserved.
//! Licensed under GPL-3.0 with proprietary agent clauses.

use aegis_mesh::sim::{
    AttackKind, AttackerSpec, ScheduledMessage, SimError, Simulation, SimulationConfig,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "aegis-sim",
    about = "Multi-agent cyber-defense simulator",
    version
)]
struct Args {
    /// Domain suffix for all agent JIDs
    #[arg(long, default_value = "sim.local")]
    domain: String,

    /// Agent account password (kept for transport compatibility; the
    /// in-process bus does not authenticate)
    #[arg(long, default_value = "secret")]
    password: String,

    /// Simulation run time in seconds
    #[arg(long, default_value_t = 60)]
    time: u64,

    /// Baseline CPU load for every node, in percent
    #[arg(long, default_value_t = 10.0)]
    base_cpu: f64,

    /// Attack scenario: ddos, stealth, insider, mixed or quiet
    #[arg(long, default_value = "mixed")]
    scenario: String,

    /// Router count
    #[arg(long, default_value_t = 3)]
    routers: usize,

    /// Nodes per router
    #[arg(long, default_value_t = 2)]
    nodes_per_router: usize,

    /// Response agent count
    #[arg(long, default_value_t = 2)]
    responders: usize,

    /// Seed for deterministic probabilistic rolls
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Use wall-clock entropy instead of the fixed seed
    #[arg(long)]
    random: bool,

    /// Where to write the single-row metrics CSV
    #[arg(long, default_value = "simulation_metrics.csv")]
    csv: PathBuf,
}

fn scenario_attackers(scenario: &str) -> Result<Vec<AttackerSpec>, SimError> {
    let attackers = match scenario {
        "quiet" => vec![],
        "ddos" => vec![AttackerSpec {
            kind: AttackKind::Ddos,
            targets: vec![(1, 0)],
            intensity: 3,
            duration_secs: 30,
            start_delay_secs: 5,
        }],
        "stealth" => vec![AttackerSpec {
            kind: AttackKind::StealthMalware,
            targets: vec![(1, 0)],
            intensity: 5,
            duration_secs: 20,
            start_delay_secs: 5,
        }],
        "insider" => vec![AttackerSpec {
            kind: AttackKind::InsiderThreat,
            targets: vec![(1, 0)],
            intensity: 6,
            duration_secs: 45,
            start_delay_secs: 5,
        }],
        "mixed" => vec![
            AttackerSpec {
                kind: AttackKind::Ddos,
                targets: vec![(1, 0)],
                intensity: 3,
                duration_secs: 30,
                start_delay_secs: 5,
            },
            AttackerSpec {
                kind: AttackKind::StealthMalware,
                targets: vec![(2, 0)],
                intensity: 5,
                duration_secs: 20,
                start_delay_secs: 10,
            },
            AttackerSpec {
                kind: AttackKind::InsiderThreat,
                targets: vec![(0, 1)],
                intensity: 6,
                duration_secs: 45,
                start_delay_secs: 15,
            },
        ],
        other => {
            return Err(SimError::InvalidConfig(format!(
                "unknown scenario: {}",
                other
            )))
        }
    };
    Ok(attackers)
}

/// Background service pings exercising the network while it is under attack
fn scenario_traffic() -> Vec<ScheduledMessage> {
    (0..5)
        .map(|i| ScheduledMessage {
            src_router: 0,
            src_node: 0,
            dst_router: 1,
            dst_node: 0,
            body: "PING".to_string(),
            delay_secs: 8 + i * 6,
        })
        .collect()
}

async fn run(args: Args) -> Result<(), SimError> {
    let config = SimulationConfig {
        domain: args.domain,
        num_routers: args.routers,
        nodes_per_router: args.nodes_per_router,
        topology: aegis_mesh::sim::RouterTopology::Ring,
        num_response_agents: args.responders,
        attackers: scenario_attackers(&args.scenario)?,
        scheduled_messages: scenario_traffic(),
        deterministic_resources: !args.random,
        resource_seed_base: args.seed,
        base_cpu: args.base_cpu,
        duration_secs: args.time,
    };

    info!(
        scenario = %args.scenario,
        duration = config.duration_secs,
        "starting simulation"
    );

    let report = Simulation::new(config)?.run().await?;

    println!("{}", report);
    report.write_csv(&args.csv)?;
    info!(csv = %args.csv.display(), "metrics written");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    aegis_mesh::init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("simulation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

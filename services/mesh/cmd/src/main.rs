//! 802.11s mesh simulator.
//!
//! Runs mesh points with peer link management and HWMP path selection over a
//! simulated lossy radio medium, then prints a JSON report of routes, peer
//! links and counters.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod medium;
mod mesh_point;
mod sim;

use config::SimConfig;
use logging::{MeshLogFormatter, SimClock};
use sim::Simulation;

/// Mesh simulator
#[derive(Parser, Debug)]
#[command(name = "mesh-sim", version, about = "802.11s mesh simulator with HWMP path selection")]
struct Args {
    /// Scenario file (YAML)
    #[arg(long, default_value = "mesh-sim.yaml")]
    config: PathBuf,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated time, e.g. 30s
    #[arg(long)]
    duration: Option<humantime::Duration>,

    /// Node announcing itself as root
    #[arg(long)]
    root: Option<usize>,

    /// Frame loss probability
    #[arg(long)]
    loss: Option<f64>,

    /// Pace simulated time against the wall clock
    #[arg(long)]
    realtime: bool,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,

    /// Disable ANSI colors in log output
    #[arg(long)]
    no_color: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut SimConfig) {
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(duration) = self.duration {
            config.duration = duration.into();
        }
        if let Some(root) = self.root {
            config.root = Some(root);
        }
        if let Some(loss) = self.loss {
            config.loss = loss;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut env_filter = EnvFilter::new("warn");
    for target in ["mesh_sim", "mesh_wire", "mesh_routing", "mesh_peering", "mesh_hwmp"] {
        env_filter = env_filter.add_directive(format!("{}={}", target, args.log_level).parse()?);
    }

    let clock = SimClock::default();
    let formatter = if args.no_color {
        MeshLogFormatter::plain("mesh-sim".to_string(), clock.clone())
    } else {
        MeshLogFormatter::new("mesh-sim".to_string(), clock.clone())
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(formatter)
        .init();

    info!("Starting mesh simulator v{}", env!("CARGO_PKG_VERSION"));

    let mut config = SimConfig::load_from_file(&args.config)?;
    args.apply(&mut config);

    let mut simulation = Simulation::new(config)?.with_clock(clock);
    let report = simulation.run(args.realtime).await?;
    info!("Simulation stopped at {:?}", simulation.now());
    let json = serde_json::to_string_pretty(&report)?;

    match &args.report {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report to {:?}", path))?;
            info!("Report written to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

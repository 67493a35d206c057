//! DDC simulation runner
//!
//! Drives the canonical failure scenarios and ad-hoc topologies from the
//! command line.

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ddc_routing::StrategyKind;
use ddc_simulation::{scenarios, topology};

#[derive(Parser)]
#[command(
    name = "ddc-sim",
    about = "Destination-oriented link-reversal routing over failing links",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Reversal engine the routers run
    #[arg(short, long, global = true, default_value = "sequence")]
    strategy: Strategy,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Asynchronous single-link reversal over sequence bits
    Sequence,
    /// All-edges-out reversal under a cross-neighbor lock
    Locking,
}

impl From<Strategy> for StrategyKind {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::Sequence => StrategyKind::Sequence,
            Strategy::Locking => StrategyKind::Locking,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Cut the only path on a three-node line
    Line,

    /// Cut one of two paths on a diamond
    Diamond,

    /// Cut a link, heal it, and watch the metric exchange reintegrate it
    Reanimate,

    /// Random topology with random link churn
    Chaos {
        /// Number of routers
        #[arg(short, long, default_value = "8")]
        nodes: usize,

        /// Ticks to run
        #[arg(short, long, default_value = "500")]
        ticks: u64,
    },

    /// Print a topology without running anything
    Topology {
        /// Shape: line, ring, full, star, diamond, random
        #[arg(short = 'o', long, default_value = "line")]
        shape: String,

        /// Number of routers
        #[arg(short, long, default_value = "6")]
        nodes: usize,

        /// Connection probability for random shapes
        #[arg(short, long, default_value = "0.4")]
        connection_prob: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let strategy: StrategyKind = cli.strategy.into();

    match cli.command {
        Commands::Line => {
            scenarios::run_line_failure(strategy);
        }
        Commands::Diamond => {
            scenarios::run_diamond_failure(strategy);
        }
        Commands::Reanimate => {
            scenarios::run_reanimation(strategy);
        }
        Commands::Chaos { nodes, ticks } => {
            scenarios::run_chaos(strategy, nodes, ticks);
        }
        Commands::Topology {
            shape,
            nodes,
            connection_prob,
        } => {
            let topo = match shape.as_str() {
                "line" => topology::TopologyBuilder::new(nodes).line(),
                "ring" => topology::TopologyBuilder::new(nodes).ring(),
                "full" => topology::TopologyBuilder::new(nodes).full_mesh(),
                "star" => topology::TopologyBuilder::new(nodes).star(),
                "diamond" => topology::diamond(),
                "random" => topology::TopologyBuilder::new(nodes).random(connection_prob),
                other => {
                    eprintln!("Unknown shape: {}. Using line.", other);
                    topology::TopologyBuilder::new(nodes).line()
                }
            };
            println!("{}", topo.visualize());
        }
    }

    Ok(())
}

//! gantry - build graph submission client
//!
//! Decodes serialized build graphs, dumps them for inspection, and submits
//! them to a remote build engine over unix, tcp, or tls transports.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// gantry - build graph submission client
#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the graph as JSON records, one per operation
    Dump(commands::dump::DumpArgs),

    /// Print the graph as a Graphviz DOT document
    Dot(commands::dump::DumpArgs),

    /// Submit the graph to a build engine
    Build(commands::build::BuildArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Dump(args) => commands::dump::run_json(&args),
        Commands::Dot(args) => commands::dump::run_dot(&args),
        Commands::Build(args) => commands::build::run(args),
    }
}

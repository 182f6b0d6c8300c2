//! CLI commands for offline graph inspection.
//!
//! `gantry dump` prints one JSON record per operation; `gantry dot` prints a
//! Graphviz document. Both read the serialized graph from a file argument or
//! stdin and never contact an engine.
//!
//! # Example
//!
//! ```bash
//! gantry dump graph.bin | jq .digest
//! gantry dot graph.bin | dot -Tsvg -o graph.svg
//! ```

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use gantry_core::dump::{write_dot, write_json};

/// Arguments shared by the `dump` and `dot` commands.
#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Graph file to read (stdin when omitted)
    pub file: Option<PathBuf>,
}

/// Runs `gantry dump`.
pub fn run_json(args: &DumpArgs) -> Result<()> {
    let graph = super::read_graph(args.file.as_deref())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_json(&graph, &mut out).context("failed to dump graph")?;
    out.flush().context("failed to flush stdout")?;
    Ok(())
}

/// Runs `gantry dot`.
pub fn run_dot(args: &DumpArgs) -> Result<()> {
    let graph = super::read_graph(args.file.as_deref())?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_dot(&graph, &mut out).context("failed to dump graph")?;
    out.flush().context("failed to flush stdout")?;
    Ok(())
}

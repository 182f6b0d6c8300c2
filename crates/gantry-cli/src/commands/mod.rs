//! Subcommand implementations for the `gantry` binary.
//!
//! # Subcommands
//!
//! - `dump` - print a decoded graph as JSON records
//! - `dot` - print a decoded graph in Graphviz DOT format
//! - `build` - submit a graph to a build engine

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use gantry_core::graph::{decode_graph, BuildGraph};

pub mod build;
pub mod dump;

/// Reads and decodes a serialized graph from `file`, or from stdin when
/// no file was given.
pub(crate) fn read_graph(file: Option<&Path>) -> Result<BuildGraph> {
    let raw = match file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?
        },
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read graph from stdin")?;
            buf
        },
    };
    decode_graph(&raw).context("failed to decode build graph")
}

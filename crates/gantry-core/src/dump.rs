//! Deterministic dumps of decoded build graphs.
//!
//! Two renderings, both pure functions of the graph:
//!
//! - [`write_json`]: one self-contained JSON object per line, in graph
//!   order, carrying the decoded operation, its digest, and its metadata.
//! - [`write_dot`]: a DOT digraph for visualization. Node labels and shapes
//!   depend on the operation kind; edges follow input references and are
//!   labeled with the mount destination when the consumer is an exec
//!   operation mounting that input somewhere other than the root.
//!
//! Repeated dumps of the same graph are byte-identical.

use std::io::{self, Write};

use serde::Serialize;
use thiserror::Error;

use crate::digest::Digest;
use crate::graph::{BuildGraph, GraphNode, InputEdge, OpPayload};
use crate::wire;

/// Errors produced while writing a dump.
#[derive(Debug, Error)]
pub enum DumpError {
    /// The destination writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct DumpRecord<'a> {
    op: OpView<'a>,
    digest: &'a Digest,
    #[serde(rename = "opMetadata")]
    op_metadata: &'a wire::NodeMetadata,
}

#[derive(Serialize)]
struct OpView<'a> {
    inputs: &'a [InputEdge],
    payload: &'a OpPayload,
}

/// Writes the graph as newline-delimited JSON records, one per node.
pub fn write_json<W: Write>(graph: &BuildGraph, writer: &mut W) -> Result<(), DumpError> {
    let default_meta = wire::NodeMetadata::default();
    for node in &graph.nodes {
        let record = DumpRecord {
            op: OpView {
                inputs: &node.inputs,
                payload: &node.payload,
            },
            digest: &node.digest,
            op_metadata: graph.metadata.get(&node.digest).unwrap_or(&default_meta),
        };
        serde_json::to_writer(&mut *writer, &record)?;
        writeln!(writer)?;
    }
    Ok(())
}

/// Writes the graph as a DOT digraph.
///
/// Node statements come first in graph order, then one edge statement per
/// input reference. Every identifier, label, and shape is double-quoted with
/// escaping, so arbitrary identifiers and arguments cannot break the output
/// syntax.
pub fn write_dot<W: Write>(graph: &BuildGraph, writer: &mut W) -> Result<(), DumpError> {
    // TODO: render node metadata (ignore-cache, descriptions) on the label.
    writeln!(writer, "digraph {{")?;
    for node in &graph.nodes {
        let (label, shape) = node_attr(node);
        writeln!(
            writer,
            "  {} [label={} shape={}];",
            quoted(node.digest.as_str()),
            quoted(&label),
            quoted(shape),
        )?;
    }
    for node in &graph.nodes {
        for (position, input) in node.inputs.iter().enumerate() {
            writeln!(
                writer,
                "  {} -> {} [label={}];",
                quoted(input.digest.as_str()),
                quoted(node.digest.as_str()),
                quoted(edge_label(node, position)),
            )?;
        }
    }
    writeln!(writer, "}}")?;
    Ok(())
}

fn node_attr(node: &GraphNode) -> (String, &'static str) {
    match &node.payload {
        OpPayload::Source(op) => (op.identifier.clone(), "ellipse"),
        OpPayload::Exec(op) => (
            op.meta
                .as_ref()
                .map(|meta| meta.args.join(" "))
                .unwrap_or_default(),
            "box",
        ),
        OpPayload::Build(_) => ("build".to_string(), "box3d"),
        OpPayload::Merge(_) => ("merge".to_string(), "invtriangle"),
        OpPayload::Diff(_) => ("diff".to_string(), "doublecircle"),
        OpPayload::File(op) => (file_label(op), "note"),
        OpPayload::Unknown => (node.digest.to_string(), "plaintext"),
    }
}

fn file_label(op: &wire::FileOp) -> String {
    use wire::file_action::Action;

    let mut names = Vec::with_capacity(op.actions.len());
    for action in &op.actions {
        let name = match &action.action {
            Some(Action::Copy(copy)) => format!("copy{{src={}, dest={}}}", copy.src, copy.dest),
            Some(Action::Mkfile(mkfile)) => format!("mkfile{{path={}}}", mkfile.path),
            Some(Action::Mkdir(mkdir)) => format!("mkdir{{path={}}}", mkdir.path),
            Some(Action::Rm(rm)) => format!("rm{{path={}}}", rm.path),
            None => String::new(),
        };
        names.push(name);
    }
    names.join(",")
}

/// Label for the edge into `node` at input `position`.
///
/// An exec mount whose input index matches and whose destination is not the
/// root names the edge after the mount point. Later mounts win when several
/// match.
fn edge_label(node: &GraphNode, position: usize) -> &str {
    let OpPayload::Exec(exec) = &node.payload else {
        return "";
    };
    let mut label = "";
    for mount in &exec.mounts {
        if usize::try_from(mount.input) == Ok(position) && mount.dest != "/" {
            label = &mount.dest;
        }
    }
    label
}

fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

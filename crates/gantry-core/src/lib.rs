//! # gantry-core
//!
//! Build graph model and wire format for the gantry build client.
//!
//! A build graph arrives as a serialized envelope produced by some graph
//! constructor: raw operation bytes in dependency order plus a metadata
//! side-table keyed by content digest. This crate owns everything about that
//! artifact that does not require talking to an engine:
//!
//! - Decoding envelopes into [`graph::BuildGraph`] values
//!   ([`graph::decode_graph`])
//! - Content digests over raw operation bytes ([`digest::Digest`])
//! - The cache-bypass rewrite ([`graph::BuildGraph::bypass_cache`])
//! - Deterministic JSON-lines and DOT dumps ([`dump`])
//! - Per-submission configuration ([`session::BuildSession`])
//! - Progress event types shared with the client ([`progress`])
//!
//! Execution lives in `gantry-client`; this crate never opens a connection.
//!
//! ## Example
//!
//! ```rust
//! use gantry_core::graph;
//!
//! # fn main() -> Result<(), graph::DecodeError> {
//! # let data: &[u8] = &[];
//! let mut build_graph = graph::decode_graph(data)?;
//! build_graph.bypass_cache();
//! let mut dot = Vec::new();
//! gantry_core::dump::write_dot(&build_graph, &mut dot).ok();
//! # Ok(())
//! # }
//! ```

pub mod digest;
pub mod dump;
pub mod graph;
pub mod progress;
pub mod session;
pub mod wire;

pub use digest::Digest;
pub use graph::{decode_graph, BuildGraph, DecodeError, GraphNode, OpPayload};
pub use progress::{StatusUpdate, Vertex};
pub use session::{BuildSession, EngineEndpoint};

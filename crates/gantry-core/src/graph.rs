//! Decoded build graphs.
//!
//! [`decode_graph`] turns a serialized [`GraphEnvelope`](wire::GraphEnvelope)
//! into a [`BuildGraph`]: one [`GraphNode`] per operation, in envelope order,
//! with metadata resolved by content digest. Each node keeps the raw encoded
//! bytes it was decoded from, so resubmitting the graph never re-marshals an
//! operation and digests stay byte-stable.
//!
//! Decoding never interprets operation semantics. Payloads outside the closed
//! kind set decode to [`OpPayload::Unknown`] rather than failing, because a
//! graph produced by a newer client must still be dumpable and submittable.

use std::collections::BTreeMap;

use prost::Message;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::digest::{Digest, DigestError};
use crate::wire;

/// Errors produced while decoding a serialized build graph.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The outer envelope could not be decoded.
    #[error("malformed graph envelope: {0}")]
    Envelope(#[from] prost::DecodeError),

    /// An operation's raw bytes could not be decoded.
    #[error("malformed operation at position {index}: {source}")]
    Operation {
        /// Position of the operation in the envelope.
        index: usize,
        /// Underlying decode failure.
        source: prost::DecodeError,
    },

    /// An input reference carries a digest that does not parse.
    #[error("invalid input digest on operation at position {index}: {source}")]
    InputDigest {
        /// Position of the referencing operation in the envelope.
        index: usize,
        /// Underlying digest parse failure.
        source: DigestError,
    },
}

/// Result type for graph decoding.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Kind-specific payload of a graph node.
///
/// A closed set: consumers match exhaustively. [`OpPayload::Unknown`] covers
/// wire payloads outside the set (a schema newer than this client); such
/// nodes still carry a digest and inputs and are rendered by digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OpPayload {
    Source(wire::SourceOp),
    Exec(wire::ExecOp),
    Build(wire::BuildOp),
    Merge(wire::MergeOp),
    Diff(wire::DiffOp),
    File(wire::FileOp),
    Unknown,
}

impl OpPayload {
    fn from_wire(payload: Option<wire::op_message::Payload>) -> Self {
        use wire::op_message::Payload;
        match payload {
            Some(Payload::Source(op)) => Self::Source(op),
            Some(Payload::Exec(op)) => Self::Exec(op),
            Some(Payload::Build(op)) => Self::Build(op),
            Some(Payload::Merge(op)) => Self::Merge(op),
            Some(Payload::Diff(op)) => Self::Diff(op),
            Some(Payload::File(op)) => Self::File(op),
            None => Self::Unknown,
        }
    }
}

/// Edge from a node to one output of a producing node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputEdge {
    /// Digest of the producing node.
    pub digest: Digest,
    /// Which output of the producer this edge consumes.
    pub output_index: u64,
}

/// One decoded operation.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Content digest of the raw encoded bytes.
    pub digest: Digest,
    /// Decoded payload.
    pub payload: OpPayload,
    /// Ordered input edges.
    pub inputs: Vec<InputEdge>,
    /// Raw encoded bytes, kept verbatim for resubmission.
    raw: Vec<u8>,
}

impl GraphNode {
    /// Returns the raw encoded bytes this node was decoded from.
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// A decoded build graph: ordered nodes plus the digest-keyed metadata table.
///
/// Node order is the envelope order, which is a valid topological order.
/// `metadata` holds an entry for every node, defaulted when the envelope
/// carried none.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildGraph {
    /// Nodes in envelope (topological) order.
    pub nodes: Vec<GraphNode>,
    /// Per-node metadata, keyed by content digest.
    pub metadata: BTreeMap<Digest, wire::NodeMetadata>,
}

impl BuildGraph {
    /// Returns `true` when the graph contains no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of operations in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Marks every node for re-execution, bypassing the engine's cache.
    ///
    /// Pure metadata rewrite: node identity (digests, raw bytes) is
    /// untouched, and applying it twice is the same as applying it once.
    pub fn bypass_cache(&mut self) {
        for node in &self.nodes {
            self.metadata
                .entry(node.digest.clone())
                .or_default()
                .ignore_cache = true;
        }
    }

    /// Re-assembles the wire envelope for submission.
    ///
    /// Operation bytes are emitted verbatim from [`GraphNode::raw_bytes`];
    /// the metadata table reflects any rewrites applied since decoding.
    #[must_use]
    pub fn to_envelope(&self) -> wire::GraphEnvelope {
        wire::GraphEnvelope {
            ops: self.nodes.iter().map(|node| node.raw.clone()).collect(),
            metadata: self
                .metadata
                .iter()
                .map(|(digest, meta)| (digest.to_string(), meta.clone()))
                .collect(),
        }
    }
}

/// Decodes a serialized build graph from its envelope bytes.
///
/// Every inner operation is digested over its raw bytes before being decoded;
/// metadata is looked up by that digest with a default fallback, so entries
/// for digests not present in the graph are dropped and nodes without entries
/// get cache-enabled defaults.
pub fn decode_graph(data: &[u8]) -> DecodeResult<BuildGraph> {
    let envelope = wire::GraphEnvelope::decode(data)?;

    let mut nodes = Vec::with_capacity(envelope.ops.len());
    let mut metadata = BTreeMap::new();
    for (index, raw) in envelope.ops.into_iter().enumerate() {
        let digest = Digest::from_bytes(&raw);
        let op = wire::OpMessage::decode(raw.as_slice())
            .map_err(|source| DecodeError::Operation { index, source })?;

        let inputs = op
            .inputs
            .into_iter()
            .map(|input| {
                Ok(InputEdge {
                    digest: input
                        .digest
                        .parse()
                        .map_err(|source| DecodeError::InputDigest { index, source })?,
                    output_index: input.index,
                })
            })
            .collect::<DecodeResult<Vec<_>>>()?;

        let meta = envelope
            .metadata
            .get(digest.as_str())
            .cloned()
            .unwrap_or_default();
        metadata.insert(digest.clone(), meta);

        nodes.push(GraphNode {
            digest,
            payload: OpPayload::from_wire(op.payload),
            inputs,
            raw,
        });
    }

    debug!(nodes = nodes.len(), "decoded build graph");
    Ok(BuildGraph { nodes, metadata })
}

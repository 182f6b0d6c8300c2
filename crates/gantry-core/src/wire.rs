//! Wire format for serialized build graphs.
//!
//! A graph travels as a [`GraphEnvelope`]: the raw encoded bytes of every
//! operation in dependency order, plus a metadata side-table keyed by the
//! rendered content digest of those bytes. Operations reference their inputs
//! by digest, never by position, so the envelope can be re-encoded without
//! disturbing identity as long as the inner byte strings are left untouched.
//!
//! The message shapes mirror the engine's protobuf schema; maps are declared
//! as `BTreeMap` so encoding and iteration order are deterministic.

use std::collections::BTreeMap;

use serde::Serialize;

/// Serialized build graph: raw operation bytes plus the metadata side-table.
///
/// `ops` is ordered so that every operation appears after all of its inputs;
/// decoding in order yields a valid topological order. `metadata` is keyed by
/// the rendered `sha256:<hex>` digest of the raw bytes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GraphEnvelope {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub ops: Vec<Vec<u8>>,
    #[prost(btree_map = "string, message", tag = "2")]
    pub metadata: BTreeMap<String, NodeMetadata>,
}

/// A single operation as encoded inside [`GraphEnvelope::ops`].
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct OpMessage {
    /// Ordered input edges; position is the operand index.
    #[prost(message, repeated, tag = "1")]
    pub inputs: Vec<InputRef>,
    /// Kind-specific payload. Absent for operations newer than this schema.
    #[prost(oneof = "op_message::Payload", tags = "2, 3, 4, 5, 6, 7")]
    pub payload: Option<op_message::Payload>,
}

/// Nested types for [`OpMessage`].
pub mod op_message {
    use serde::Serialize;

    /// Kind-specific operation payload.
    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        Source(super::SourceOp),
        #[prost(message, tag = "3")]
        Exec(super::ExecOp),
        #[prost(message, tag = "4")]
        Build(super::BuildOp),
        #[prost(message, tag = "5")]
        Merge(super::MergeOp),
        #[prost(message, tag = "6")]
        Diff(super::DiffOp),
        #[prost(message, tag = "7")]
        File(super::FileOp),
    }
}

/// Edge to a producing operation, by content digest.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct InputRef {
    /// Rendered digest of the producing operation.
    #[prost(string, tag = "1")]
    pub digest: String,
    /// Which output of the producer this edge consumes.
    #[prost(uint64, tag = "2")]
    pub index: u64,
}

/// Fetch from an external identifier (image, git ref, local context, ...).
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct SourceOp {
    #[prost(string, tag = "1")]
    pub identifier: String,
    #[prost(btree_map = "string, string", tag = "2")]
    pub attrs: BTreeMap<String, String>,
}

/// Run a command over mounted inputs.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ExecOp {
    #[prost(message, optional, tag = "1")]
    pub meta: Option<ExecMeta>,
    #[prost(message, repeated, tag = "2")]
    pub mounts: Vec<Mount>,
}

/// Process description for an exec operation.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ExecMeta {
    #[prost(string, repeated, tag = "1")]
    pub args: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub env: Vec<String>,
    #[prost(string, tag = "3")]
    pub cwd: String,
}

/// Filesystem mount inside an exec operation.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Mount {
    /// Operand index of the mounted input, or -1 for a fresh filesystem.
    #[prost(int64, tag = "1")]
    pub input: i64,
    /// Mount point inside the execution environment.
    #[prost(string, tag = "2")]
    pub dest: String,
    #[prost(bool, tag = "3")]
    pub readonly: bool,
}

/// Invoke a nested build.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct BuildOp {
    #[prost(btree_map = "string, string", tag = "1")]
    pub attrs: BTreeMap<String, String>,
}

/// Merge several inputs into one filesystem.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct MergeOp {
    /// Operand indexes of the merged inputs, in layering order.
    #[prost(int64, repeated, tag = "1")]
    pub inputs: Vec<i64>,
}

/// Compute the difference between two inputs.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct DiffOp {
    #[prost(int64, tag = "1")]
    pub lower: i64,
    #[prost(int64, tag = "2")]
    pub upper: i64,
}

/// Apply a sequence of file actions to an input.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct FileOp {
    #[prost(message, repeated, tag = "1")]
    pub actions: Vec<FileAction>,
}

/// One step of a file operation.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct FileAction {
    #[prost(oneof = "file_action::Action", tags = "1, 2, 3, 4")]
    pub action: Option<file_action::Action>,
}

/// Nested types for [`FileAction`].
pub mod file_action {
    use serde::Serialize;

    /// The concrete action kind.
    #[derive(Clone, PartialEq, ::prost::Oneof, Serialize)]
    pub enum Action {
        #[prost(message, tag = "1")]
        Copy(super::CopyAction),
        #[prost(message, tag = "2")]
        Mkfile(super::MkfileAction),
        #[prost(message, tag = "3")]
        Mkdir(super::MkdirAction),
        #[prost(message, tag = "4")]
        Rm(super::RmAction),
    }
}

/// Copy a path between inputs.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct CopyAction {
    #[prost(string, tag = "1")]
    pub src: String,
    #[prost(string, tag = "2")]
    pub dest: String,
}

/// Create a file with inline contents.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct MkfileAction {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// Create a directory.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct MkdirAction {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(bool, tag = "2")]
    pub make_parents: bool,
}

/// Remove a path.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct RmAction {
    #[prost(string, tag = "1")]
    pub path: String,
}

/// Per-node metadata, stored in the envelope side-table.
///
/// Absence of an entry is equivalent to the default: caching enabled, no
/// description, no progress group.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct NodeMetadata {
    /// When set, the engine must re-execute this node even on a cache hit.
    #[prost(bool, tag = "1")]
    pub ignore_cache: bool,
    /// Free-form description attributes attached by the graph producer.
    #[prost(btree_map = "string, string", tag = "2")]
    pub description: BTreeMap<String, String>,
    /// Display grouping for progress rendering.
    #[prost(message, optional, tag = "3")]
    pub progress_group: Option<ProgressGroup>,
}

/// Display grouping attached to node metadata.
#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ProgressGroup {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    /// Weak vertices are hidden from interactive progress display.
    #[prost(bool, tag = "3")]
    pub weak: bool,
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let mut envelope = GraphEnvelope::default();
        envelope.ops.push(vec![1, 2, 3]);
        envelope.metadata.insert(
            "sha256:aa".to_string(),
            NodeMetadata {
                ignore_cache: true,
                ..Default::default()
            },
        );

        let bytes = envelope.encode_to_vec();
        let decoded = GraphEnvelope::decode(bytes.as_slice()).expect("decode failed");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_op_payload_roundtrip() {
        let op = OpMessage {
            inputs: vec![InputRef {
                digest: "sha256:bb".to_string(),
                index: 0,
            }],
            payload: Some(op_message::Payload::Exec(ExecOp {
                meta: Some(ExecMeta {
                    args: vec!["/bin/sh".to_string(), "-c".to_string(), "true".to_string()],
                    env: vec!["PATH=/usr/bin".to_string()],
                    cwd: "/".to_string(),
                }),
                mounts: vec![Mount {
                    input: 0,
                    dest: "/".to_string(),
                    readonly: false,
                }],
            })),
        };

        let bytes = op.encode_to_vec();
        let decoded = OpMessage::decode(bytes.as_slice()).expect("decode failed");
        assert_eq!(decoded, op);
    }

    #[test]
    fn test_metadata_encoding_is_deterministic() {
        let mut a = GraphEnvelope::default();
        let mut b = GraphEnvelope::default();
        for key in ["sha256:01", "sha256:02", "sha256:03"] {
            a.metadata.insert(key.to_string(), NodeMetadata::default());
        }
        for key in ["sha256:03", "sha256:01", "sha256:02"] {
            b.metadata.insert(key.to_string(), NodeMetadata::default());
        }
        assert_eq!(a.encode_to_vec(), b.encode_to_vec());
    }

    #[test]
    fn test_unknown_payload_field_decodes_as_none() {
        // Field 15 (length-delimited) is outside the declared oneof range.
        let raw = vec![0x7a, 0x02, 0x08, 0x01];
        let decoded = OpMessage::decode(raw.as_slice()).expect("decode failed");
        assert!(decoded.payload.is_none());
        assert!(decoded.inputs.is_empty());
    }
}

//! Engine RPC messages and frame tagging.
//!
//! After the handshake, every frame is `[tag: u8][payload: protobuf]`. The
//! client sends exactly one [`SolveRequest`]; the engine answers with a
//! stream of [`StatusFrame`]s terminated by either [`SolveDone`] or
//! [`SolveFailure`].
//!
//! The protobuf structs here are the submission-side twins of the session
//! types in `gantry_core::session`: a [`crate::build`] caller works with the
//! session types and the conversions in this module produce the wire shapes.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::DateTime;
use prost::Message;

use gantry_core::digest::Digest;
use gantry_core::progress::{ProgressHint, StatusUpdate, Vertex};
use gantry_core::session::{Attachment, CacheOptionsEntry, ExportSpec};
use gantry_core::wire::{GraphEnvelope, ProgressGroup};

use crate::error::{ProtocolError, ProtocolResult};

// ============================================================================
// Frontend options
// ============================================================================

/// Frontend option selecting sub-request mode.
///
/// When present, the engine routes the solve to the named frontend
/// sub-request instead of running a full build, and the answer comes back in
/// the result metadata rather than through exporters.
pub const FRONTEND_OPT_REQUEST_ID: &str = "requestid";

/// Frontend option carrying the advertised frontend capability list.
pub const FRONTEND_OPT_CAPS: &str = "frontend.caps";

/// Capability advertising sub-request support to the frontend.
pub const CAP_SUBREQUESTS: &str = "engine.subrequests";

/// Advertises sub-request support when a sub-request is being made.
///
/// Only fills in [`FRONTEND_OPT_CAPS`] when the caller has not set it;
/// explicit capability lists are never overwritten.
pub fn inject_subrequest_capability(frontend_opts: &mut BTreeMap<String, String>) {
    if frontend_opts.contains_key(FRONTEND_OPT_REQUEST_ID)
        && !frontend_opts.contains_key(FRONTEND_OPT_CAPS)
    {
        frontend_opts.insert(FRONTEND_OPT_CAPS.to_string(), CAP_SUBREQUESTS.to_string());
    }
}

// ============================================================================
// Frame tags
// ============================================================================

/// Frame tag bytes, prefixed to each post-handshake frame.
///
/// Tag 0 indicates an engine-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameTag {
    /// Engine rejected or aborted the solve.
    Failure = 0,
    /// Client submission.
    Solve = 1,
    /// Engine progress update.
    Status = 2,
    /// Engine completed the solve.
    Done = 3,
}

impl FrameTag {
    /// Attempts to parse a frame tag from a tag byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Failure),
            1 => Some(Self::Solve),
            2 => Some(Self::Status),
            3 => Some(Self::Done),
            _ => None,
        }
    }

    /// Returns the tag byte for this frame type.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

/// Encodes a message into a tagged frame.
///
/// The format is: `[tag: u8][payload: protobuf]`.
#[must_use]
pub fn encode_frame(tag: FrameTag, message: &impl Message) -> Bytes {
    let mut buf = Vec::with_capacity(1 + message.encoded_len());
    buf.push(tag.tag());
    message.encode(&mut buf).expect("encode cannot fail");
    Bytes::from(buf)
}

// ============================================================================
// Submission messages
// ============================================================================

/// The solve submission.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SolveRequest {
    /// Client-chosen reference naming this solve in logs and exports.
    #[prost(string, tag = "1")]
    pub reference: String,
    /// The build graph, in its envelope encoding.
    #[prost(message, optional, tag = "2")]
    pub definition: Option<GraphEnvelope>,
    /// Options forwarded to the frontend.
    #[prost(btree_map = "string, string", tag = "3")]
    pub frontend_opts: BTreeMap<String, String>,
    /// Cache locations to read from.
    #[prost(message, repeated, tag = "4")]
    pub cache_imports: Vec<CacheOptionsMsg>,
    /// Cache locations to write back to.
    #[prost(message, repeated, tag = "5")]
    pub cache_exports: Vec<CacheOptionsMsg>,
    /// Result exports.
    #[prost(message, repeated, tag = "6")]
    pub exports: Vec<ExportMsg>,
    /// Granted entitlements, by wire name.
    #[prost(string, repeated, tag = "7")]
    pub entitlements: Vec<String>,
    /// Local directory names referenced by the graph, mapped to paths.
    #[prost(btree_map = "string, string", tag = "8")]
    pub local_paths: BTreeMap<String, String>,
    /// Session capabilities accompanying the solve.
    #[prost(message, repeated, tag = "9")]
    pub attachments: Vec<AttachmentMsg>,
}

/// One cache import or export location.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CacheOptionsMsg {
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(btree_map = "string, string", tag = "2")]
    pub attrs: BTreeMap<String, String>,
}

/// One result export.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExportMsg {
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(btree_map = "string, string", tag = "2")]
    pub attrs: BTreeMap<String, String>,
    /// Filesystem destination, empty for registry exports.
    #[prost(string, tag = "3")]
    pub destination: String,
}

/// One session capability attached to the submission.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttachmentMsg {
    #[prost(oneof = "attachment_msg::Kind", tags = "1, 2, 3")]
    pub kind: Option<attachment_msg::Kind>,
}

/// Nested message and enum types in `AttachmentMsg`.
pub mod attachment_msg {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        SshAgents(super::SshAgentsMsg),
        #[prost(message, tag = "2")]
        Secrets(super::SecretsMsg),
        #[prost(message, tag = "3")]
        RegistryAuth(super::RegistryAuthMsg),
    }
}

/// Forwarded SSH agents.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SshAgentsMsg {
    #[prost(message, repeated, tag = "1")]
    pub agents: Vec<SshAgentMsg>,
}

/// One forwarded SSH agent.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SshAgentMsg {
    #[prost(string, tag = "1")]
    pub id: String,
    /// Agent socket paths or key files.
    #[prost(string, repeated, tag = "2")]
    pub paths: Vec<String>,
}

/// Forwarded secrets.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecretsMsg {
    #[prost(message, repeated, tag = "1")]
    pub secrets: Vec<SecretMsg>,
}

/// One forwarded secret source.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecretMsg {
    #[prost(string, tag = "1")]
    pub id: String,
    /// File the secret is read from, empty when env-sourced.
    #[prost(string, tag = "2")]
    pub file_path: String,
    /// Environment variable the secret is read from, empty when file-sourced.
    #[prost(string, tag = "3")]
    pub env: String,
}

/// Forwarded registry credentials.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegistryAuthMsg {
    #[prost(message, repeated, tag = "1")]
    pub credentials: Vec<RegistryCredentialMsg>,
}

/// One registry credential.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegistryCredentialMsg {
    #[prost(string, tag = "1")]
    pub server_address: String,
    #[prost(string, tag = "2")]
    pub username: String,
    #[prost(string, tag = "3")]
    pub password: String,
    #[prost(string, tag = "4")]
    pub auth: String,
}

// ============================================================================
// Engine answer messages
// ============================================================================

/// One progress update from the engine.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusFrame {
    #[prost(message, repeated, tag = "1")]
    pub vertexes: Vec<VertexFrame>,
}

/// Wire form of one vertex state transition.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VertexFrame {
    /// Content digest of the reported node, in `sha256:<hex>` form.
    #[prost(string, tag = "1")]
    pub digest: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int64, optional, tag = "3")]
    pub started_unix_nanos: Option<i64>,
    #[prost(int64, optional, tag = "4")]
    pub completed_unix_nanos: Option<i64>,
    #[prost(bool, tag = "5")]
    pub cached: bool,
    #[prost(string, tag = "6")]
    pub error: String,
    #[prost(message, optional, tag = "7")]
    pub progress_group: Option<ProgressGroup>,
}

/// Successful completion of a solve.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SolveDone {
    /// Metadata returned by the frontend, including sub-request answers.
    #[prost(btree_map = "string, bytes", tag = "1")]
    pub result_metadata: BTreeMap<String, Vec<u8>>,
    /// Per-exporter response entries.
    #[prost(btree_map = "string, string", tag = "2")]
    pub exporter_response: BTreeMap<String, String>,
}

/// Engine-reported solve failure.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SolveFailure {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// A decoded engine-to-client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineFrame {
    /// Engine rejected or aborted the solve.
    Failure(SolveFailure),
    /// Engine progress update.
    Status(StatusFrame),
    /// Engine completed the solve.
    Done(SolveDone),
}

impl EngineFrame {
    /// Decodes a tagged frame received from the engine.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidFrame`] for empty frames, unknown
    /// tags, and tags the engine must not send, and
    /// [`ProtocolError::Serialization`] when the payload does not decode.
    pub fn decode(frame: &[u8]) -> ProtocolResult<Self> {
        let Some((&tag_byte, payload)) = frame.split_first() else {
            return Err(ProtocolError::invalid_frame("empty frame"));
        };
        let Some(tag) = FrameTag::from_tag(tag_byte) else {
            return Err(ProtocolError::invalid_frame(format!(
                "unknown frame tag {tag_byte}"
            )));
        };

        let decode_err =
            |err: prost::DecodeError| ProtocolError::serialization(format!("bad frame: {err}"));
        match tag {
            FrameTag::Failure => Ok(Self::Failure(
                SolveFailure::decode(payload).map_err(decode_err)?,
            )),
            FrameTag::Status => Ok(Self::Status(
                StatusFrame::decode(payload).map_err(decode_err)?,
            )),
            FrameTag::Done => Ok(Self::Done(SolveDone::decode(payload).map_err(decode_err)?)),
            FrameTag::Solve => Err(ProtocolError::invalid_frame(
                "solve frame received from engine",
            )),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<&CacheOptionsEntry> for CacheOptionsMsg {
    fn from(entry: &CacheOptionsEntry) -> Self {
        Self {
            kind: entry.kind.clone(),
            attrs: entry.attrs.clone(),
        }
    }
}

impl From<&ExportSpec> for ExportMsg {
    fn from(spec: &ExportSpec) -> Self {
        Self {
            kind: spec.kind.as_str().to_string(),
            attrs: spec.attrs.clone(),
            destination: spec
                .destination
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default(),
        }
    }
}

impl From<&Attachment> for AttachmentMsg {
    fn from(attachment: &Attachment) -> Self {
        let kind = match attachment {
            Attachment::SshAgents(agents) => attachment_msg::Kind::SshAgents(SshAgentsMsg {
                agents: agents
                    .iter()
                    .map(|agent| SshAgentMsg {
                        id: agent.id.clone(),
                        paths: agent.paths.clone(),
                    })
                    .collect(),
            }),
            Attachment::Secrets(secrets) => attachment_msg::Kind::Secrets(SecretsMsg {
                secrets: secrets
                    .iter()
                    .map(|secret| SecretMsg {
                        id: secret.id.clone(),
                        file_path: secret
                            .file_path
                            .as_ref()
                            .map(|path| path.display().to_string())
                            .unwrap_or_default(),
                        env: secret.env.clone().unwrap_or_default(),
                    })
                    .collect(),
            }),
            Attachment::RegistryAuth(credentials) => {
                attachment_msg::Kind::RegistryAuth(RegistryAuthMsg {
                    credentials: credentials
                        .iter()
                        .map(|credential| RegistryCredentialMsg {
                            server_address: credential.server_address.clone(),
                            username: credential.username.clone(),
                            password: credential.password.clone(),
                            auth: credential.auth.clone(),
                        })
                        .collect(),
                })
            }
        };
        Self { kind: Some(kind) }
    }
}

impl StatusFrame {
    /// Renders a domain status update into its wire form.
    ///
    /// Used by engines and test doubles answering a solve.
    #[must_use]
    pub fn from_update(update: &StatusUpdate) -> Self {
        Self {
            vertexes: update
                .vertexes
                .iter()
                .map(|vertex| VertexFrame {
                    digest: vertex.digest.to_string(),
                    name: vertex.name.clone(),
                    started_unix_nanos: vertex.started.and_then(|t| t.timestamp_nanos_opt()),
                    completed_unix_nanos: vertex.completed.and_then(|t| t.timestamp_nanos_opt()),
                    cached: vertex.cached,
                    error: vertex.error.clone(),
                    progress_group: vertex.progress_group.as_ref().map(|hint| ProgressGroup {
                        id: hint.id.clone(),
                        name: hint.name.clone(),
                        weak: hint.weak,
                    }),
                })
                .collect(),
        }
    }
}

impl TryFrom<StatusFrame> for StatusUpdate {
    type Error = ProtocolError;

    fn try_from(frame: StatusFrame) -> ProtocolResult<Self> {
        let vertexes = frame
            .vertexes
            .into_iter()
            .map(VertexFrame::into_vertex)
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(Self { vertexes })
    }
}

impl VertexFrame {
    fn into_vertex(self) -> ProtocolResult<Vertex> {
        let digest = self.digest.parse::<Digest>().map_err(|err| {
            ProtocolError::serialization(format!("invalid vertex digest: {err}"))
        })?;
        Ok(Vertex {
            digest,
            name: self.name,
            started: self.started_unix_nanos.map(DateTime::from_timestamp_nanos),
            completed: self
                .completed_unix_nanos
                .map(DateTime::from_timestamp_nanos),
            cached: self.cached,
            error: self.error,
            progress_group: self.progress_group.map(|group| ProgressHint {
                id: group.id,
                name: group.name,
                weak: group.weak,
            }),
        })
    }
}

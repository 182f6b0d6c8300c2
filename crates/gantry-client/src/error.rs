//! Error types for the engine protocol and build orchestration.
//!
//! This module provides structured error types for every failure mode a
//! submission can hit, so callers can branch on what went wrong:
//!
//! - [`ProtocolError`]: framing, handshake, and transport failures
//! - [`ConnectError`]: connection establishment (fatal for the attempt,
//!   never retried by this layer)
//! - [`SolveError`]: failures after the build was accepted, including
//!   engine-reported diagnostics
//! - [`EncodingError`]: trace serialization failures
//! - [`SinkError`]: progress display and result output failures
//! - [`BuildError`]: the orchestration-level aggregate

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Maximum frame size in bytes (16 MiB).
///
/// Frames larger than this are rejected from the length prefix alone,
/// before any allocation.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum handshake frame size in bytes (64 KiB).
///
/// Handshake messages (Hello/HelloAck/HelloNack) have a stricter limit than
/// general protocol frames: nothing a well-behaved peer sends before version
/// negotiation comes close to this size.
pub const MAX_HANDSHAKE_FRAME_SIZE: usize = 64 * 1024;

/// Protocol version spoken by this client.
///
/// Version negotiation occurs during handshake; an engine that cannot serve
/// this version answers with a rejection.
pub const PROTOCOL_VERSION: u32 = 1;

/// Protocol errors for the engine wire protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum allowed size.
    ///
    /// Detected from the length prefix, before the frame body is read.
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Size announced by the length prefix.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },

    /// Frame data is invalid or was not the expected message.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the framing error.
        reason: String,
    },

    /// Protocol version mismatch during handshake.
    #[error("version mismatch: client speaks {client_version}, engine speaks {server_version}")]
    VersionMismatch {
        /// Version requested by this client.
        client_version: u32,
        /// Version the engine answered with.
        server_version: u32,
    },

    /// Handshake sequence did not complete.
    #[error("handshake failed: {reason}")]
    HandshakeFailed {
        /// Description of the handshake failure.
        reason: String,
    },

    /// The engine closed the connection mid-operation.
    #[error("connection closed by engine")]
    ConnectionClosed,

    /// Underlying I/O error from the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A message payload could not be serialized or deserialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl ProtocolError {
    /// Create a frame too large error.
    #[must_use]
    pub const fn frame_too_large(size: usize, max: usize) -> Self {
        Self::FrameTooLarge { size, max }
    }

    /// Create an invalid frame error.
    #[must_use]
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Create a version mismatch error against this client's version.
    #[must_use]
    pub const fn version_mismatch(server_version: u32) -> Self {
        Self::VersionMismatch {
            client_version: PROTOCOL_VERSION,
            server_version,
        }
    }

    /// Create a handshake failed error.
    #[must_use]
    pub fn handshake_failed(reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates a protocol violation.
    ///
    /// Protocol violations mean the peer is broken or hostile; the
    /// connection is not worth keeping.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. }
                | Self::InvalidFrame { .. }
                | Self::VersionMismatch { .. }
                | Self::HandshakeFailed { .. }
        )
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors establishing the engine connection.
///
/// Connection failures are fatal for the submission and are returned to the
/// caller; this layer never retries silently.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The unix socket path does not exist.
    #[error("engine socket {path} does not exist (is the engine running?)")]
    SocketMissing {
        /// The configured socket path.
        path: PathBuf,
    },

    /// Dialing the endpoint failed.
    #[error("connection to {address} failed: {source}")]
    Dial {
        /// Rendered endpoint address.
        address: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The connection deadline elapsed before establishment completed.
    #[error("connection to {address} timed out after {timeout_ms} ms")]
    Timeout {
        /// Rendered endpoint address.
        address: String,
        /// Configured deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The endpoint requires TLS but no material was configured.
    #[error("endpoint {address} requires TLS but no certificate material was configured")]
    MissingTlsMaterial {
        /// Rendered endpoint address.
        address: String,
    },

    /// TLS configuration or handshake failed.
    #[error("TLS failure for {address}: {reason}")]
    Tls {
        /// Rendered endpoint address.
        address: String,
        /// Description of the TLS failure.
        reason: String,
    },

    /// The protocol handshake failed after the transport came up.
    #[error(transparent)]
    Handshake(#[from] ProtocolError),
}

impl ConnectError {
    /// Create a timeout error from a deadline.
    #[must_use]
    pub fn timeout(address: impl Into<String>, deadline: Duration) -> Self {
        Self::Timeout {
            address: address.into(),
            timeout_ms: deadline.as_millis() as u64,
        }
    }

    /// Returns `true` when retrying the connection later may succeed.
    ///
    /// This layer never retries; the classification is for callers.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketMissing { .. } | Self::Dial { .. } | Self::Timeout { .. } => true,
            Self::MissingTlsMaterial { .. } | Self::Tls { .. } => false,
            Self::Handshake(protocol) => !protocol.is_protocol_violation(),
        }
    }
}

/// Failures after the engine accepted the submission.
#[derive(Debug, Error)]
pub enum SolveError {
    /// The engine reported the build failed.
    ///
    /// Carries the engine's diagnostic text verbatim.
    #[error("build failed: {message}")]
    Engine {
        /// Engine-provided diagnostic.
        message: String,
    },

    /// The status stream violated the protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SolveError {
    /// Returns `true` when this is an engine-reported build failure rather
    /// than a transport problem.
    #[must_use]
    pub const fn is_engine_failure(&self) -> bool {
        matches!(self, Self::Engine { .. })
    }
}

/// Trace serialization failures.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// A status event could not be encoded as JSON.
    #[error("trace encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The trace destination failed.
    #[error("trace write failed: {0}")]
    Io(#[from] io::Error),
}

/// Progress display and result output failures.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing to the output sink failed (for example a closed pipe).
    #[error("output sink failed: {0}")]
    Io(#[from] io::Error),

    /// Result metadata could not be rendered as JSON.
    #[error("metadata rendering failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Orchestration-level error for a build submission.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The graph contains no operations; nothing was submitted.
    #[error("refusing to submit an empty build graph")]
    EmptyGraph,

    /// Connection establishment failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The build itself failed.
    #[error(transparent)]
    Solve(#[from] SolveError),

    /// Trace recording failed.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Progress display or result output failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Result type for build orchestration.
pub type BuildResult<T> = Result<T, BuildError>;

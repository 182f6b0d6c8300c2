//! Protocol handshake for version negotiation with the engine.
//!
//! The first frame in each direction is a JSON handshake message; everything
//! after the handshake is tag-prefixed protobuf. Sequence:
//!
//! ```text
//! Client                                      Engine
//!   |                                            |
//!   |  -- Hello { version, client_info } ----->  |
//!   |                                            |
//!   |  <-- HelloAck { version, server_info } --  |
//!   |      OR                                    |
//!   |  <-- HelloNack { error_code, message } --  |
//!   |                                            |
//! ```
//!
//! The handshake must complete before a solve is submitted; any other first
//! frame terminates the connection.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;
use crate::error::{
    ProtocolError, ProtocolResult, MAX_HANDSHAKE_FRAME_SIZE, PROTOCOL_VERSION,
};

/// Hello message sent by the client to initiate the handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Hello {
    /// Protocol version requested by the client.
    pub protocol_version: u32,

    /// Client identifier for logging and diagnostics, e.g. "gantry/0.1.0".
    pub client_info: String,

    /// Optional client capabilities for future extension.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl Hello {
    /// Create a Hello for the current protocol version.
    #[must_use]
    pub fn new(client_info: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            client_info: client_info.into(),
            capabilities: Vec::new(),
        }
    }

    /// Create a Hello with a specific protocol version (for testing).
    #[must_use]
    pub fn with_version(protocol_version: u32, client_info: impl Into<String>) -> Self {
        Self {
            protocol_version,
            client_info: client_info.into(),
            capabilities: Vec::new(),
        }
    }
}

/// Successful handshake acknowledgment from the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HelloAck {
    /// Protocol version the engine will speak.
    pub protocol_version: u32,

    /// Engine identifier for logging and diagnostics.
    pub server_info: String,

    /// Engine capabilities for feature negotiation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl HelloAck {
    /// Create a `HelloAck` for the current protocol version.
    #[must_use]
    pub fn new(server_info: impl Into<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            server_info: server_info.into(),
            capabilities: Vec::new(),
        }
    }
}

/// Handshake rejection from the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HelloNack {
    /// Machine-readable rejection code.
    pub error_code: HandshakeErrorCode,

    /// Human-readable rejection message.
    pub message: String,

    /// Engine's protocol version, for version mismatch diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u32>,
}

impl HelloNack {
    /// Create a version mismatch rejection.
    #[must_use]
    pub fn version_mismatch(client_version: u32) -> Self {
        Self {
            error_code: HandshakeErrorCode::VersionMismatch,
            message: format!(
                "protocol version {client_version} not supported, engine supports {PROTOCOL_VERSION}"
            ),
            server_version: Some(PROTOCOL_VERSION),
        }
    }

    /// Create a generic rejection.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            error_code: HandshakeErrorCode::Rejected,
            message: message.into(),
            server_version: None,
        }
    }
}

/// Error codes for handshake rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeErrorCode {
    /// Protocol version not supported.
    VersionMismatch,
    /// Handshake rejected for other reasons.
    Rejected,
    /// Engine is shutting down.
    ShuttingDown,
}

/// Handshake message envelope, tagged for serialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    Hello(Hello),
    HelloAck(HelloAck),
    HelloNack(HelloNack),
}

/// Parse a handshake message from raw frame bytes with size validation.
///
/// The handshake cap is enforced again here so a caller holding a widened
/// codec still cannot feed an oversized buffer into the JSON parser.
pub fn parse_handshake_message(frame: &[u8]) -> ProtocolResult<HandshakeMessage> {
    if frame.len() > MAX_HANDSHAKE_FRAME_SIZE {
        return Err(ProtocolError::frame_too_large(
            frame.len(),
            MAX_HANDSHAKE_FRAME_SIZE,
        ));
    }
    serde_json::from_slice(frame)
        .map_err(|err| ProtocolError::serialization(format!("invalid handshake message: {err}")))
}

/// Runs the client side of the handshake over a framed transport.
///
/// Sends `hello`, awaits the engine's answer, and verifies the negotiated
/// version. Returns the acknowledgment on success.
pub async fn perform_handshake<S>(
    framed: &mut Framed<S, FrameCodec>,
    hello: Hello,
) -> ProtocolResult<HelloAck>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client_version = hello.protocol_version;
    let payload = serde_json::to_vec(&HandshakeMessage::Hello(hello))
        .map_err(|err| ProtocolError::serialization(err.to_string()))?;
    framed.send(Bytes::from(payload)).await?;

    let frame = framed
        .next()
        .await
        .ok_or(ProtocolError::ConnectionClosed)??;

    match parse_handshake_message(&frame)? {
        HandshakeMessage::HelloAck(ack) => {
            if ack.protocol_version != client_version {
                return Err(ProtocolError::VersionMismatch {
                    client_version,
                    server_version: ack.protocol_version,
                });
            }
            Ok(ack)
        }
        HandshakeMessage::HelloNack(nack) => match (nack.error_code, nack.server_version) {
            (HandshakeErrorCode::VersionMismatch, Some(server_version)) => {
                Err(ProtocolError::VersionMismatch {
                    client_version,
                    server_version,
                })
            }
            _ => Err(ProtocolError::handshake_failed(nack.message)),
        },
        HandshakeMessage::Hello(_) => {
            Err(ProtocolError::invalid_frame("unexpected hello from engine"))
        }
    }
}

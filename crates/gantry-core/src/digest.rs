//! Content digests for build graph operations.
//!
//! Every operation node is identified by the SHA-256 hash of its raw encoded
//! bytes, rendered as `sha256:<64 hex chars>`. Digests are stable across
//! processes and across positions in the graph: byte-identical operations
//! always produce the same digest, so the metadata side-table and the edge
//! references can be keyed by content instead of position.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Algorithm prefix used in the rendered form.
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Length of the hex-encoded SHA-256 portion.
const HEX_LEN: usize = 64;

/// Errors produced when parsing a rendered digest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    /// The rendered form does not start with the `sha256:` prefix.
    #[error("unsupported digest algorithm in {0:?}")]
    UnsupportedAlgorithm(String),

    /// The hex portion has the wrong length or contains non-hex characters.
    #[error("malformed digest hex in {0:?}")]
    MalformedHex(String),
}

/// Content digest of an operation's raw encoded bytes.
///
/// Rendered and serialized as `sha256:<hex>`. Ordering is lexicographic over
/// the rendered form, which keeps digest-keyed maps deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Computes the digest of a raw byte buffer.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{DIGEST_ALGORITHM}:{}", hex::encode(hash)))
    }

    /// Returns the rendered `sha256:<hex>` form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first `len` characters of the hex portion.
    ///
    /// Used for compact progress rendering. Clamped to the full hex length.
    #[must_use]
    pub fn short(&self, len: usize) -> &str {
        let hex = &self.0[DIGEST_ALGORITHM.len() + 1..];
        &hex[..len.min(hex.len())]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix(DIGEST_ALGORITHM)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| DigestError::UnsupportedAlgorithm(s.to_string()))?;
        if hex.len() != HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DigestError::MalformedHex(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

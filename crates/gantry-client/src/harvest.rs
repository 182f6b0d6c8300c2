//! Result harvesting: metadata files and sub-request output.
//!
//! A finished solve hands back two maps: frontend result metadata (where
//! sub-request answers live) and the exporter response. This module renders
//! both for the caller: the exporter response becomes the build metadata
//! file, and `result.`-prefixed metadata entries become terminal output.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::debug;

use crate::error::SinkError;

/// Default metadata file name, relative to the working directory.
pub const DEFAULT_METADATA_FILENAME: &str = "localmeta.json";

/// Metadata key holding a sub-request's primary answer.
pub const RESULT_KEY_PRIMARY: &str = "result.txt";

/// Prefix of metadata keys that carry printable sub-request output.
pub const RESULT_KEY_PREFIX: &str = "result.";

/// What a successful solve produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Metadata returned by the frontend, including sub-request answers.
    pub result_metadata: BTreeMap<String, Vec<u8>>,
    /// Per-exporter response entries.
    pub exporter_response: BTreeMap<String, String>,
}

impl From<crate::rpc::SolveDone> for BuildOutcome {
    fn from(done: crate::rpc::SolveDone) -> Self {
        Self {
            result_metadata: done.result_metadata,
            exporter_response: done.exporter_response,
        }
    }
}

/// Decodes one exporter response entry.
///
/// Exporters report structured values as base64-encoded JSON documents.
/// Entries that decode to a non-empty JSON object are stored decoded;
/// everything else stays the original string.
fn harvest_entry(raw: &str) -> Value {
    if let Ok(decoded) = STANDARD.decode(raw) {
        if let Ok(Value::Object(doc)) = serde_json::from_slice::<Value>(&decoded) {
            if !doc.is_empty() {
                return Value::Object(doc);
            }
        }
    }
    Value::String(raw.to_string())
}

/// Renders the exporter response as the metadata document.
#[must_use]
pub fn harvest_exporter_response(response: &BTreeMap<String, String>) -> Value {
    let doc: serde_json::Map<String, Value> = response
        .iter()
        .map(|(key, value)| (key.clone(), harvest_entry(value)))
        .collect();
    Value::Object(doc)
}

/// Writes the harvested metadata document to `path`, pretty-printed.
///
/// The file is created owner-read/write only: exporter responses can carry
/// registry tokens and signed references.
pub fn write_metadata_file(
    path: &Path,
    response: &BTreeMap<String, String>,
) -> Result<(), SinkError> {
    let doc = harvest_exporter_response(response);

    let mut open_opts = OpenOptions::new();
    open_opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        open_opts.mode(0o600);
    }
    let file = open_opts.open(path)?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &doc)?;
    writer.flush()?;
    debug!(path = %path.display(), entries = response.len(), "wrote build metadata");
    Ok(())
}

/// Prints sub-request results from the outcome's metadata.
///
/// The primary entry (`result.txt`) is written verbatim, exactly as the
/// frontend produced it. Other `result.`-prefixed entries are written as a
/// key line followed by the value. Remaining metadata is not printable
/// output and is skipped.
pub fn render_results(outcome: &BuildOutcome, out: &mut impl Write) -> Result<(), SinkError> {
    for (key, value) in &outcome.result_metadata {
        if key == RESULT_KEY_PRIMARY {
            out.write_all(value)?;
        } else if key.starts_with(RESULT_KEY_PREFIX) {
            writeln!(out, "{key}")?;
            out.write_all(value)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

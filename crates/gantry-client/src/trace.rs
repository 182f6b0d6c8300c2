//! Machine-readable trace recording.
//!
//! Writes every status update as one JSON line, with no filtering: vertices
//! the interactive display hides still appear here. The trace is the
//! faithful record of what the engine reported.

use std::io::Write;

use tokio::sync::mpsc;

use gantry_core::progress::StatusUpdate;

use crate::error::EncodingError;

/// Records status updates as newline-delimited JSON until the channel
/// closes.
///
/// # Errors
///
/// Returns [`EncodingError`] when an update cannot be serialized or the
/// destination cannot be written.
pub async fn run_trace<W: Write + Send>(
    mut updates: mpsc::Receiver<StatusUpdate>,
    mut out: W,
) -> Result<(), EncodingError> {
    while let Some(update) = updates.recv().await {
        serde_json::to_writer(&mut out, &update)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

//! Progress fan-out to display and trace consumers.
//!
//! The solve loop produces one stream of status updates; interactive display
//! and trace recording each want their own copy. [`ProgressFanout`] owns the
//! sending half of one channel per consumer and offers every update to every
//! consumer before the solve loop advances, so a slow consumer applies
//! backpressure instead of silently losing updates.
//!
//! Dropping the fanout closes all channels; consumers observe the close and
//! finish. The orchestrator moves the fanout into the solve task so the
//! close happens exactly once, on every exit path.

use tokio::sync::mpsc;

use gantry_core::progress::StatusUpdate;

/// Buffered updates per consumer before `offer` waits.
const SINK_CAPACITY: usize = 256;

/// Fans one status stream out to any number of consumers.
#[derive(Default)]
pub struct ProgressFanout {
    sinks: Vec<mpsc::Sender<StatusUpdate>>,
}

impl ProgressFanout {
    /// Creates a fanout with no consumers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a consumer and returns its receiving end.
    pub fn attach(&mut self) -> mpsc::Receiver<StatusUpdate> {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        self.sinks.push(tx);
        rx
    }

    /// Offers one update to every consumer, in attach order.
    ///
    /// Waits for room in each channel; consumers that have gone away are
    /// skipped.
    pub async fn offer(&self, update: &StatusUpdate) {
        for sink in &self.sinks {
            let _ = sink.send(update.clone()).await;
        }
    }
}

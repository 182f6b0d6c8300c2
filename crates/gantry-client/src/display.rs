//! Interactive progress rendering.
//!
//! Consumes one fanout channel and writes a line per vertex state change to
//! the caller's output. Vertices hidden from interactive display (weak
//! progress groups, the engine's internal auth steps) are filtered here;
//! trace recording sees them regardless because it consumes its own channel.

use std::io::Write;

use tokio::sync::mpsc;

use gantry_core::progress::StatusUpdate;

use crate::error::SinkError;

/// Digest hex prefix length used in progress lines.
const SHORT_DIGEST_LEN: usize = 12;

/// Renders status updates until the channel closes.
///
/// # Errors
///
/// Returns [`SinkError`] when the output cannot be written; rendering stops
/// at the first write failure.
pub async fn run_display<W: Write + Send>(
    mut updates: mpsc::Receiver<StatusUpdate>,
    mut out: W,
) -> Result<(), SinkError> {
    while let Some(update) = updates.recv().await {
        for vertex in &update.vertexes {
            if !vertex.is_displayable() {
                continue;
            }
            let short = vertex.digest.short(SHORT_DIGEST_LEN);
            if vertex.is_failed() {
                writeln!(out, "#{short} ERROR {}: {}", vertex.name, vertex.error)?;
            } else if vertex.cached {
                writeln!(out, "#{short} CACHED {}", vertex.name)?;
            } else if let (Some(started), Some(completed)) = (vertex.started, vertex.completed) {
                let secs = (completed - started).num_milliseconds() as f64 / 1000.0;
                writeln!(out, "#{short} DONE {} ({secs:.1}s)", vertex.name)?;
            } else if vertex.started.is_some() {
                writeln!(out, "#{short} {}", vertex.name)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use gantry_core::digest::Digest;
    use gantry_core::progress::{ProgressHint, Vertex};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn vertex(name: &str) -> Vertex {
        Vertex {
            digest: Digest::from_bytes(name.as_bytes()),
            name: name.to_string(),
            started: None,
            completed: None,
            cached: false,
            error: String::new(),
            progress_group: None,
        }
    }

    fn single(vertex: Vertex) -> StatusUpdate {
        StatusUpdate {
            vertexes: vec![vertex],
        }
    }

    #[tokio::test]
    async fn test_display_renders_vertex_lifecycle() {
        let (tx, rx) = mpsc::channel(16);

        let mut started = vertex("compile");
        started.started = Some(Utc.timestamp_opt(100, 0).single().unwrap());
        tx.send(single(started.clone())).await.unwrap();

        let mut done = started.clone();
        done.completed = Some(Utc.timestamp_opt(101, 500_000_000).single().unwrap());
        tx.send(single(done)).await.unwrap();

        let mut cached = vertex("fetch");
        cached.cached = true;
        tx.send(single(cached)).await.unwrap();

        let mut failed = vertex("link");
        failed.error = "exit status 1".to_string();
        tx.send(single(failed)).await.unwrap();
        drop(tx);

        let out = SharedBuf::default();
        run_display(rx, out.clone()).await.expect("display failed");

        let short = Digest::from_bytes(b"compile").short(SHORT_DIGEST_LEN).to_string();
        let rendered = out.contents();
        let mut lines = rendered.lines();
        assert_eq!(lines.next(), Some(format!("#{short} compile").as_str()));
        assert_eq!(
            lines.next(),
            Some(format!("#{short} DONE compile (1.5s)").as_str())
        );
        let fetch_short = Digest::from_bytes(b"fetch").short(SHORT_DIGEST_LEN).to_string();
        assert_eq!(
            lines.next(),
            Some(format!("#{fetch_short} CACHED fetch").as_str())
        );
        let link_short = Digest::from_bytes(b"link").short(SHORT_DIGEST_LEN).to_string();
        assert_eq!(
            lines.next(),
            Some(format!("#{link_short} ERROR link: exit status 1").as_str())
        );
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn test_display_hides_weak_groups_and_auth_steps() {
        let (tx, rx) = mpsc::channel(16);

        let mut hidden = vertex("internal");
        hidden.started = Some(Utc.timestamp_opt(100, 0).single().unwrap());
        hidden.progress_group = Some(ProgressHint {
            id: "g".to_string(),
            name: "internal".to_string(),
            weak: true,
        });
        tx.send(single(hidden)).await.unwrap();

        let mut auth = vertex("[auth] registry.example.com");
        auth.started = Some(Utc.timestamp_opt(100, 0).single().unwrap());
        tx.send(single(auth)).await.unwrap();
        drop(tx);

        let out = SharedBuf::default();
        run_display(rx, out.clone()).await.expect("display failed");
        assert!(out.contents().is_empty());
    }

    #[tokio::test]
    async fn test_display_surfaces_sink_failure() {
        let (tx, rx) = mpsc::channel(16);
        let mut started = vertex("compile");
        started.started = Some(Utc.timestamp_opt(100, 0).single().unwrap());
        tx.send(single(started)).await.unwrap();
        drop(tx);

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            run_display(rx, BrokenSink),
        )
        .await
        .expect("display hung")
        .unwrap_err();
        let SinkError::Io(io_err) = err else {
            panic!("expected I/O error, got {err:?}");
        };
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
    }
}

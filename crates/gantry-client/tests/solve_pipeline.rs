//! End-to-end solve pipeline against a mock engine.
//!
//! Drives [`gantry_client::execute`] over a real unix socket and scripts the
//! engine side of the conversation. This validates, in one place:
//!
//! 1. Handshake and codec widening against a live peer
//! 2. The solve submission carries the session and the rewritten graph
//!    (cache bypass must be visible in the submitted metadata, and the raw
//!    operation bytes must be the decoder's input bytes)
//! 3. Status fan-out to display and trace, including display filtering
//! 4. Result harvesting: outcome maps and the metadata file
//! 5. Engine failure and protocol garbage surface as the right errors

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use gantry_core::digest::Digest;
use gantry_core::graph::decode_graph;
use gantry_core::progress::{ProgressHint, StatusUpdate, Vertex};
use gantry_core::session::{BuildSession, CacheEntry, EngineEndpoint};
use gantry_core::wire::{op_message, GraphEnvelope, InputRef, OpMessage, SourceOp};

use gantry_client::codec::FrameCodec;
use gantry_client::error::{BuildError, SolveError};
use gantry_client::handshake::{parse_handshake_message, HandshakeMessage, HelloAck};
use gantry_client::rpc::{encode_frame, FrameTag, SolveDone, SolveFailure, SolveRequest, StatusFrame};

/// Maximum time to wait for any pipeline stage.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test fixtures
// ============================================================================

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

/// Two-node graph: an image source feeding a second source's op slot is not
/// meaningful to a real engine, but exercises inputs end to end.
fn encoded_ops() -> Vec<Vec<u8>> {
    let base = OpMessage {
        inputs: Vec::new(),
        payload: Some(op_message::Payload::Source(SourceOp {
            identifier: "docker-image://alpine:3.20".to_string(),
            attrs: Default::default(),
        })),
    };
    let base_bytes = base.encode_to_vec();
    let base_digest = Digest::from_bytes(&base_bytes);

    let dependent = OpMessage {
        inputs: vec![InputRef {
            digest: base_digest.to_string(),
            index: 0,
        }],
        payload: Some(op_message::Payload::Source(SourceOp {
            identifier: "local://context".to_string(),
            attrs: Default::default(),
        })),
    };
    vec![base_bytes, dependent.encode_to_vec()]
}

fn envelope_bytes(ops: &[Vec<u8>]) -> Vec<u8> {
    GraphEnvelope {
        ops: ops.to_vec(),
        metadata: Default::default(),
    }
    .encode_to_vec()
}

fn status_updates() -> Vec<StatusUpdate> {
    let cached = Vertex {
        digest: Digest::from_bytes(b"base"),
        name: "load base image".to_string(),
        started: None,
        completed: None,
        cached: true,
        error: String::new(),
        progress_group: None,
    };
    let hidden = Vertex {
        digest: Digest::from_bytes(b"hidden"),
        name: "internal bookkeeping".to_string(),
        started: None,
        completed: None,
        cached: true,
        error: String::new(),
        progress_group: Some(ProgressHint {
            id: "internal".to_string(),
            name: "internal".to_string(),
            weak: true,
        }),
    };
    vec![
        StatusUpdate {
            vertexes: vec![cached],
        },
        StatusUpdate {
            vertexes: vec![hidden],
        },
    ]
}

/// Accepts one connection, answers the handshake, records the solve
/// request, streams `updates`, and finishes with `end_frame`.
fn spawn_mock_engine(
    listener: UnixListener,
    updates: Vec<StatusUpdate>,
    end_frame: Bytes,
) -> JoinHandle<SolveRequest> {
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept failed");
        let mut framed = Framed::new(stream, FrameCodec::handshake());

        let frame = framed
            .next()
            .await
            .expect("no handshake frame")
            .expect("handshake decode failed");
        let HandshakeMessage::Hello(_) = parse_handshake_message(&frame).expect("bad handshake")
        else {
            panic!("first frame was not a hello");
        };
        let ack = HandshakeMessage::HelloAck(HelloAck::new("mock-engine/1.0"));
        framed
            .send(Bytes::from(serde_json::to_vec(&ack).expect("serialize failed")))
            .await
            .expect("ack send failed");
        framed.codec_mut().widen();

        let frame = framed
            .next()
            .await
            .expect("no solve frame")
            .expect("solve decode failed");
        assert_eq!(frame[0], FrameTag::Solve.tag(), "expected a solve frame");
        let request = SolveRequest::decode(&frame[1..]).expect("bad solve request");

        for update in &updates {
            let status = StatusFrame::from_update(update);
            framed
                .send(encode_frame(FrameTag::Status, &status))
                .await
                .expect("status send failed");
        }
        framed.send(end_frame).await.expect("end send failed");

        request
    })
}

fn unix_session(socket: &std::path::Path) -> BuildSession {
    let endpoint = EngineEndpoint::parse(&format!("unix://{}", socket.display()))
        .expect("endpoint parse failed");
    BuildSession::new(endpoint)
}

// ============================================================================
// Pipeline round trip
// ============================================================================

#[tokio::test]
async fn test_solve_pipeline_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let socket = dir.path().join("engine.sock");
    let listener = UnixListener::bind(&socket).expect("bind failed");

    let ops = encoded_ops();
    let mut graph = decode_graph(&envelope_bytes(&ops)).expect("graph decode failed");
    graph.bypass_cache();

    let mut session = unix_session(&socket);
    session.metadata_path = Some(dir.path().join("meta.json"));
    session
        .frontend_opts
        .insert("platform".to_string(), "linux/amd64".to_string());
    session.cache_imports.push(CacheEntry::Local {
        path: "/var/cache/gantry".to_string(),
    });

    let mut done = SolveDone::default();
    done.result_metadata
        .insert("result.txt".to_string(), b"42 nodes".to_vec());
    done.exporter_response.insert(
        "image".to_string(),
        {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD.encode(r#"{"image.name":"app:1"}"#)
        },
    );
    let engine = spawn_mock_engine(
        listener,
        status_updates(),
        encode_frame(FrameTag::Done, &done),
    );

    let progress = SharedBuf::default();
    let trace = SharedBuf::default();
    let outcome = timeout(
        TEST_TIMEOUT,
        gantry_client::execute(&graph, &session, progress.clone(), Some(trace.clone())),
    )
    .await
    .expect("pipeline hung")
    .expect("build failed");

    // Outcome carries the frontend's result bytes.
    assert_eq!(
        outcome.result_metadata.get("result.txt").map(Vec::as_slice),
        Some(b"42 nodes".as_slice())
    );

    // The engine saw the session and the rewritten graph.
    let request = timeout(TEST_TIMEOUT, engine)
        .await
        .expect("mock engine hung")
        .expect("mock engine panicked");
    assert_eq!(request.reference, session.reference);
    assert_eq!(
        request.frontend_opts.get("platform").map(String::as_str),
        Some("linux/amd64")
    );
    assert_eq!(request.cache_imports.len(), 1);
    assert_eq!(request.cache_imports[0].kind, "local");

    let definition = request.definition.expect("definition missing");
    // Raw operation bytes are resubmitted verbatim.
    assert_eq!(definition.ops, ops);
    // The cache bypass is visible per node, keyed by content digest.
    assert_eq!(definition.metadata.len(), ops.len());
    for op_bytes in &ops {
        let digest = Digest::from_bytes(op_bytes);
        let metadata = definition
            .metadata
            .get(digest.as_str())
            .expect("node metadata missing");
        assert!(metadata.ignore_cache);
    }

    // Display shows the cached step and hides the weak group.
    let shown = progress.contents();
    assert!(shown.contains("CACHED load base image"), "got: {shown}");
    assert!(!shown.contains("internal bookkeeping"), "got: {shown}");

    // Trace records every update, one JSON line each.
    let traced = trace.contents();
    assert_eq!(traced.lines().count(), 2);
    assert!(traced.contains("internal bookkeeping"));

    // The metadata file holds the harvested exporter response.
    let meta_raw =
        std::fs::read_to_string(dir.path().join("meta.json")).expect("metadata file missing");
    let meta: serde_json::Value = serde_json::from_str(&meta_raw).expect("bad metadata JSON");
    assert_eq!(meta["image"]["image.name"], "app:1");
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_solve_pipeline_surfaces_engine_failure() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let socket = dir.path().join("engine.sock");
    let listener = UnixListener::bind(&socket).expect("bind failed");

    let failure = SolveFailure {
        message: "no worker for platform linux/s390x".to_string(),
    };
    let engine = spawn_mock_engine(listener, Vec::new(), encode_frame(FrameTag::Failure, &failure));

    let graph = decode_graph(&envelope_bytes(&encoded_ops())).expect("graph decode failed");
    let session = unix_session(&socket);

    let err = timeout(
        TEST_TIMEOUT,
        gantry_client::execute(&graph, &session, SharedBuf::default(), None::<SharedBuf>),
    )
    .await
    .expect("pipeline hung")
    .unwrap_err();

    let BuildError::Solve(solve) = err else {
        panic!("expected a solve error, got {err:?}");
    };
    assert!(solve.is_engine_failure());
    assert!(solve.to_string().contains("linux/s390x"));

    timeout(TEST_TIMEOUT, engine)
        .await
        .expect("mock engine hung")
        .expect("mock engine panicked");
}

#[tokio::test]
async fn test_solve_pipeline_rejects_unknown_frame_tag() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let socket = dir.path().join("engine.sock");
    let listener = UnixListener::bind(&socket).expect("bind failed");

    // Tag 9 is not part of the protocol.
    let engine = spawn_mock_engine(listener, Vec::new(), Bytes::from_static(&[9, 0, 0]));

    let graph = decode_graph(&envelope_bytes(&encoded_ops())).expect("graph decode failed");
    let session = unix_session(&socket);

    let err = timeout(
        TEST_TIMEOUT,
        gantry_client::execute(&graph, &session, SharedBuf::default(), None::<SharedBuf>),
    )
    .await
    .expect("pipeline hung")
    .unwrap_err();

    let BuildError::Solve(SolveError::Protocol(protocol)) = err else {
        panic!("expected a protocol error, got {err:?}");
    };
    assert!(protocol.is_protocol_violation());

    timeout(TEST_TIMEOUT, engine)
        .await
        .expect("mock engine hung")
        .expect("mock engine panicked");
}

//! Build orchestration: submit a graph and supervise the solve.
//!
//! [`execute`] is the crate's top-level operation. It renders the session
//! into a solve request, connects, and supervises three tasks under one
//! [`TaskGroup`]: the solve loop reading engine frames, interactive display,
//! and optional trace recording. The solve loop owns the progress fanout, so
//! every exit path closes the consumer channels exactly once; the first
//! failing task cancels the others.
//!
//! An empty graph is rejected before any connection is made.

use std::io::Write;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gantry_core::graph::BuildGraph;
use gantry_core::progress::StatusUpdate;
use gantry_core::session::BuildSession;

use crate::connect::EngineConnection;
use crate::display::run_display;
use crate::error::{BuildError, BuildResult, ProtocolError, SolveError};
use crate::fanout::ProgressFanout;
use crate::harvest::{write_metadata_file, BuildOutcome};
use crate::rpc::{
    encode_frame, inject_subrequest_capability, AttachmentMsg, CacheOptionsMsg, EngineFrame,
    ExportMsg, FrameTag, SolveRequest,
};
use crate::taskgroup::TaskGroup;
use crate::trace::run_trace;

/// Submits `graph` under `session` and drives the solve to completion.
///
/// Progress lines go to `progress_out`; when `trace_out` is given, every
/// status update is additionally recorded there as newline-delimited JSON.
/// On success the harvested metadata file has been written (when the session
/// asks for one) and the returned [`BuildOutcome`] carries the result maps.
///
/// # Errors
///
/// Returns [`BuildError::EmptyGraph`] without connecting when the graph has
/// no operations. Connection, solve, display, and trace failures are
/// wrapped in the corresponding [`BuildError`] variant; the first failure
/// aborts the remaining tasks.
pub async fn execute<P, T>(
    graph: &BuildGraph,
    session: &BuildSession,
    progress_out: P,
    trace_out: Option<T>,
) -> BuildResult<BuildOutcome>
where
    P: Write + Send + 'static,
    T: Write + Send + 'static,
{
    if graph.is_empty() {
        return Err(BuildError::EmptyGraph);
    }

    let request = assemble_request(graph, session);
    debug!(
        reference = %request.reference,
        nodes = graph.len(),
        exports = request.exports.len(),
        "submitting build graph"
    );
    let request_frame = encode_frame(FrameTag::Solve, &request);

    let connection = EngineConnection::establish(&session.endpoint).await?;

    let mut fanout = ProgressFanout::new();
    let display_rx = fanout.attach();
    let trace_rx = trace_out.is_some().then(|| fanout.attach());

    let mut group: TaskGroup<BuildError> = TaskGroup::new();
    let (outcome_tx, outcome_rx) = oneshot::channel();

    group.spawn(run_solve(
        connection,
        fanout,
        request_frame,
        session.metadata_path.clone(),
        outcome_tx,
        group.cancellation_token(),
    ));
    group.spawn(async move {
        run_display(display_rx, progress_out)
            .await
            .map_err(BuildError::from)
    });
    if let (Some(trace_out), Some(trace_rx)) = (trace_out, trace_rx) {
        group.spawn(async move {
            run_trace(trace_rx, trace_out)
                .await
                .map_err(BuildError::from)
        });
    }

    group.join().await?;

    // A clean join means the solve loop reached `Done` and sent the outcome.
    let outcome = outcome_rx
        .await
        .map_err(|_| BuildError::from(SolveError::from(ProtocolError::ConnectionClosed)))?;
    info!(reference = %session.reference, "build complete");
    Ok(outcome)
}

/// Renders the session and graph into the wire submission.
fn assemble_request(graph: &BuildGraph, session: &BuildSession) -> SolveRequest {
    let mut frontend_opts = session.frontend_opts.clone();
    inject_subrequest_capability(&mut frontend_opts);

    SolveRequest {
        reference: session.reference.clone(),
        definition: Some(graph.to_envelope()),
        frontend_opts,
        cache_imports: session
            .cache_imports
            .iter()
            .map(|entry| CacheOptionsMsg::from(&entry.to_import()))
            .collect(),
        cache_exports: session
            .cache_exports
            .iter()
            .map(|entry| CacheOptionsMsg::from(&entry.to_export()))
            .collect(),
        exports: session.exports.iter().map(ExportMsg::from).collect(),
        entitlements: session
            .entitlements
            .iter()
            .map(|entitlement| entitlement.as_str().to_string())
            .collect(),
        local_paths: session.locals.dump().clone(),
        attachments: session
            .attachments()
            .iter()
            .map(AttachmentMsg::from)
            .collect(),
    }
}

/// Reads engine frames until the solve ends, fanning status out as it goes.
///
/// Owns the connection and the fanout; returning drops both, which closes
/// the socket and the consumer channels. Cancellation (a sibling task
/// failed) ends the loop quietly so the sibling's error is the one
/// reported.
async fn run_solve(
    mut connection: EngineConnection,
    fanout: ProgressFanout,
    request_frame: Bytes,
    metadata_path: Option<PathBuf>,
    outcome_tx: oneshot::Sender<BuildOutcome>,
    cancel: CancellationToken,
) -> Result<(), BuildError> {
    connection
        .send_frame(request_frame)
        .await
        .map_err(SolveError::from)?;

    loop {
        let frame = tokio::select! {
            frame = connection.next_frame() => frame.map_err(SolveError::from)?,
            () = cancel.cancelled() => return Ok(()),
        };
        let Some(frame) = frame else {
            return Err(SolveError::from(ProtocolError::ConnectionClosed).into());
        };

        match EngineFrame::decode(&frame).map_err(SolveError::from)? {
            EngineFrame::Status(status) => {
                let update = StatusUpdate::try_from(status).map_err(SolveError::from)?;
                fanout.offer(&update).await;
            }
            EngineFrame::Failure(failure) => {
                return Err(SolveError::Engine {
                    message: failure.message,
                }
                .into());
            }
            EngineFrame::Done(done) => {
                let outcome = BuildOutcome::from(done);
                if let Some(path) = &metadata_path {
                    write_metadata_file(path, &outcome.exporter_response)?;
                }
                let _ = outcome_tx.send(outcome);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use gantry_core::graph::decode_graph;
    use gantry_core::session::{CacheEntry, EngineEndpoint, ExportSpec};
    use gantry_core::wire::{op_message, GraphEnvelope, OpMessage, SourceOp};

    use crate::rpc::{CAP_SUBREQUESTS, FRONTEND_OPT_CAPS, FRONTEND_OPT_REQUEST_ID};

    use super::*;

    fn single_node_graph() -> BuildGraph {
        let op = OpMessage {
            inputs: Vec::new(),
            payload: Some(op_message::Payload::Source(SourceOp {
                identifier: "docker-image://alpine".to_string(),
                attrs: Default::default(),
            })),
        };
        let envelope = GraphEnvelope {
            ops: vec![op.encode_to_vec()],
            metadata: Default::default(),
        };
        decode_graph(&envelope.encode_to_vec()).expect("decode failed")
    }

    fn session() -> BuildSession {
        BuildSession::new(
            EngineEndpoint::parse("unix:///nonexistent/engine.sock").expect("parse failed"),
        )
    }

    #[tokio::test]
    async fn test_execute_rejects_empty_graph_before_connecting() {
        let graph = decode_graph(&[]).expect("decode failed");
        // The endpoint does not exist; reaching it would fail differently.
        let err = execute(&graph, &session(), Vec::new(), None::<Vec<u8>>)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::EmptyGraph));
    }

    #[test]
    fn test_assemble_request_renders_session_state() {
        let graph = single_node_graph();
        let mut session = session();
        session.allow_network_host(true);
        session.cache_imports.push(CacheEntry::Registry {
            reference: "registry.example.com/cache:main".to_string(),
        });
        session.cache_exports.push(CacheEntry::Registry {
            reference: "registry.example.com/cache:main".to_string(),
        });
        session.exports.push(ExportSpec::local("/tmp/out", false));
        session
            .frontend_opts
            .insert("platform".to_string(), "linux/amd64".to_string());
        let name = session.locals.name_for("/src/app");
        assert_eq!(name, "folder1");

        let request = assemble_request(&graph, &session);
        assert_eq!(request.reference, session.reference);
        assert_eq!(
            request.definition.as_ref().map(|def| def.ops.len()),
            Some(1)
        );
        assert_eq!(request.entitlements, vec!["network.host".to_string()]);

        // Imports and exports render differently from the same entry.
        assert!(!request.cache_imports[0].attrs.contains_key("mode"));
        assert_eq!(
            request.cache_exports[0].attrs.get("mode").map(String::as_str),
            Some("max")
        );

        assert_eq!(
            request.local_paths.get("folder1").map(String::as_str),
            Some("/src/app")
        );
        assert_eq!(
            request.frontend_opts.get("platform").map(String::as_str),
            Some("linux/amd64")
        );
        assert!(!request.frontend_opts.contains_key(FRONTEND_OPT_CAPS));
    }

    #[test]
    fn test_assemble_request_advertises_subrequest_capability() {
        let graph = single_node_graph();
        let mut session = session();
        session.frontend_opts.insert(
            FRONTEND_OPT_REQUEST_ID.to_string(),
            "frontend.outline".to_string(),
        );

        let request = assemble_request(&graph, &session);
        assert_eq!(
            request.frontend_opts.get(FRONTEND_OPT_CAPS).map(String::as_str),
            Some(CAP_SUBREQUESTS)
        );
    }
}

//! # gantry-client
//!
//! Submission client for the gantry build engine.
//!
//! Takes a decoded [`gantry_core::graph::BuildGraph`] plus a
//! [`gantry_core::session::BuildSession`] and drives one solve over the
//! engine's framed protocol:
//!
//! - Length-prefixed frame transport with size caps ([`codec`])
//! - JSON handshake and version negotiation ([`handshake`])
//! - Endpoint dialing over unix, TCP, and TLS ([`connect`])
//! - The tagged protobuf RPC surface ([`rpc`])
//! - Solve supervision with progress fan-out ([`build`], [`fanout`],
//!   [`taskgroup`])
//! - Progress display and trace recording ([`display`], [`trace`])
//! - Result metadata harvesting ([`harvest`])
//!
//! ## Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use gantry_client::execute;
//! use gantry_core::graph::decode_graph;
//! use gantry_core::session::{BuildSession, EngineEndpoint};
//!
//! let raw = std::fs::read("graph.bin")?;
//! let graph = decode_graph(&raw)?;
//! let session = BuildSession::new(EngineEndpoint::parse(
//!     "unix:///run/gantry/engine.sock",
//! )?);
//!
//! let outcome = execute(&graph, &session, std::io::stderr(), None::<std::fs::File>).await?;
//! println!("{} exporter entries", outcome.exporter_response.len());
//! # Ok(())
//! # }
//! ```

pub mod build;
pub mod codec;
pub mod connect;
pub mod display;
pub mod error;
pub mod fanout;
pub mod handshake;
pub mod harvest;
pub mod rpc;
pub mod taskgroup;
pub mod trace;

pub use build::execute;
pub use connect::EngineConnection;
pub use error::{BuildError, BuildResult, ConnectError, ProtocolError, SolveError};
pub use harvest::{render_results, BuildOutcome};

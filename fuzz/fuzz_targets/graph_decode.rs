//! Fuzz harness for build graph decoding and the dump writers.
//!
//! This target exercises `decode_graph` with arbitrary byte sequences,
//! ensuring no panics occur on truncated envelopes, malformed operations,
//! or garbage input references. Anything the decoder accepts must also
//! survive the cache-bypass rewrite and both dump formats.

#![no_main]
use gantry_core::digest::Digest;
use gantry_core::dump::{write_dot, write_json};
use gantry_core::graph::decode_graph;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The decoder must never panic, regardless of input.
    // It should always return Ok or Err.
    let Ok(mut graph) = decode_graph(data) else {
        return;
    };

    graph.bypass_cache();

    let mut out = Vec::new();
    let _ = write_json(&graph, &mut out);
    out.clear();
    let _ = write_dot(&graph, &mut out);

    // Every digest the decoder emits must parse back to itself.
    for node in &graph.nodes {
        let parsed = node
            .digest
            .as_str()
            .parse::<Digest>()
            .expect("decoder emitted an unparseable digest");
        assert_eq!(parsed, node.digest);
    }
});

//! Fuzz harness for engine frame and handshake parsing.
//!
//! Both parsers sit directly on the network boundary: arbitrary bytes in,
//! structured results out. Neither may panic on any input.

#![no_main]
use gantry_client::handshake::parse_handshake_message;
use gantry_client::rpc::EngineFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = EngineFrame::decode(data);
    let _ = parse_handshake_message(data);
});

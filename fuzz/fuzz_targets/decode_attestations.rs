#![no_main]

use hashgraph_core::vertex::wire::decode_attestations;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = decode_attestations(data);
});

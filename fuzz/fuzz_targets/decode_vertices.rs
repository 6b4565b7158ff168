#![no_main]

use hashgraph_core::vertex::wire::{decode_vertices, encode_vertices};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Anything that decodes has verified hashes, so it must re-encode and
    // decode to the same batch.
    if let Ok(vertices) = decode_vertices(data) {
        let again = decode_vertices(&encode_vertices(&vertices)).expect("re-decode");
        assert_eq!(vertices, again);
    }
});

//! Fuzz test for decoding stored values
//!
//! Stored bytes come from outside the process, so decoding must fail with an
//! error rather than panic or loop, whatever the payload and resolver do.
//!
//! Run with: cargo +nightly fuzz run decode_fuzz -- -max_total_time=60

#![no_main]

use cacher_storage::{Codec, Envelope, TypeDecoder, TypeRegistry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let registry = TypeRegistry::new();
    registry.register_decoder("Known", TypeDecoder::passthrough());
    // Even-length names resolve to a decoder that rejects everything.
    registry.set_resolver(|name: &str| {
        (name.len() % 2 == 0).then(|| TypeDecoder::new(|_| Err("rejected".to_string())))
    });

    let codec = Codec::new(true, &registry);
    let _ = codec.decode(Envelope::Marshalled(data.to_vec()));

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let raw = Codec::new(false, &registry);
        let _ = raw.decode(Envelope::Raw(value));
    }
});

#![no_main]

//! Fuzz target for label extraction
//!
//! Uploads are untrusted bytes; decoding and cropping must fail with an
//! error rather than panic.
//!
//! Run with: cargo +nightly fuzz run fuzz_extract_label

use icr_core::LabelExtractor;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = LabelExtractor::default().extract(data);
});

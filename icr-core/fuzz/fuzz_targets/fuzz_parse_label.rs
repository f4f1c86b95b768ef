#![no_main]

//! Fuzz target for PSA label parsing
//!
//! OCR output is arbitrary text; tokenizing and deriving fields must never
//! panic, and a cert number, when found, is a run of 6 or more digits.
//!
//! Run with: cargo +nightly fuzz run fuzz_parse_label

use icr_core::{parse_label, PsaLabelParser};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let lines: Vec<&str> = text.lines().collect();

    let fields = parse_label(&PsaLabelParser::default(), &lines);
    if let Some(cert) = &fields.cert_number {
        assert!(cert.chars().count() >= 6 && cert.chars().all(char::is_numeric));
    }
});

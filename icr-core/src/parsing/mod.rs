//! PSA label text parsing.
//!
//! Two steps: [`PsaLabelParser`] anchors on year and certification number and
//! keeps the ordered dynamic fields between them, then
//! [`ExtractedFields::from_parsed`] derives grade, language, set name, card
//! numbers, names and modifiers for the matcher.

mod fields;
mod tokenizer;

pub use fields::{normalize_card_number, tokenize, ExtractedFields, Language};
pub use tokenizer::{ParsedLabel, PsaLabelParser, DEFAULT_MIN_YEAR};

/// Tokenize and derive fields in one go.
pub fn parse_label<S: AsRef<str>>(parser: &PsaLabelParser, lines: &[S]) -> ExtractedFields {
    ExtractedFields::from_parsed(&parser.parse_lines(lines))
}

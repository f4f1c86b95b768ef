//! Content-addressed hashing for deduplication.
//!
//! Every scan, extracted label and stitched composite is identified by the
//! SHA-256 digest of its bytes, hex-encoded in lowercase (64 characters).

use sha2::{Digest, Sha256};

use crate::error::{IcrError, Result};

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Hash image bytes into a 64-character lowercase hex string.
///
/// Fails with [`IcrError::Validation`] for an empty buffer: an empty upload
/// is never a valid image and must not claim the well-known empty digest.
pub fn content_hash(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() {
        return Err(IcrError::Validation(
            "cannot hash an empty image buffer".into(),
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Identity of an ordered set of label hashes.
///
/// Order matters: the composite and its position table depend on input order,
/// so `[a, b]` and `[b, a]` are different stitches.
pub fn label_set_hash(label_hashes: &[String]) -> String {
    let mut hasher = Sha256::new();
    for hash in label_hashes {
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Check that a string looks like a hash produced by [`content_hash`].
pub fn is_valid_hash(value: &str) -> bool {
    value.len() == HASH_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

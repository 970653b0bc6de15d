//! Content fingerprints used as cache keys.

use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// SHA-256 of the exact UTF-8 bytes of `text`, lowercase hex.
///
/// No normalization is applied: texts that differ by a single byte
/// (including whitespace) get different keys.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{digest:x}")
}

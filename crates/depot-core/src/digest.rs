//! # Id Digests
//!
//! Hashing used by descriptor id derivation: dependency chains and
//! hash-tagged properties are folded into a single fixed-width digest, and
//! over-long ids are collapsed to a prefix plus the digest of the whole.
//!
//! SHA-256 rendered as lowercase hex is used throughout. Any deterministic,
//! collision-resistant digest would do; ids only need to be stable for a
//! given store.

use sha2::{Digest, Sha256};

/// Width in chars of a rendered id digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Compute the lowercase hex SHA-256 digest of `data`.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let hash = Sha256::digest(data.as_ref());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Collapse an over-long id prefix to `keep` leading bytes plus the digest of
/// the full prefix.
///
/// The cut is moved back to the nearest char boundary so multi-byte property
/// values never split.
pub fn collapse(prefix: &str, keep: usize) -> String {
    let mut cut = keep.min(prefix.len());
    while !prefix.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + DIGEST_HEX_LEN);
    out.push_str(&prefix[..cut]);
    out.push_str(&sha256_hex(prefix));
    out
}

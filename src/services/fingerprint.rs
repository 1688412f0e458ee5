//! Snapshot keys for the finding uniqueness constraint.
//!
//! The key hashes the matcher's normalized form, so two snapshots that differ
//! only in whitespace, quoting or attribute order share a key.

use sha2::{Digest, Sha256};

use crate::engine::IdentityMatcher;

/// Key for an already-normalized snapshot.
pub fn snapshot_key(normalized: &str) -> String {
    hash(&format!("SNAPSHOT:{normalized}"))
}

/// Normalize a raw snapshot with `matcher` and key it.
pub fn compute(matcher: &dyn IdentityMatcher, snapshot: &str) -> String {
    snapshot_key(&matcher.normalize(snapshot))
}

/// SHA-256 hash a string and return hex-encoded digest.
fn hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NormalizedMarkupMatcher;

    #[test]
    fn key_is_hex_sha256() {
        let key = snapshot_key("imgsrcapng");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn equivalent_markup_shares_a_key() {
        let matcher = NormalizedMarkupMatcher::new().unwrap();
        assert_eq!(
            compute(&matcher, "<img src=\"a.png\" alt=\"\">"),
            compute(&matcher, "<img  alt='' src='a.png'>")
        );
    }

    #[test]
    fn different_elements_have_different_keys() {
        let matcher = NormalizedMarkupMatcher::new().unwrap();
        assert_ne!(
            compute(&matcher, "<img src=\"a.png\">"),
            compute(&matcher, "<img src=\"b.png\">")
        );
    }
}

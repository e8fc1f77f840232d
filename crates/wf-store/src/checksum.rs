//! Payload checksums for persisted workflow state.
//!
//! Plain SHA-256 content digest, hex-encoded.

use sha2::{Digest, Sha256};

pub fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        let a = hex_digest(b"hello");
        let b = hex_digest(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn digest_changes_with_input() {
        assert_ne!(hex_digest(b"hello"), hex_digest(b"world"));
    }

    #[test]
    fn digest_is_hex() {
        let d = hex_digest(b"x");
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d.len(), 64);
    }
}

//! Content fingerprints used for change detection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowercase hex MD5 digest of a document's content.
///
/// Stored alongside each remote record as `contentHash`; equality with the
/// locally computed value is the only signal that a file is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(Box<str>);

impl ContentHash {
    /// Access the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `stored` (as read back from the store) names this digest.
    #[must_use]
    pub fn matches_stored(&self, stored: &str) -> bool {
        self.0.as_ref() == stored.trim()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Compute the fingerprint of `content`.
#[must_use]
pub fn fingerprint(content: &[u8]) -> ContentHash {
    let digest = md5::compute(content);
    ContentHash(format!("{digest:x}").into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            fingerprint(b"").as_str(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            fingerprint(b"hello").as_str(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn stored_comparison_tolerates_whitespace_only() {
        let hash = fingerprint(b"hello");
        assert!(hash.matches_stored("5d41402abc4b2a76b9719d911017c592\n"));
        assert!(!hash.matches_stored("5D41402ABC4B2A76B9719D911017C592"));
        assert!(!hash.matches_stored(""));
    }

    proptest! {
        #[test]
        fn fingerprint_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(fingerprint(&bytes), fingerprint(&bytes));
        }

        #[test]
        fn fingerprint_is_lowercase_hex(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let hash = fingerprint(&bytes);
            prop_assert_eq!(hash.as_str().len(), 32);
            prop_assert!(hash.as_str().chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }

        #[test]
        fn appended_byte_changes_fingerprint(text in ".{0,64}", extra in any::<u8>()) {
            let mut changed = text.clone().into_bytes();
            changed.push(extra);
            prop_assert_ne!(fingerprint(text.as_bytes()), fingerprint(&changed));
        }
    }
}

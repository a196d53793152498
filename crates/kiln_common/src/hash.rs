//! Content hashing for content-addressed storage and option digests.
//!
//! Change detection never hashes file contents (see the fingerprint in
//! `kiln_cache`); hashes are only used to name stored bytes and to digest
//! configuration values that become part of a cache key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 128-bit content hash computed using XXH3.
///
/// Two byte sequences with the same `ContentHash` are assumed to be identical.
/// The lowercase hex rendering is used as a file name in the blob and record
/// stores, so it round-trips through [`FromStr`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

/// Error returned when a string is not a 32-character hex content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseContentHashError(String);

impl fmt::Display for ParseContentHashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid content hash '{}'", self.0)
    }
}

impl std::error::Error for ParseContentHashError {}

impl ContentHash {
    /// Computes a content hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Computes a content hash of a string.
    pub fn from_str_content(data: &str) -> Self {
        Self::from_bytes(data.as_bytes())
    }

    /// Digests any serializable value through its canonical JSON form.
    ///
    /// Used to fold a compilation unit's configuration into its cache key.
    /// Map-typed fields must be ordered (`BTreeMap`) for the digest to be stable.
    pub fn of_json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&json))
    }

    /// Returns the full lowercase hex rendering (32 characters).
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl FromStr for ContentHash {
    type Err = ParseContentHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.is_ascii() {
            return Err(ParseContentHashError(s.to_string()));
        }
        let mut bytes = [0u8; 16];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseContentHashError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn deterministic() {
        let a = ContentHash::from_bytes(b"body { color: red }");
        let b = ContentHash::from_bytes(b"body { color: red }");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = ContentHash::from_bytes(b"a.css");
        let b = ContentHash::from_bytes(b"b.css");
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_32_hex_chars() {
        let s = ContentHash::from_bytes(b"test").to_hex();
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn parses_its_own_hex() {
        let h = ContentHash::from_str_content("blob");
        let back: ContentHash = h.to_hex().parse().unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!("abc".parse::<ContentHash>().is_err());
        assert!("zz".repeat(16).parse::<ContentHash>().is_err());
    }

    #[test]
    fn json_digest_follows_value() {
        let mut a = BTreeMap::new();
        a.insert("precision", "5");
        let mut b = a.clone();
        assert_eq!(
            ContentHash::of_json(&a).unwrap(),
            ContentHash::of_json(&b).unwrap()
        );
        b.insert("precision", "10");
        assert_ne!(
            ContentHash::of_json(&a).unwrap(),
            ContentHash::of_json(&b).unwrap()
        );
    }

    #[test]
    fn debug_abbreviated() {
        let s = format!("{:?}", ContentHash::from_bytes(b"test"));
        assert!(s.starts_with("ContentHash("));
        assert!(s.ends_with("..)"));
    }
}

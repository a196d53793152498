//! The two records persisted per cache key.
//!
//! The dependency manifest lists every real file a transformation touched
//! with its fingerprint at the time; the output bundle carries the produced
//! bytes plus references to externally-located outputs. Both are plain JSON
//! so any tool can inspect a cache directory.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::fingerprint::Fingerprint;

/// Ordered `(path, fingerprint)` pairs, serialized as a JSON array of pairs.
///
/// Paths are slash-separated and relative to the input root when the
/// dependency lives inside it, absolute otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyManifest {
    entries: Vec<(String, Fingerprint)>,
}

impl DependencyManifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one dependency.
    pub fn push(&mut self, path: impl Into<String>, fingerprint: Fingerprint) {
        self.entries.push((path.into(), fingerprint));
    }

    /// Iterates over `(path, fingerprint)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Fingerprint)> {
        self.entries.iter().map(|(p, f)| (p.as_str(), f))
    }

    /// Number of dependencies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the manifest lists nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes to the persisted JSON form.
    pub fn to_json(&self) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Parses the persisted JSON form.
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        serde_json::from_str(json).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }
}

/// The produced outputs of one source file.
///
/// `contents` maps output-root-relative paths to base64 bytes; `urls` maps
/// the public path of each externally-located output to the absolute source
/// it is restored from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBundle {
    /// Output-root-relative path to base64-encoded bytes.
    #[serde(default)]
    pub contents: BTreeMap<String, String>,
    /// Public path to absolute source path of external outputs.
    #[serde(default)]
    pub urls: BTreeMap<String, String>,
}

impl OutputBundle {
    /// Creates an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the bytes of one output.
    pub fn add_content(&mut self, relative_output: impl Into<String>, bytes: &[u8]) {
        self.contents
            .insert(relative_output.into(), STANDARD.encode(bytes));
    }

    /// Adds one externally-located output reference.
    pub fn add_url(&mut self, public_path: impl Into<String>, source: impl Into<String>) {
        self.urls.insert(public_path.into(), source.into());
    }

    /// Decodes every output back into bytes.
    ///
    /// Fails on the first entry that is not valid base64 or whose path would
    /// escape the output root.
    pub fn decoded_contents(&self) -> Result<Vec<(String, Vec<u8>)>, CacheError> {
        self.contents
            .iter()
            .map(|(path, encoded)| {
                if path.starts_with('/') || path.split('/').any(|part| part == "..") {
                    return Err(CacheError::CorruptOutput {
                        output: path.clone(),
                        reason: "path escapes the output root".to_string(),
                    });
                }
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| CacheError::CorruptOutput {
                        output: path.clone(),
                        reason: e.to_string(),
                    })?;
                Ok((path.clone(), bytes))
            })
            .collect()
    }

    /// Serializes to the persisted JSON form.
    pub fn to_json(&self) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Parses the persisted JSON form.
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        serde_json::from_str(json).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FileStat;

    #[test]
    fn manifest_json_is_array_of_pairs() {
        let mut m = DependencyManifest::new();
        m.push("a.scss", Fingerprint::missing());
        m.push(
            "_b.scss",
            Fingerprint::from_stat(&FileStat {
                size: 1,
                mtime_ms: 2,
                mode: 3,
            }),
        );
        assert_eq!(
            m.to_json().unwrap(),
            r#"[["a.scss","0:0:0"],["_b.scss","1:2:3"]]"#
        );
    }

    #[test]
    fn manifest_preserves_order() {
        let m = DependencyManifest::from_json(r#"[["z","1:1:1"],["a","2:2:2"]]"#).unwrap();
        let paths: Vec<_> = m.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["z", "a"]);
    }

    #[test]
    fn manifest_rejects_malformed_json() {
        assert!(DependencyManifest::from_json("{\"not\": \"pairs\"}").is_err());
    }

    #[test]
    fn bundle_json_shape() {
        let mut b = OutputBundle::new();
        b.add_content("a.css", b"a{}");
        b.add_url("/assets/logo.png", "/work/assets/logo.png");
        let json: serde_json::Value = serde_json::from_str(&b.to_json().unwrap()).unwrap();
        assert_eq!(json["contents"]["a.css"], "YXt9");
        assert_eq!(json["urls"]["/assets/logo.png"], "/work/assets/logo.png");
    }

    #[test]
    fn bundle_decodes_contents() {
        let mut b = OutputBundle::new();
        b.add_content("nested/a.css", b"\x00binary\xff");
        let decoded = b.decoded_contents().unwrap();
        assert_eq!(
            decoded,
            vec![("nested/a.css".to_string(), b"\x00binary\xff".to_vec())]
        );
    }

    #[test]
    fn bundle_with_bad_base64_fails_to_decode() {
        let b = OutputBundle::from_json(r#"{"contents":{"a.css":"!!!"},"urls":{}}"#).unwrap();
        assert!(matches!(
            b.decoded_contents(),
            Err(CacheError::CorruptOutput { .. })
        ));
    }

    #[test]
    fn bundle_rejects_escaping_paths() {
        let mut b = OutputBundle::new();
        b.add_content("../outside.css", b"x");
        assert!(b.decoded_contents().is_err());
    }

    #[test]
    fn bundle_missing_fields_default() {
        let b = OutputBundle::from_json("{}").unwrap();
        assert!(b.contents.is_empty());
        assert!(b.urls.is_empty());
    }
}

//! Versioned cache keys and the record namespaces derived from them.

use std::fmt;

use crate::fingerprint::Fingerprint;

/// Version of the cache key scheme.
///
/// Bumping it makes every key written by an older scheme unreachable: those
/// records are never looked up again and are reclaimed by the next
/// [`PersistentCache::clear`](crate::PersistentCache::clear).
pub const CACHE_KEY_VERSION: u32 = 1;

/// Identity of one cacheable transformation of one source file.
///
/// Two builds with equal keys are assumed to produce identical outputs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds `v<version>:<relative>@<fingerprint>[+<digest>]`.
    ///
    /// `relative` is the slash-separated input-root-relative path of the
    /// source; `digest` is an optional configuration digest contributed by a
    /// collaborator.
    pub fn new(relative: &str, fingerprint: &Fingerprint, digest: Option<&str>) -> Self {
        let mut key = format!("v{CACHE_KEY_VERSION}:{relative}@{fingerprint}");
        if let Some(digest) = digest.filter(|d| !d.is_empty()) {
            key.push('+');
            key.push_str(digest);
        }
        Self(key)
    }

    /// Record key of the dependency manifest for this key.
    pub fn dependencies_record(&self) -> String {
        format!("dependencies-of:{}", self.0)
    }

    /// Record key of the output bundle for this key.
    pub fn output_record(&self) -> String {
        format!("output-of:{}", self.0)
    }

    /// Returns the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FileStat;

    fn fp() -> Fingerprint {
        Fingerprint::from_stat(&FileStat {
            size: 10,
            mtime_ms: 20,
            mode: 30,
        })
    }

    #[test]
    fn key_format() {
        let key = CacheKey::new("nested/a.scss", &fp(), None);
        assert_eq!(key.as_str(), "v1:nested/a.scss@10:20:30");
    }

    #[test]
    fn digest_is_appended() {
        let key = CacheKey::new("a.scss", &fp(), Some("abc"));
        assert_eq!(key.as_str(), "v1:a.scss@10:20:30+abc");
    }

    #[test]
    fn empty_digest_is_ignored() {
        assert_eq!(
            CacheKey::new("a.scss", &fp(), Some("")),
            CacheKey::new("a.scss", &fp(), None)
        );
    }

    #[test]
    fn namespaces_do_not_collide() {
        let key = CacheKey::new("a.scss", &fp(), None);
        assert_ne!(key.dependencies_record(), key.output_record());
        assert!(key.dependencies_record().starts_with("dependencies-of:"));
        assert!(key.output_record().starts_with("output-of:"));
    }

    #[test]
    fn different_fingerprints_differ() {
        let a = CacheKey::new("a.scss", &fp(), None);
        let b = CacheKey::new("a.scss", &Fingerprint::missing(), None);
        assert_ne!(a, b);
    }
}

//! High-level persistent cache.
//!
//! The `PersistentCache` ties the record store and the blob store into the
//! lookup/store/clear interface the build engine uses. Every read problem,
//! whether a missing record, a stale dependency, or a corrupt payload, is a
//! miss; only writes can fail.

use std::path::Path;
use std::sync::Arc;

use crate::blob::BlobStore;
use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::key::CacheKey;
use crate::manifest::{DependencyManifest, OutputBundle};
use crate::record::{DiskRecordStore, RecordStore};

/// Why a lookup missed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// No dependency manifest is stored for the key.
    NoManifest,
    /// The stored manifest could not be parsed.
    CorruptManifest,
    /// A dependency's live fingerprint differs from the stored one.
    StaleDependency(String),
    /// No output bundle is stored for the key.
    NoOutput,
    /// The stored output bundle could not be parsed or decoded.
    CorruptOutput,
}

/// A validated cache hit, with outputs already decoded.
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The stored dependency manifest; every entry matched its live fingerprint.
    pub manifest: DependencyManifest,
    /// Decoded `(relative output path, bytes)` pairs.
    pub outputs: Vec<(String, Vec<u8>)>,
    /// Public path to absolute source path of external outputs.
    pub urls: Vec<(String, String)>,
}

/// Result of [`PersistentCache::lookup`].
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Nothing usable is stored.
    Miss(MissReason),
    /// Everything needed to restore the outputs without transforming.
    Hit(CacheHit),
}

/// Durable cross-process cache of dependency manifests and output bundles.
pub struct PersistentCache {
    records: Arc<dyn RecordStore>,
    blobs: BlobStore,
}

impl PersistentCache {
    /// Opens (or lazily creates) the on-disk cache in `cache_dir`.
    pub fn open(cache_dir: &Path) -> Self {
        Self::with_store(Arc::new(DiskRecordStore::new(cache_dir)), BlobStore::new(cache_dir))
    }

    /// Builds a cache over an arbitrary record store.
    pub fn with_store(records: Arc<dyn RecordStore>, blobs: BlobStore) -> Self {
        Self { records, blobs }
    }

    /// The content-addressed store outputs are linked from.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Looks up `key`, validating every stored dependency.
    ///
    /// `live` returns the current fingerprint of a manifest path, or `None`
    /// if it cannot be determined (which counts as stale).
    pub fn lookup<F>(&self, key: &CacheKey, mut live: F) -> Lookup
    where
        F: FnMut(&str) -> Option<Fingerprint>,
    {
        let Some(raw_manifest) = self.records.get(&key.dependencies_record()) else {
            return Lookup::Miss(MissReason::NoManifest);
        };
        let Ok(manifest) = DependencyManifest::from_json(&raw_manifest) else {
            return Lookup::Miss(MissReason::CorruptManifest);
        };

        for (path, stored) in manifest.iter() {
            if live(path).as_ref() != Some(stored) {
                return Lookup::Miss(MissReason::StaleDependency(path.to_string()));
            }
        }

        let Some(raw_bundle) = self.records.get(&key.output_record()) else {
            return Lookup::Miss(MissReason::NoOutput);
        };
        let Ok(bundle) = OutputBundle::from_json(&raw_bundle) else {
            return Lookup::Miss(MissReason::CorruptOutput);
        };
        let Ok(outputs) = bundle.decoded_contents() else {
            return Lookup::Miss(MissReason::CorruptOutput);
        };

        Lookup::Hit(CacheHit {
            manifest,
            outputs,
            urls: bundle.urls.into_iter().collect(),
        })
    }

    /// Stores both records for `key`.
    ///
    /// The output bundle is written before the manifest, so a reader racing
    /// this write sees either no manifest (miss) or a complete entry.
    pub fn store(
        &self,
        key: &CacheKey,
        manifest: &DependencyManifest,
        bundle: &OutputBundle,
    ) -> Result<(), CacheError> {
        self.records.set(&key.output_record(), &bundle.to_json()?)?;
        self.records
            .set(&key.dependencies_record(), &manifest.to_json()?)
    }

    /// Removes every stored record.
    ///
    /// Blobs are kept: existing output trees still link into them.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.records.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FileStat;
    use std::collections::HashMap;

    fn fp(n: u64) -> Fingerprint {
        Fingerprint::from_stat(&FileStat {
            size: n,
            mtime_ms: n,
            mode: 0o644,
        })
    }

    fn make_cache() -> (tempfile::TempDir, PersistentCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open(dir.path());
        (dir, cache)
    }

    fn sample_entry() -> (DependencyManifest, OutputBundle) {
        let mut manifest = DependencyManifest::new();
        manifest.push("a.scss", fp(1));
        manifest.push("_b.scss", fp(2));
        let mut bundle = OutputBundle::new();
        bundle.add_content("a.css", b"A{}");
        bundle.add_url("/assets/logo.png", "/work/logo.png");
        (manifest, bundle)
    }

    fn live_from(pairs: &[(&str, Fingerprint)]) -> impl FnMut(&str) -> Option<Fingerprint> {
        let map: HashMap<String, Fingerprint> = pairs
            .iter()
            .map(|(p, f)| (p.to_string(), f.clone()))
            .collect();
        move |path| map.get(path).cloned()
    }

    #[test]
    fn empty_cache_misses() {
        let (_dir, cache) = make_cache();
        let key = CacheKey::new("a.scss", &fp(1), None);
        assert!(matches!(
            cache.lookup(&key, |_| None),
            Lookup::Miss(MissReason::NoManifest)
        ));
    }

    #[test]
    fn store_then_hit() {
        let (_dir, cache) = make_cache();
        let key = CacheKey::new("a.scss", &fp(1), None);
        let (manifest, bundle) = sample_entry();
        cache.store(&key, &manifest, &bundle).unwrap();

        match cache.lookup(&key, live_from(&[("a.scss", fp(1)), ("_b.scss", fp(2))])) {
            Lookup::Hit(hit) => {
                assert_eq!(hit.manifest, manifest);
                assert_eq!(hit.outputs, vec![("a.css".to_string(), b"A{}".to_vec())]);
                assert_eq!(
                    hit.urls,
                    vec![("/assets/logo.png".to_string(), "/work/logo.png".to_string())]
                );
            }
            Lookup::Miss(reason) => panic!("expected hit, got {reason:?}"),
        }
    }

    #[test]
    fn changed_dependency_misses() {
        let (_dir, cache) = make_cache();
        let key = CacheKey::new("a.scss", &fp(1), None);
        let (manifest, bundle) = sample_entry();
        cache.store(&key, &manifest, &bundle).unwrap();

        let lookup = cache.lookup(&key, live_from(&[("a.scss", fp(1)), ("_b.scss", fp(9))]));
        assert!(matches!(
            lookup,
            Lookup::Miss(MissReason::StaleDependency(ref p)) if p == "_b.scss"
        ));
    }

    #[test]
    fn unknown_live_fingerprint_misses() {
        let (_dir, cache) = make_cache();
        let key = CacheKey::new("a.scss", &fp(1), None);
        let (manifest, bundle) = sample_entry();
        cache.store(&key, &manifest, &bundle).unwrap();
        assert!(matches!(
            cache.lookup(&key, live_from(&[("a.scss", fp(1))])),
            Lookup::Miss(MissReason::StaleDependency(_))
        ));
    }

    #[test]
    fn missing_output_record_misses() {
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(DiskRecordStore::new(dir.path()));
        let cache = PersistentCache::with_store(records.clone(), BlobStore::new(dir.path()));
        let key = CacheKey::new("a.scss", &fp(1), None);
        let (manifest, _) = sample_entry();
        records
            .set(&key.dependencies_record(), &manifest.to_json().unwrap())
            .unwrap();

        assert!(matches!(
            cache.lookup(&key, live_from(&[("a.scss", fp(1)), ("_b.scss", fp(2))])),
            Lookup::Miss(MissReason::NoOutput)
        ));
    }

    #[test]
    fn corrupt_records_miss() {
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(DiskRecordStore::new(dir.path()));
        let cache = PersistentCache::with_store(records.clone(), BlobStore::new(dir.path()));
        let key = CacheKey::new("a.scss", &fp(1), None);

        records.set(&key.dependencies_record(), "not json").unwrap();
        assert!(matches!(
            cache.lookup(&key, |_| None),
            Lookup::Miss(MissReason::CorruptManifest)
        ));

        records.set(&key.dependencies_record(), "[]").unwrap();
        records
            .set(&key.output_record(), r#"{"contents":{"a.css":"%%"}}"#)
            .unwrap();
        assert!(matches!(
            cache.lookup(&key, |_| None),
            Lookup::Miss(MissReason::CorruptOutput)
        ));
    }

    #[test]
    fn clear_forgets_records() {
        let (_dir, cache) = make_cache();
        let key = CacheKey::new("a.scss", &fp(1), None);
        let (manifest, bundle) = sample_entry();
        cache.store(&key, &manifest, &bundle).unwrap();
        cache.clear().unwrap();
        assert!(matches!(
            cache.lookup(&key, live_from(&[("a.scss", fp(1)), ("_b.scss", fp(2))])),
            Lookup::Miss(MissReason::NoManifest)
        ));
    }

    #[test]
    fn two_handles_share_one_directory() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PersistentCache::open(dir.path());
        let reader = PersistentCache::open(dir.path());
        let key = CacheKey::new("a.scss", &fp(1), Some("opts"));
        let (manifest, bundle) = sample_entry();
        writer.store(&key, &manifest, &bundle).unwrap();
        assert!(matches!(
            reader.lookup(&key, live_from(&[("a.scss", fp(1)), ("_b.scss", fp(2))])),
            Lookup::Hit(_)
        ));
    }
}

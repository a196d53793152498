//! Change fingerprints and the durable cross-process build cache.
//!
//! Change detection is metadata-only: a [`Fingerprint`] is derived from size,
//! modification time and permission mode, never from file contents. The
//! [`PersistentCache`] stores, per [`CacheKey`], a dependency manifest and an
//! output bundle as integrity-checked records, and restores outputs as links
//! into a content-addressed [`BlobStore`].

#![warn(missing_docs)]

pub mod blob;
pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod key;
pub mod manifest;
pub mod record;

pub use blob::BlobStore;
pub use cache::{CacheHit, Lookup, MissReason, PersistentCache};
pub use error::CacheError;
pub use fingerprint::{FileStat, Fingerprint, FingerprintSession};
pub use key::{CacheKey, CACHE_KEY_VERSION};
pub use manifest::{DependencyManifest, OutputBundle};
pub use record::{DiskRecordStore, RecordStore};

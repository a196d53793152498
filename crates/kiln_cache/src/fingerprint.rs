//! Metadata-only change fingerprints and the per-build stat cache.
//!
//! A fingerprint is `size:mtime_ms:mode`. Contents are never read, so a
//! fingerprint is cheap enough to compute for every dependency of every
//! source on every build. A path that does not exist fingerprints to the
//! `0:0:0` sentinel, which makes "dependency vanished" look exactly like
//! "dependency changed".

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The metadata a fingerprint and a tree entry are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStat {
    /// File size in bytes.
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ms: u64,
    /// Permission mode bits (file type bits included on Unix).
    pub mode: u32,
}

impl FileStat {
    /// Stats `path`, following symlinks.
    ///
    /// Returns `Ok(None)` when the path does not exist; any other failure
    /// is returned as an error.
    pub fn read(path: &Path) -> io::Result<Option<Self>> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(Some(Self::from_metadata(&meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            size: meta.len(),
            mtime_ms,
            mode: mode_bits(meta),
        }
    }
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// A change fingerprint for one file at one point in time.
///
/// Equality of fingerprints is the only change-detection signal the engine uses.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Rendering used for files that cannot be stat'ed.
    pub const SENTINEL: &'static str = "0:0:0";

    /// Builds the fingerprint for a known stat.
    pub fn from_stat(stat: &FileStat) -> Self {
        Self(format!("{}:{}:{}", stat.size, stat.mtime_ms, stat.mode))
    }

    /// The fingerprint of a file that does not exist.
    pub fn missing() -> Self {
        Self(Self::SENTINEL.to_string())
    }

    /// Returns `true` for the missing-file sentinel.
    pub fn is_missing(&self) -> bool {
        self.0 == Self::SENTINEL
    }

    /// Returns the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

/// Build-scoped cache of stat results.
///
/// One session lives for exactly one build; every worker of that build shares
/// it, so a dependency common to many sources is stat'ed once. Results are
/// never carried into the next build.
#[derive(Debug, Default)]
pub struct FingerprintSession {
    stats: Mutex<HashMap<PathBuf, Option<FileStat>>>,
}

impl FingerprintSession {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the (cached) stat of `path`, `None` if it does not exist.
    pub fn stat(&self, path: &Path) -> Result<Option<FileStat>, CacheError> {
        if let Some(cached) = self.lock().get(path) {
            return Ok(*cached);
        }
        let stat = FileStat::read(path).map_err(|e| CacheError::io(path, e))?;
        self.lock().insert(path.to_path_buf(), stat);
        Ok(stat)
    }

    /// Returns the (cached) fingerprint of `path`.
    ///
    /// A missing file yields [`Fingerprint::missing`] rather than an error.
    pub fn fingerprint(&self, path: &Path) -> Result<Fingerprint, CacheError> {
        Ok(match self.stat(path)? {
            Some(stat) => Fingerprint::from_stat(&stat),
            None => Fingerprint::missing(),
        })
    }

    /// Number of distinct paths stat'ed so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing has been stat'ed yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Option<FileStat>>> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

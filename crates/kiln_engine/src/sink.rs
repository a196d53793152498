//! Request-scoped capture of dependency and additional-output notifications.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use kiln_cache::{BlobStore, CacheError};

use crate::ledger::{Dependency, LedgerEntry};

/// Notification channel handed to exactly one render call.
///
/// Everything reported here belongs to the source file being rendered and
/// nothing else, so concurrent renders never see each other's findings. The
/// engine folds the capture into the build ledger once the render settles.
pub struct JobSink {
    output_root: PathBuf,
    blobs: BlobStore,
    capture: Mutex<LedgerEntry>,
}

impl JobSink {
    pub(crate) fn new(output_root: PathBuf, blobs: BlobStore) -> Self {
        Self {
            output_root,
            blobs,
            capture: Mutex::new(LedgerEntry::default()),
        }
    }

    /// Root all relative output paths resolve against.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Reports a file the render read.
    pub fn dependency(&self, path: impl Into<PathBuf>) {
        self.lock()
            .dependencies
            .insert(Dependency::File(path.into()));
    }

    /// Reports a synthetic dependency with no file behind it.
    pub fn virtual_dependency(&self, id: impl Into<String>) {
        self.lock()
            .dependencies
            .insert(Dependency::Virtual(id.into()));
    }

    /// Reports an output produced besides the primary one.
    ///
    /// When both `public_path` and `source` are given the output is also an
    /// external output: restorable from `source` and reachable at
    /// `public_path`, and reported through `cached_asset` on a cache hit.
    pub fn additional_output(
        &self,
        path: impl AsRef<Path>,
        public_path: Option<&str>,
        source: Option<&Path>,
    ) {
        let absolute = self.resolve(path.as_ref());
        let mut capture = self.lock();
        capture.outputs.insert(absolute);
        if let (Some(public_path), Some(source)) = (public_path, source) {
            capture
                .external
                .insert(public_path.to_string(), source.to_path_buf());
        }
    }

    /// Writes an additional output through the blob store and reports it.
    pub fn write_output(&self, path: impl AsRef<Path>, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let absolute = self.resolve(path.as_ref());
        self.blobs.link_output(&absolute, bytes)?;
        self.lock().outputs.insert(absolute.clone());
        Ok(absolute)
    }

    pub(crate) fn finish(self) -> LedgerEntry {
        self.capture.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_root.join(path)
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerEntry> {
        self.capture.lock().unwrap_or_else(|e| e.into_inner())
    }
}

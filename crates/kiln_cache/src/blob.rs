//! Content-addressed storage for output bytes.
//!
//! Output bytes are stored once under a path derived from their hash; the
//! visible output file is a symbolic link to that blob. Identical outputs of
//! independent builders therefore share storage, and restoring a cached
//! output costs one link rather than a copy.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_common::ContentHash;

use crate::error::CacheError;

/// Subdirectory holding blobs.
const BLOBS_SUBDIR: &str = "blobs";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Content-addressed blob store rooted in the cache directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Creates a blob store rooted at the given cache directory.
    ///
    /// A relative directory is resolved against the current directory, since
    /// links to blobs must be valid from anywhere in the output tree.
    pub fn new(cache_dir: &Path) -> Self {
        let cache_dir = if cache_dir.is_relative() {
            std::env::current_dir()
                .map(|cwd| cwd.join(cache_dir))
                .unwrap_or_else(|_| cache_dir.to_path_buf())
        } else {
            cache_dir.to_path_buf()
        };
        Self {
            dir: cache_dir.join(BLOBS_SUBDIR),
        }
    }

    /// Returns the directory all blobs live under.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the physical location of the blob with the given hash.
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_hex();
        self.dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Stores `bytes` and returns the blob path.
    ///
    /// Storing bytes that are already present is a no-op.
    pub fn put(&self, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let path = self.blob_path(&ContentHash::from_bytes(bytes));
        if path.is_file() {
            return Ok(path);
        }
        let parent = path.parent().unwrap_or(&self.dir);
        std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;

        let tmp = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp, bytes).map_err(|e| CacheError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            CacheError::io(&path, e)
        })?;
        Ok(path)
    }

    /// Writes `bytes` as the output at `output`.
    ///
    /// The bytes go to the blob store and `output` becomes a link to the
    /// blob. Whatever previously existed at `output` is removed first, so a
    /// stale link is never written through.
    pub fn link_output(&self, output: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let blob = self.put(bytes)?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }
        // Two sources may claim the same output; the retry covers a link
        // created by the other one between our remove and link.
        let mut attempts = 0;
        loop {
            match std::fs::remove_file(output) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(output, e)),
            }
            match link(&blob, output) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempts < 3 => {
                    attempts += 1;
                }
                Err(e) => return Err(CacheError::io(output, e)),
            }
        }
    }
}

#[cfg(unix)]
fn link(blob: &Path, output: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(blob, output)
}

#[cfg(not(unix))]
fn link(blob: &Path, output: &Path) -> std::io::Result<()> {
    std::fs::copy(blob, output).map(|_| ())
}

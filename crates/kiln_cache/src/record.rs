//! Durable string-keyed record storage.
//!
//! Each record is a file holding a small binary header (magic bytes, format
//! version, the record key, and a checksum of the payload) followed by the
//! UTF-8 payload. Files are written to a unique temporary name and renamed
//! into place, so readers never observe a half-written record from this
//! process, and anything torn or foreign still fails header validation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes identifying a kiln record file.
const RECORD_MAGIC: [u8; 4] = *b"KILN";

/// Current record format version. Increment on breaking changes to the
/// header or payload format; older records then read as misses.
const RECORD_FORMAT_VERSION: u32 = 1;

/// Subdirectory holding record files.
const RECORDS_SUBDIR: &str = "records";

/// File extension of record files.
const RECORD_EXT: &str = "rec";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A string-keyed store of string records.
///
/// `get` is fail-safe: a missing, torn or foreign record is `None`. The
/// engine only needs these three operations, which keeps an alternative
/// (remote, in-memory, asynchronous-backed) store a drop-in replacement.
pub trait RecordStore: Send + Sync {
    /// Reads the record stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Writes `value` under `key`, replacing any previous record.
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Removes every record.
    fn clear(&self) -> Result<(), CacheError>;
}

/// Header prepended to every record file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordHeader {
    magic: [u8; 4],
    format_version: u32,
    key: String,
    checksum: ContentHash,
}

/// [`RecordStore`] backed by one file per record under `<dir>/records/`.
#[derive(Debug, Clone)]
pub struct DiskRecordStore {
    dir: PathBuf,
}

impl DiskRecordStore {
    /// Creates a store rooted at the given cache directory.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            dir: cache_dir.join(RECORDS_SUBDIR),
        }
    }

    /// Returns the file that holds the record for `key`.
    pub fn record_path(&self, key: &str) -> PathBuf {
        let name = ContentHash::from_str_content(key);
        self.dir.join(format!("{name}.{RECORD_EXT}"))
    }

    fn encode(key: &str, value: &str) -> Result<Vec<u8>, CacheError> {
        let header = RecordHeader {
            magic: RECORD_MAGIC,
            format_version: RECORD_FORMAT_VERSION,
            key: key.to_string(),
            checksum: ContentHash::from_str_content(value),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        // 4-byte header length (little-endian) + header + payload
        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + value.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(value.as_bytes());
        Ok(output)
    }

    fn decode(path: &Path, key: &str, raw: &[u8]) -> Result<String, CacheError> {
        let invalid = |reason: &str| CacheError::InvalidHeader {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if raw.len() < 4 {
            return Err(invalid("truncated header length"));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&raw[..4]);
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        if raw.len() < 4 + header_len {
            return Err(invalid("truncated header"));
        }

        let (header, _): (RecordHeader, usize) = bincode::serde::decode_from_slice(
            &raw[4..4 + header_len],
            bincode::config::standard(),
        )
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

        if header.magic != RECORD_MAGIC {
            return Err(invalid("missing magic bytes"));
        }
        if header.format_version != RECORD_FORMAT_VERSION {
            return Err(invalid("unsupported format version"));
        }
        if header.key != key {
            return Err(invalid("record belongs to a different key"));
        }

        let payload = std::str::from_utf8(&raw[4 + header_len..]).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;
        if ContentHash::from_str_content(payload) != header.checksum {
            return Err(invalid("checksum mismatch"));
        }
        Ok(payload.to_string())
    }
}

impl RecordStore for DiskRecordStore {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.record_path(key);
        let raw = std::fs::read(&path).ok()?;
        match Self::decode(&path, key, &raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(key, error = %e, "discarding unreadable cache record");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let path = self.record_path(key);
        let bytes = Self::encode(key, value)?;

        let tmp = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp, &bytes).map_err(|e| CacheError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            CacheError::io(&path, e)
        })
    }

    fn clear(&self) -> Result<(), CacheError> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&self.dir, e)),
        }
    }
}

//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Reads are fail-safe and report problems as misses; this enum surfaces
/// from writes, from blob linking, and from fingerprinting a path whose
/// metadata cannot be read for a reason other than it being absent.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A record file has an invalid or missing header.
    #[error("invalid record header in {path}: {reason}")]
    InvalidHeader {
        /// The record file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A stored output could not be decoded back into bytes.
    #[error("corrupt output entry '{output}': {reason}")]
    CorruptOutput {
        /// Relative output path of the entry.
        output: String,
        /// Description of the decode failure.
        reason: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::io(
            "/tmp/kiln-cache/records/ab.rec",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("ab.rec"));
    }

    #[test]
    fn invalid_header_display() {
        let err = CacheError::InvalidHeader {
            path: PathBuf::from("bad.rec"),
            reason: "missing magic bytes".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("invalid record header"));
        assert!(msg.contains("missing magic bytes"));
    }

    #[test]
    fn corrupt_output_display() {
        let err = CacheError::CorruptOutput {
            output: "a.css".to_string(),
            reason: "invalid base64".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt output entry 'a.css': invalid base64"
        );
    }

    #[test]
    fn serialization_error_display() {
        let err = CacheError::Serialization {
            reason: "invalid bincode data".to_string(),
        };
        assert!(err.to_string().contains("invalid bincode data"));
    }
}

//! Error types for builds and transformations.

use std::path::{Path, PathBuf};

use kiln_cache::CacheError;

/// A failure reported by the transformation for one compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransformError {
    /// Human-readable description of the failure.
    pub message: String,
    /// File the failure points into, when it is not the source itself.
    pub file: Option<PathBuf>,
    /// 1-based line, if known.
    pub line: Option<u32>,
    /// 1-based column, if known.
    pub column: Option<u32>,
}

impl TransformError {
    /// Creates an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
            column: None,
        }
    }

    /// Attaches a line/column position.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Attaches the file the position refers to.
    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl From<CacheError> for TransformError {
    fn from(err: CacheError) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors that abort a build.
///
/// Any of these leaves the engine fully reset: empty ledger, empty output
/// directory. The next build starts from a clean baseline.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The transformation failed for one file; the whole batch is failed.
    #[error("failed to compile {}{}: {message}", .file.display(), location(.origin, .line, .column))]
    Transform {
        /// The relative source whose build failed.
        file: PathBuf,
        /// File the error points into, when it is not `file` itself.
        origin: Option<PathBuf>,
        /// 1-based line, if known.
        line: Option<u32>,
        /// 1-based column, if known.
        column: Option<u32>,
        /// The underlying message.
        message: String,
    },

    /// A filesystem operation outside the cache failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A cache write, blob link, or fingerprint stat failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The input tree could not be walked.
    #[error("failed to walk input tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// The input root does not exist or is not a directory.
    #[error("invalid input root {}: not a directory", .0.display())]
    InvalidRoot(PathBuf),

    /// The output root is the input root or one of its ancestors.
    #[error("output root {} must not contain input root {}", .output.display(), .input.display())]
    OverlappingRoots {
        /// The canonical input root.
        input: PathBuf,
        /// The canonical output root.
        output: PathBuf,
    },

    /// The engine configuration could not be turned into a cache digest.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// A worker task panicked or was cancelled.
    #[error("build job panicked: {0}")]
    JobPanicked(#[from] tokio::task::JoinError),
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transform(source: &Path, error: TransformError) -> Self {
        Self::Transform {
            file: source.to_path_buf(),
            origin: error.file.filter(|file| file != source),
            line: error.line,
            column: error.column,
            message: error.message,
        }
    }
}

fn location(origin: &Option<PathBuf>, line: &Option<u32>, column: &Option<u32>) -> String {
    let position = match (line, column) {
        (Some(line), Some(column)) => format!(":{line}:{column}"),
        (Some(line), None) => format!(":{line}"),
        _ => String::new(),
    };
    match origin {
        Some(origin) => format!(" ({}{position})", origin.display()),
        None => position,
    }
}

//! The transformation contract the engine drives.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kiln_config::CompileOptions;

use crate::error::TransformError;
use crate::sink::JobSink;

/// Everything known about one compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDetails {
    pub source_root: PathBuf,
    pub relative_source: PathBuf,
    pub absolute_source: PathBuf,
    pub output_root: PathBuf,
    pub relative_output: PathBuf,
    pub absolute_output: PathBuf,
    /// Options resolved for this unit.
    pub options: CompileOptions,
}

/// Result of one successful render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    /// Bytes of the primary output.
    pub bytes: Vec<u8>,
    /// Every file the render read, the source itself included.
    pub read_files: Vec<PathBuf>,
}

impl Rendered {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            read_files: Vec::new(),
        }
    }

    pub fn with_read_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.read_files.push(path.into());
        self
    }
}

/// A source-to-output transformation.
///
/// The engine calls [`plan_outputs`](Transform::plan_outputs) once per source
/// file to learn its compilation units, then awaits
/// [`render`](Transform::render) once per unit. Renders of different files
/// run concurrently; each gets its own [`JobSink`].
#[async_trait]
pub trait Transform: Send + Sync {
    /// Registers the compilation units of one source file.
    ///
    /// `emit` may be called zero or more times, each call producing one
    /// independent output with its own options. Units render in emit order.
    /// The default emits the default output with unchanged options.
    fn plan_outputs(
        &self,
        relative_source: &Path,
        default_output: &Path,
        options: &CompileOptions,
        emit: &mut dyn FnMut(PathBuf, CompileOptions),
    ) {
        let _ = relative_source;
        emit(default_output.to_path_buf(), options.clone());
    }

    /// Extra identity mixed into every cache key, e.g. the version of the
    /// underlying compiler.
    fn cache_digest(&self) -> Option<String> {
        None
    }

    /// Renders one compilation unit.
    async fn render(
        &self,
        details: &CompileDetails,
        sink: &JobSink,
    ) -> Result<Rendered, TransformError>;
}

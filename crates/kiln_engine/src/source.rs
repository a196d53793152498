//! Entry-point discovery in the input tree.

use std::path::{Path, PathBuf};

use kiln_config::EngineConfig;
use walkdir::WalkDir;

use crate::error::BuildError;

/// One entry-point source file of a build.
///
/// Identity is the relative path, which stays stable across builds of the
/// same input tree even if the tree is moved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceFile {
    /// Path relative to the input root.
    pub relative: PathBuf,
    /// Absolute path on disk.
    pub absolute: PathBuf,
}

impl SourceFile {
    /// Creates a source file from the input root and a relative path.
    pub fn new(root: &Path, relative: impl Into<PathBuf>) -> Self {
        let relative = relative.into();
        Self {
            absolute: root.join(&relative),
            relative,
        }
    }
}

/// Walks `root` and returns every entry point, sorted by relative path.
///
/// A file is an entry point when its extension is one of the configured
/// source extensions and, if partials are skipped, its name does not start
/// with `_`. Anything under `exclude` (typically an output root nested in
/// the input root) is ignored.
pub fn discover_sources(
    root: &Path,
    config: &EngineConfig,
    exclude: Option<&Path>,
) -> Result<Vec<SourceFile>, BuildError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| exclude.map_or(true, |ex| !entry.path().starts_with(ex)));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_entry_point(entry.path(), config) {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(SourceFile::new(root, relative));
        }
    }
    files.sort();
    Ok(files)
}

fn is_entry_point(path: &Path, config: &EngineConfig) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !config.is_source_extension(ext) {
        return false;
    }
    let partial = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'));
    !(config.engine.skip_partials && partial)
}

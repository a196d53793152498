//! Path normalization shared by the ledger, the cache, and the engine.
//!
//! Build state is keyed by paths relative to the input root so that it stays
//! valid when the input root is relocated between builds. Paths outside the
//! root cannot be made relative and are kept absolute.

use std::path::{Path, PathBuf};

/// Normalizes `path` into a ledger key relative to `root`.
///
/// Absolute paths inside `root` are stripped to their relative form, absolute
/// paths outside `root` are returned unchanged, and relative paths are assumed
/// to already be relative to `root`.
pub fn normalize_key(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        match path.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}

/// Renders a path with `/` separators, the form used inside persisted records.
pub fn to_slash(path: &Path) -> String {
    let mut out = String::new();
    for (i, component) in path.components().enumerate() {
        let part = component.as_os_str().to_string_lossy();
        if i > 0 && !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(&part);
    }
    out
}

/// Replaces the extension of `path` with `ext` (no leading dot).
pub fn replace_extension(path: &Path, ext: &str) -> PathBuf {
    path.with_extension(ext)
}

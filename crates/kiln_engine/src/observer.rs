//! Build lifecycle notifications.

use std::path::Path;

use crate::error::TransformError;
use crate::transform::{CompileDetails, Rendered};

/// Receives lifecycle notifications of a build.
///
/// Every method defaults to doing nothing. Calls for different files may
/// arrive concurrently from different workers.
pub trait BuildObserver: Send + Sync {
    /// A unit is about to render. Per-build state can be primed here.
    fn compiling(&self, details: &CompileDetails) {
        let _ = details;
    }

    /// A unit rendered successfully.
    fn compiled(&self, details: &CompileDetails, rendered: &Rendered) {
        let _ = (details, rendered);
    }

    /// A unit failed; the build will fail with it.
    fn failed(&self, details: &CompileDetails, error: &TransformError) {
        let _ = (details, error);
    }

    /// A cache hit references an external asset that should be restored
    /// from `source` and served at `public_path`.
    fn cached_asset(&self, source: &Path, public_path: &str) {
        let _ = (source, public_path);
    }

    /// An output of a removed source lies outside the output root and was
    /// left in place.
    fn stale_external_output(&self, path: &Path) {
        let _ = path;
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BuildObserver for NoopObserver {}

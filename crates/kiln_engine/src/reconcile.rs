//! Deletion of outputs no surviving source claims.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::ledger::Ledger;
use crate::observer::BuildObserver;

/// What reconciling removed sources did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Outputs deleted from the output root.
    pub deleted: Vec<PathBuf>,
    /// Orphaned outputs outside the output root, left for their owner.
    pub stale_external: Vec<PathBuf>,
}

/// Deletes the outputs owned only by `removed` and forgets those sources.
///
/// Outputs shared with a surviving source are kept. Orphans outside
/// `output_root` are never touched; `observer` hears about each one.
pub fn reconcile(
    ledger: &mut Ledger,
    removed: &[PathBuf],
    output_root: &Path,
    observer: &dyn BuildObserver,
) -> Result<Reconciliation, BuildError> {
    let mut outcome = Reconciliation::default();
    if removed.is_empty() {
        return Ok(outcome);
    }

    for output in ledger.outputs_owned_only_by(removed) {
        if output.starts_with(output_root) {
            remove_output(&output)?;
            tracing::debug!(output = %output.display(), "deleted orphaned output");
            outcome.deleted.push(output);
        } else {
            tracing::info!(output = %output.display(), "orphaned output outside output root");
            observer.stale_external_output(&output);
            outcome.stale_external.push(output);
        }
    }

    for source in removed {
        ledger.remove_source(source);
    }
    Ok(outcome)
}

/// Removes outputs that `sources` owned exclusively, ahead of re-deriving
/// them. Outputs outside `output_root` are left alone.
pub fn prune_outputs(
    ledger: &Ledger,
    sources: &[PathBuf],
    output_root: &Path,
) -> Result<Vec<PathBuf>, BuildError> {
    let mut pruned = Vec::new();
    for output in ledger.outputs_owned_only_by(sources) {
        if output.starts_with(output_root) {
            remove_output(&output)?;
            pruned.push(output);
        }
    }
    Ok(pruned)
}

fn remove_output(path: &Path) -> Result<(), BuildError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::io(path, e)),
    }
}

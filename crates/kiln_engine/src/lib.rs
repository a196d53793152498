//! Incremental build engine.
//!
//! An [`Engine`] turns an input tree into an output tree through a
//! user-supplied [`Transform`], re-deriving only what changed:
//!
//! 1. The tree of every known input and dependency is snapshotted and diffed
//!    against the previous build.
//! 2. Outputs owned only by removed sources are deleted.
//! 3. Sources with unknown or changed dependencies are scheduled on a
//!    bounded worker pool; each job first consults the persistent cache and
//!    only renders on a miss.
//! 4. The ledger of dependencies and outputs and the tree snapshot are
//!    committed for the next build. A failed build resets both and empties
//!    the output tree.

pub mod concurrency;
pub mod engine;
pub mod error;
mod job;
pub mod ledger;
pub mod observer;
pub mod reconcile;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod transform;
pub mod tree;

pub use async_trait::async_trait;
pub use concurrency::{choose_concurrency, plan_concurrency, ConcurrencyPlan, DEFAULT_IO_THREADS};
pub use engine::{BuildReport, Engine};
pub use error::{BuildError, TransformError};
pub use kiln_config::{CompileOptions, EngineConfig, EnvControls};
pub use ledger::{Dependency, Ledger, LedgerEntry};
pub use observer::{BuildObserver, NoopObserver};
pub use reconcile::Reconciliation;
pub use scheduler::{BatchOutcome, JobState, Scheduler};
pub use sink::JobSink;
pub use source::{discover_sources, SourceFile};
pub use transform::{CompileDetails, Rendered, Transform};
pub use tree::{BuildTree, Operation, OperationKind, TreeEntry};

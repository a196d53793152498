//! The build orchestrator.
//!
//! An [`Engine`] owns the ledger and the tree snapshot of its last
//! successful build. Each call to [`Engine::build`] moves both into a build
//! session, works out what changed, reconciles removed sources, schedules
//! the rest and commits the new state. Any failure resets the engine to an
//! empty ledger and an empty output directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_cache::{BlobStore, FingerprintSession, PersistentCache};
use kiln_common::ContentHash;
use kiln_config::{EngineConfig, EnvControls};

use crate::concurrency::choose_concurrency;
use crate::error::BuildError;
use crate::job::{compile_source, BuildContext};
use crate::ledger::{Dependency, Ledger};
use crate::observer::{BuildObserver, NoopObserver};
use crate::reconcile::{prune_outputs, reconcile};
use crate::scheduler::{JobState, Scheduler};
use crate::source::{discover_sources, SourceFile};
use crate::transform::Transform;
use crate::tree::BuildTree;

/// Summary of one successful build.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Sources whose transformation ran.
    pub compiled: Vec<PathBuf>,
    /// Sources restored from the persistent cache.
    pub restored: Vec<PathBuf>,
    /// Sources skipped because nothing they depend on changed.
    pub unchanged: Vec<PathBuf>,
    /// Sources that disappeared since the previous build.
    pub removed: Vec<PathBuf>,
    /// Outputs deleted because only removed sources claimed them.
    pub deleted_outputs: Vec<PathBuf>,
    /// Total render calls across all compiled sources.
    pub invocations: usize,
    /// Final state of every scheduled source.
    pub states: BTreeMap<PathBuf, JobState>,
    pub elapsed: Duration,
}

/// Incremental builder for one input tree and one output tree.
pub struct Engine {
    input_root: PathBuf,
    output_root: PathBuf,
    config: EngineConfig,
    env: EnvControls,
    transform: Arc<dyn Transform>,
    observer: Arc<dyn BuildObserver>,
    cache: Option<Arc<PersistentCache>>,
    blobs: BlobStore,
    digest: String,
    scheduler: Scheduler,
    ledger: Ledger,
    tree: BuildTree,
}

impl Engine {
    /// Creates an engine.
    ///
    /// `input_root` must be an existing directory; `output_root` is created
    /// if missing and may sit inside the input root, but must not be the
    /// input root or one of its ancestors. Environment controls are taken as given and never read
    /// again.
    pub fn new(
        input_root: impl AsRef<Path>,
        output_root: impl AsRef<Path>,
        config: EngineConfig,
        env: EnvControls,
        transform: Arc<dyn Transform>,
    ) -> Result<Self, BuildError> {
        let input_root = input_root.as_ref();
        let input_root = std::fs::canonicalize(input_root)
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| BuildError::InvalidRoot(input_root.to_path_buf()))?;

        let output_root = output_root.as_ref();
        std::fs::create_dir_all(output_root).map_err(|e| BuildError::io(output_root, e))?;
        let output_root =
            std::fs::canonicalize(output_root).map_err(|e| BuildError::io(output_root, e))?;
        if input_root.starts_with(&output_root) {
            return Err(BuildError::OverlappingRoots {
                input: input_root,
                output: output_root,
            });
        }

        // Cached bundles store output paths, so whatever names outputs is
        // part of the key.
        let digest = ContentHash::of_json(&(
            config.cache.digest.as_deref(),
            transform.cache_digest(),
            &config.options,
            &config.engine.output_extension,
        ))
        .map_err(|e| BuildError::InvalidConfig(e.to_string()))?
        .to_hex();

        let cache_dir = config.cache_dir();
        let cache = env
            .persistence_enabled(config.cache.enabled)
            .then(|| Arc::new(PersistentCache::open(&cache_dir)));
        if cache.is_none() {
            tracing::info!(ci = env.ci, "persistent cache disabled");
        }

        Ok(Self {
            scheduler: Scheduler::new(choose_concurrency(&env).jobs),
            ledger: Ledger::new(&input_root),
            tree: BuildTree::new(),
            blobs: BlobStore::new(&cache_dir),
            input_root,
            output_root,
            config,
            env,
            transform,
            observer: Arc::new(NoopObserver),
            cache,
            digest,
        })
    }

    /// Replaces the lifecycle observer.
    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Overrides the process-wide job count for this engine.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.scheduler = Scheduler::new(jobs);
        self
    }

    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// The ledger of the last successful build.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Whether the persistent cache is in use.
    pub fn persistence_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Builds everything that changed since the last successful build.
    pub async fn build(&mut self) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        match self.run_build().await {
            Ok(mut report) => {
                report.elapsed = started.elapsed();
                tracing::info!(
                    compiled = report.compiled.len(),
                    restored = report.restored.len(),
                    unchanged = report.unchanged.len(),
                    removed = report.removed.len(),
                    invocations = report.invocations,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "build finished"
                );
                Ok(report)
            }
            Err(error) => {
                tracing::warn!(%error, "build failed, resetting state");
                self.reset();
                Err(error)
            }
        }
    }

    async fn run_build(&mut self) -> Result<BuildReport, BuildError> {
        if self.env.clear_cache {
            if let Some(cache) = &self.cache {
                if let Err(error) = cache.clear() {
                    tracing::warn!(%error, "failed to clear persistent cache");
                }
            }
        }

        let session = Arc::new(FingerprintSession::new());
        let sources = discover_sources(
            &self.input_root,
            &self.config,
            Some(self.output_root.as_path()),
        )?;
        let mut ledger = std::mem::replace(&mut self.ledger, Ledger::new(&self.input_root));
        let previous_tree = std::mem::take(&mut self.tree);

        let known = known_files(&ledger, &sources);
        let current_tree = BuildTree::snapshot(&known, &session)?;
        let changed: BTreeSet<PathBuf> = previous_tree
            .diff(&current_tree)
            .into_iter()
            .map(|op| op.path)
            .collect();

        let mut report = BuildReport::default();

        let current: BTreeSet<PathBuf> = sources.iter().map(|s| s.relative.clone()).collect();
        report.removed = ledger
            .sources()
            .into_iter()
            .filter(|source| !current.contains(source))
            .collect();
        let reconciliation =
            reconcile(&mut ledger, &report.removed, &self.output_root, self.observer.as_ref())?;
        report.deleted_outputs = reconciliation.deleted;

        let (stale, unchanged): (Vec<SourceFile>, Vec<SourceFile>) = sources
            .into_iter()
            .partition(|source| needs_build(&ledger, source, &changed));
        report.unchanged = unchanged.into_iter().map(|s| s.relative).collect();

        let stale_keys: Vec<PathBuf> = stale.iter().map(|s| s.relative.clone()).collect();
        prune_outputs(&ledger, &stale_keys, &self.output_root)?;
        for key in &stale_keys {
            ledger.remove_source(key);
        }

        let ctx = Arc::new(BuildContext {
            input_root: self.input_root.clone(),
            output_root: self.output_root.clone(),
            output_extension: self.config.engine.output_extension.clone(),
            options: self.config.options.clone(),
            digest: self.digest.clone(),
            transform: Arc::clone(&self.transform),
            observer: Arc::clone(&self.observer),
            cache: self.cache.clone(),
            blobs: self.blobs.clone(),
            session: Arc::clone(&session),
        });
        let outcome = self
            .scheduler
            .run(stale, move |file| compile_source(Arc::clone(&ctx), file))
            .await;
        report.states = outcome.states;

        for done in outcome.result? {
            report.invocations += done.invocations;
            if done.restored {
                report.restored.push(done.source.relative.clone());
            } else {
                report.compiled.push(done.source.relative.clone());
            }
            ledger.insert_entry(&done.source.relative, done.entry);
        }
        report.compiled.sort();
        report.restored.sort();

        let tracked: BTreeSet<PathBuf> = ledger
            .dependency_files()
            .into_iter()
            .chain(current.iter().map(|rel| self.input_root.join(rel)))
            .collect();
        self.tree = BuildTree::snapshot(&tracked, &session)?;
        self.ledger = ledger;
        Ok(report)
    }

    /// Forgets all state and empties the output directory.
    fn reset(&mut self) {
        self.ledger.clear();
        self.tree = BuildTree::new();
        match std::fs::remove_dir_all(&self.output_root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                tracing::warn!(output = %self.output_root.display(), %error, "failed to clear output directory");
            }
        }
        if let Err(error) = std::fs::create_dir_all(&self.output_root) {
            tracing::warn!(output = %self.output_root.display(), %error, "failed to recreate output directory");
        }
    }
}

fn known_files(ledger: &Ledger, sources: &[SourceFile]) -> BTreeSet<PathBuf> {
    let mut known = ledger.dependency_files();
    known.extend(sources.iter().map(|s| s.absolute.clone()));
    known
}

/// A source is rebuilt unless the ledger knows its dependencies and none of
/// them changed.
fn needs_build(ledger: &Ledger, source: &SourceFile, changed: &BTreeSet<PathBuf>) -> bool {
    let Some(dependencies) = ledger.dependencies_of(&source.relative) else {
        return true;
    };
    dependencies.iter().any(|dep| match dep {
        Dependency::File(path) => changed.contains(&ledger.absolute(path)),
        Dependency::Virtual(_) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::sink::JobSink;
    use crate::transform::{CompileDetails, Rendered};
    use async_trait::async_trait;

    struct Passthrough;

    #[async_trait]
    impl Transform for Passthrough {
        async fn render(
            &self,
            details: &CompileDetails,
            _sink: &JobSink,
        ) -> Result<Rendered, TransformError> {
            let bytes = std::fs::read(&details.absolute_source)
                .map_err(|e| TransformError::new(e.to_string()))?;
            Ok(Rendered::new(bytes))
        }
    }

    fn config(cache_dir: &Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.cache.dir = Some(cache_dir.to_path_buf());
        config
    }

    #[test]
    fn missing_input_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = Engine::new(
            dir.path().join("nope"),
            dir.path().join("out"),
            config(&dir.path().join("cache")),
            EnvControls::default(),
            Arc::new(Passthrough),
        );
        assert!(matches!(result, Err(BuildError::InvalidRoot(_))));
    }

    #[test]
    fn output_root_must_not_contain_input_root() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        let make = |output: &Path| {
            Engine::new(
                &src,
                output,
                config(&dir.path().join("cache")),
                EnvControls::default(),
                Arc::new(Passthrough),
            )
        };

        assert!(matches!(make(&src), Err(BuildError::OverlappingRoots { .. })));
        assert!(matches!(make(dir.path()), Err(BuildError::OverlappingRoots { .. })));
        assert!(src.is_dir());
        assert!(make(&src.join("out")).is_ok());
        assert!(make(&dir.path().join("out")).is_ok());
    }

    #[test]
    fn ci_disables_persistence_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let make = |env: EnvControls| {
            Engine::new(
                dir.path().join("src"),
                dir.path().join("out"),
                config(&dir.path().join("cache")),
                env,
                Arc::new(Passthrough),
            )
            .unwrap()
        };

        let ci = EnvControls {
            ci: true,
            ..EnvControls::default()
        };
        assert!(!make(ci.clone()).persistence_enabled());
        assert!(make(EnvControls {
            force_persistence_in_ci: true,
            ..ci
        })
        .persistence_enabled());
        assert!(make(EnvControls::default()).persistence_enabled());
    }

    #[tokio::test]
    async fn builds_and_tracks_sources() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.scss"), "a{}").unwrap();

        let mut engine = Engine::new(
            &src,
            dir.path().join("out"),
            config(&dir.path().join("cache")),
            EnvControls::default(),
            Arc::new(Passthrough),
        )
        .unwrap();

        let report = engine.build().await.unwrap();
        assert_eq!(report.compiled, vec![PathBuf::from("a.scss")]);
        assert_eq!(report.states[Path::new("a.scss")], JobState::Compiled);
        assert!(engine.ledger().dependencies_of(Path::new("a.scss")).is_some());
        assert_eq!(
            std::fs::read_to_string(engine.output_root().join("a.css")).unwrap(),
            "a{}"
        );

        let report = engine.build().await.unwrap();
        assert_eq!(report.invocations, 0);
        assert_eq!(report.unchanged, vec![PathBuf::from("a.scss")]);
    }

    #[test]
    fn unknown_sources_always_build() {
        let ledger = Ledger::new("/src");
        let file = SourceFile::new(Path::new("/src"), "a.scss");
        assert!(needs_build(&ledger, &file, &BTreeSet::new()));
    }

    #[test]
    fn virtual_dependencies_never_trigger_builds() {
        let mut ledger = Ledger::new("/src");
        ledger.add_dependency(Path::new("a.scss"), Dependency::Virtual("x".into()));
        ledger.add_dependency(Path::new("a.scss"), Dependency::File("/src/a.scss".into()));
        let file = SourceFile::new(Path::new("/src"), "a.scss");

        assert!(!needs_build(&ledger, &file, &BTreeSet::new()));
        let changed: BTreeSet<PathBuf> = [PathBuf::from("/src/a.scss")].into();
        assert!(needs_build(&ledger, &file, &changed));
    }
}

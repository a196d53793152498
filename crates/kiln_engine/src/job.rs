//! One source file's trip through the persistent cache and the transform.

use std::path::PathBuf;
use std::sync::Arc;

use kiln_cache::{
    BlobStore, CacheHit, CacheKey, DependencyManifest, Fingerprint, FingerprintSession, Lookup,
    OutputBundle, PersistentCache,
};
use kiln_common::{normalize_key, replace_extension, to_slash};
use kiln_config::CompileOptions;

use crate::error::BuildError;
use crate::ledger::{Dependency, LedgerEntry};
use crate::observer::BuildObserver;
use crate::sink::JobSink;
use crate::source::SourceFile;
use crate::transform::{CompileDetails, Transform};

/// Read-only state shared by every job of one build.
pub(crate) struct BuildContext {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub output_extension: String,
    pub options: CompileOptions,
    pub digest: String,
    pub transform: Arc<dyn Transform>,
    pub observer: Arc<dyn BuildObserver>,
    pub cache: Option<Arc<PersistentCache>>,
    pub blobs: BlobStore,
    pub session: Arc<FingerprintSession>,
}

/// What one job found out; merged into the ledger by the engine.
#[derive(Debug)]
pub(crate) struct SourceOutcome {
    pub source: SourceFile,
    pub entry: LedgerEntry,
    pub restored: bool,
    pub invocations: usize,
}

/// Restores `file` from the persistent cache or renders it.
pub(crate) async fn compile_source(
    ctx: Arc<BuildContext>,
    file: SourceFile,
) -> Result<SourceOutcome, BuildError> {
    let key = match &ctx.cache {
        Some(cache) => {
            let fingerprint = ctx.session.fingerprint(&file.absolute)?;
            let key = CacheKey::new(&to_slash(&file.relative), &fingerprint, Some(&ctx.digest));
            match cache.lookup(&key, |path| ctx.live_fingerprint(path)) {
                Lookup::Hit(hit) => return ctx.restore(file, hit),
                Lookup::Miss(reason) => {
                    tracing::debug!(source = %file.relative.display(), key = %key, ?reason, "cache miss");
                }
            }
            Some(key)
        }
        None => None,
    };

    let outcome = ctx.render(file).await?;

    if let (Some(cache), Some(key)) = (&ctx.cache, key) {
        ctx.persist(cache, &key, &outcome.entry)?;
    }
    Ok(outcome)
}

impl BuildContext {
    fn resolve_input(&self, path: &str) -> PathBuf {
        self.input_root.join(path)
    }

    fn live_fingerprint(&self, path: &str) -> Option<Fingerprint> {
        self.session.fingerprint(&self.resolve_input(path)).ok()
    }

    fn restore(&self, file: SourceFile, hit: CacheHit) -> Result<SourceOutcome, BuildError> {
        let mut entry = LedgerEntry::default();
        entry
            .dependencies
            .insert(Dependency::File(file.absolute.clone()));
        for (path, _) in hit.manifest.iter() {
            entry
                .dependencies
                .insert(Dependency::File(self.resolve_input(path)));
        }

        for (relative, bytes) in &hit.outputs {
            let output = self.output_root.join(relative);
            self.blobs.link_output(&output, bytes)?;
            entry.outputs.insert(output);
        }
        for (public_path, source) in hit.urls {
            let source = PathBuf::from(source);
            self.observer.cached_asset(&source, &public_path);
            entry.external.insert(public_path, source);
        }

        tracing::debug!(
            source = %file.relative.display(),
            outputs = entry.outputs.len(),
            "restored from cache"
        );
        Ok(SourceOutcome {
            source: file,
            entry,
            restored: true,
            invocations: 0,
        })
    }

    async fn render(&self, file: SourceFile) -> Result<SourceOutcome, BuildError> {
        let default_output = replace_extension(&file.relative, &self.output_extension);
        let mut units = Vec::new();
        self.transform.plan_outputs(
            &file.relative,
            &default_output,
            &self.options,
            &mut |output, options| units.push((output, options)),
        );

        let mut entry = LedgerEntry::default();
        entry
            .dependencies
            .insert(Dependency::File(file.absolute.clone()));
        let mut invocations = 0;

        for (relative_output, options) in units {
            let details = CompileDetails {
                source_root: self.input_root.clone(),
                relative_source: file.relative.clone(),
                absolute_source: file.absolute.clone(),
                output_root: self.output_root.clone(),
                absolute_output: self.output_root.join(&relative_output),
                relative_output,
                options,
            };
            self.observer.compiling(&details);

            let sink = JobSink::new(self.output_root.clone(), self.blobs.clone());
            invocations += 1;
            let rendered = match self.transform.render(&details, &sink).await {
                Ok(rendered) => rendered,
                Err(error) => {
                    self.observer.failed(&details, &error);
                    return Err(BuildError::transform(&file.relative, error));
                }
            };

            self.blobs
                .link_output(&details.absolute_output, &rendered.bytes)?;
            entry.outputs.insert(details.absolute_output.clone());
            entry.dependencies.extend(
                rendered
                    .read_files
                    .iter()
                    .map(|path| Dependency::File(path.clone())),
            );

            let captured = sink.finish();
            entry.dependencies.extend(captured.dependencies);
            entry.outputs.extend(captured.outputs);
            entry.external.extend(captured.external);

            self.observer.compiled(&details, &rendered);
        }

        tracing::debug!(
            source = %file.relative.display(),
            invocations,
            dependencies = entry.dependencies.len(),
            "compiled"
        );
        Ok(SourceOutcome {
            source: file,
            entry,
            restored: false,
            invocations,
        })
    }

    /// Stores the manifest and bundle of a fresh render.
    ///
    /// A failed cache write is logged and dropped; the outputs on disk are
    /// already correct.
    fn persist(
        &self,
        cache: &PersistentCache,
        key: &CacheKey,
        entry: &LedgerEntry,
    ) -> Result<(), BuildError> {
        let mut manifest = DependencyManifest::new();
        for dependency in &entry.dependencies {
            let Dependency::File(path) = dependency else {
                continue;
            };
            let absolute = self.input_root.join(path);
            // A dependency that vanished mid-build is not a real dependency.
            if let Some(stat) = self.session.stat(&absolute)? {
                let stored = normalize_key(&self.input_root, &absolute);
                manifest.push(to_slash(&stored), Fingerprint::from_stat(&stat));
            }
        }

        let Some(bundle) = self.bundle(entry) else {
            return Ok(());
        };
        if let Err(error) = cache.store(key, &manifest, &bundle) {
            tracing::warn!(key = %key, %error, "failed to write cache entry");
        }
        Ok(())
    }

    fn bundle(&self, entry: &LedgerEntry) -> Option<OutputBundle> {
        let mut bundle = OutputBundle::new();
        for output in &entry.outputs {
            let Ok(relative) = output.strip_prefix(&self.output_root) else {
                tracing::warn!(
                    output = %output.display(),
                    "output outside output root is not cached"
                );
                continue;
            };
            match std::fs::read(output) {
                Ok(bytes) => bundle.add_content(to_slash(relative), &bytes),
                Err(error) => {
                    tracing::warn!(output = %output.display(), %error, "cannot read output for caching");
                    return None;
                }
            }
        }
        for (public_path, source) in &entry.external {
            bundle.add_url(public_path.clone(), to_slash(source));
        }
        Some(bundle)
    }
}

//! Build-scoped dependency and output tracking.
//!
//! The ledger records, per source file, what the transformation read and
//! what it produced. It is owned by the engine between builds, moved into
//! the build session while a build runs, and replaced by an empty ledger
//! whenever a build fails. It is never persisted; a persistent-cache hit
//! repopulates it from the stored manifest instead.
//!
//! Keys and dependency paths are input-root-relative whenever the path lies
//! inside the input root.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use kiln_common::normalize_key;

/// One member of a source file's dependency set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dependency {
    /// A real file.
    File(PathBuf),
    /// A synthetic identifier with no filesystem counterpart.
    Virtual(String),
}

/// Everything one job learned about one source file.
///
/// Workers fill an entry privately and hand it back; only the engine merges
/// entries into the shared [`Ledger`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Files and identifiers the transformation touched.
    pub dependencies: BTreeSet<Dependency>,
    /// Absolute paths of produced outputs.
    pub outputs: BTreeSet<PathBuf>,
    /// Public path to absolute source of externally-located outputs.
    pub external: BTreeMap<String, PathBuf>,
}

/// Per-source dependency, output and external-output maps.
#[derive(Debug, Clone)]
pub struct Ledger {
    root: PathBuf,
    dependencies: BTreeMap<PathBuf, BTreeSet<Dependency>>,
    outputs: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
    external: BTreeMap<PathBuf, BTreeMap<String, PathBuf>>,
}

impl Ledger {
    /// Creates an empty ledger for the given input root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dependencies: BTreeMap::new(),
            outputs: BTreeMap::new(),
            external: BTreeMap::new(),
        }
    }

    /// The input root keys are relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key(&self, source: &Path) -> PathBuf {
        normalize_key(&self.root, source)
    }

    /// Resolves a stored (possibly relative) path to an absolute one.
    pub fn absolute(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    /// Records that `source` depends on `dependency`.
    pub fn add_dependency(&mut self, source: &Path, dependency: Dependency) {
        let dependency = match dependency {
            Dependency::File(path) => Dependency::File(self.key(&path)),
            virtual_dep => virtual_dep,
        };
        self.dependencies
            .entry(self.key(source))
            .or_default()
            .insert(dependency);
    }

    /// Records that `source` produced `output`.
    pub fn add_output(&mut self, source: &Path, output: PathBuf) {
        self.outputs.entry(self.key(source)).or_default().insert(output);
    }

    /// Records an externally-located output of `source`, reachable at
    /// `public_path` and restorable from `asset_source`.
    pub fn add_external_output(&mut self, source: &Path, asset_source: PathBuf, public_path: String) {
        self.external
            .entry(self.key(source))
            .or_default()
            .insert(public_path, asset_source);
    }

    /// Merges a job's findings for `source`.
    pub fn insert_entry(&mut self, source: &Path, entry: LedgerEntry) {
        for dependency in entry.dependencies {
            self.add_dependency(source, dependency);
        }
        for output in entry.outputs {
            self.add_output(source, output);
        }
        for (public_path, asset_source) in entry.external {
            self.add_external_output(source, asset_source, public_path);
        }
    }

    /// The dependency set of `source`, `None` if nothing is known about it.
    pub fn dependencies_of(&self, source: &Path) -> Option<&BTreeSet<Dependency>> {
        self.dependencies.get(&self.key(source))
    }

    /// The outputs of `source`, `None` if it produced none.
    pub fn outputs_of(&self, source: &Path) -> Option<&BTreeSet<PathBuf>> {
        self.outputs.get(&self.key(source))
    }

    /// The external outputs of `source`, `None` if it produced none.
    pub fn external_outputs_of(&self, source: &Path) -> Option<&BTreeMap<String, PathBuf>> {
        self.external.get(&self.key(source))
    }

    /// Outputs produced by at least one of `sources` and by no other source.
    pub fn outputs_owned_only_by(&self, sources: &[PathBuf]) -> BTreeSet<PathBuf> {
        let keys: BTreeSet<PathBuf> = sources.iter().map(|s| self.key(s)).collect();
        let claimed_elsewhere: BTreeSet<&PathBuf> = self
            .outputs
            .iter()
            .filter(|(source, _)| !keys.contains(*source))
            .flat_map(|(_, outputs)| outputs)
            .collect();

        keys.iter()
            .filter_map(|key| self.outputs.get(key))
            .flatten()
            .filter(|output| !claimed_elsewhere.contains(output))
            .cloned()
            .collect()
    }

    /// Every tracked source, as stored (relative when inside the root).
    pub fn sources(&self) -> BTreeSet<PathBuf> {
        self.dependencies
            .keys()
            .chain(self.outputs.keys())
            .chain(self.external.keys())
            .cloned()
            .collect()
    }

    /// Absolute paths of every real-file dependency of every source.
    pub fn dependency_files(&self) -> BTreeSet<PathBuf> {
        self.dependencies
            .values()
            .flatten()
            .filter_map(|dep| match dep {
                Dependency::File(path) => Some(self.absolute(path)),
                Dependency::Virtual(_) => None,
            })
            .collect()
    }

    /// Forgets everything about one source.
    pub fn remove_source(&mut self, source: &Path) {
        let key = self.key(source);
        self.dependencies.remove(&key);
        self.outputs.remove(&key);
        self.external.remove(&key);
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.outputs.clear();
        self.external.clear();
    }

    /// Number of tracked sources.
    pub fn len(&self) -> usize {
        self.sources().len()
    }

    /// Returns `true` if no source is tracked.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.outputs.is_empty() && self.external.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/work/styles";

    fn ledger() -> Ledger {
        Ledger::new(ROOT)
    }

    fn abs(rel: &str) -> PathBuf {
        Path::new(ROOT).join(rel)
    }

    #[test]
    fn keys_are_root_relative() {
        let mut l = ledger();
        l.add_dependency(&abs("a.scss"), Dependency::File(abs("_b.scss")));
        let deps = l.dependencies_of(Path::new("a.scss")).unwrap();
        assert!(deps.contains(&Dependency::File(PathBuf::from("_b.scss"))));
        // Lookups by absolute path resolve to the same key.
        assert_eq!(l.dependencies_of(&abs("a.scss")), Some(deps));
    }

    #[test]
    fn outside_dependencies_stay_absolute() {
        let mut l = ledger();
        l.add_dependency(
            Path::new("a.scss"),
            Dependency::File(PathBuf::from("/opt/vendor/_grid.scss")),
        );
        assert!(l
            .dependency_files()
            .contains(&PathBuf::from("/opt/vendor/_grid.scss")));
    }

    #[test]
    fn virtual_dependencies_are_not_files() {
        let mut l = ledger();
        l.add_dependency(Path::new("a.scss"), Dependency::Virtual("assets:manifest".into()));
        l.add_dependency(Path::new("a.scss"), Dependency::File(abs("a.scss")));
        assert_eq!(l.dependencies_of(Path::new("a.scss")).unwrap().len(), 2);
        assert_eq!(
            l.dependency_files().into_iter().collect::<Vec<_>>(),
            vec![abs("a.scss")]
        );
    }

    #[test]
    fn unknown_source_has_no_entries() {
        let l = ledger();
        assert!(l.dependencies_of(Path::new("a.scss")).is_none());
        assert!(l.outputs_of(Path::new("a.scss")).is_none());
    }

    #[test]
    fn owned_only_by_excludes_shared_outputs() {
        let mut l = ledger();
        l.add_output(Path::new("a.scss"), PathBuf::from("/out/a.css"));
        l.add_output(Path::new("a.scss"), PathBuf::from("/out/shared.png"));
        l.add_output(Path::new("b.scss"), PathBuf::from("/out/b.css"));
        l.add_output(Path::new("b.scss"), PathBuf::from("/out/shared.png"));

        let owned = l.outputs_owned_only_by(&[PathBuf::from("a.scss")]);
        assert_eq!(
            owned.into_iter().collect::<Vec<_>>(),
            vec![PathBuf::from("/out/a.css")]
        );

        let both = l.outputs_owned_only_by(&[PathBuf::from("a.scss"), abs("b.scss")]);
        assert_eq!(both.len(), 3);
    }

    #[test]
    fn owned_only_by_unknown_source_is_empty() {
        let l = ledger();
        assert!(l.outputs_owned_only_by(&[PathBuf::from("ghost.scss")]).is_empty());
    }

    #[test]
    fn insert_entry_merges_everything() {
        let mut entry = LedgerEntry::default();
        entry.dependencies.insert(Dependency::File(abs("a.scss")));
        entry.outputs.insert(PathBuf::from("/out/a.css"));
        entry
            .external
            .insert("/assets/logo.png".to_string(), PathBuf::from("/work/logo.png"));

        let mut l = ledger();
        l.insert_entry(&abs("a.scss"), entry);
        assert_eq!(l.len(), 1);
        assert_eq!(
            l.external_outputs_of(Path::new("a.scss"))
                .and_then(|m| m.get("/assets/logo.png")),
            Some(&PathBuf::from("/work/logo.png"))
        );
        assert!(l.outputs_of(Path::new("a.scss")).unwrap().contains(Path::new("/out/a.css")));
    }

    #[test]
    fn remove_and_clear() {
        let mut l = ledger();
        l.add_dependency(Path::new("a.scss"), Dependency::File(abs("a.scss")));
        l.add_output(Path::new("b.scss"), PathBuf::from("/out/b.css"));
        l.remove_source(&abs("a.scss"));
        assert_eq!(l.sources().into_iter().collect::<Vec<_>>(), vec![PathBuf::from("b.scss")]);
        l.clear();
        assert!(l.is_empty());
    }
}

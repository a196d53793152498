//! Snapshots of the known input files and the diff between two of them.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use kiln_cache::{CacheError, FileStat, FingerprintSession};

/// Metadata of one file in a [`BuildTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: u32,
    pub size: u64,
    pub mtime_ms: u64,
}

impl From<FileStat> for TreeEntry {
    fn from(stat: FileStat) -> Self {
        Self {
            mode: stat.mode,
            size: stat.size,
            mtime_ms: stat.mtime_ms,
        }
    }
}

/// What happened to one path between two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Unlink,
}

/// One difference between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub path: PathBuf,
    /// The entry in the newer tree; `None` for unlinks.
    pub entry: Option<TreeEntry>,
}

/// Sorted `(absolute path, entry)` pairs of every file the engine knows as
/// a dependency or direct input. Files nobody declared are not in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildTree {
    entries: Vec<(PathBuf, TreeEntry)>,
}

impl BuildTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats every path through the session; missing files are left out.
    pub fn snapshot<I, P>(paths: I, session: &FingerprintSession) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut entries = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if let Some(stat) = session.stat(path)? {
                entries.push((path.to_path_buf(), TreeEntry::from(stat)));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|(p, _)| p.as_path().cmp(path))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(p, _)| p.as_path())
    }

    /// Operations turning `self` into `next`, in path order.
    pub fn diff(&self, next: &BuildTree) -> Vec<Operation> {
        let mut ops = Vec::new();
        let mut prev_iter = self.entries.iter().peekable();
        let mut next_iter = next.entries.iter().peekable();

        loop {
            let order = match (prev_iter.peek(), next_iter.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((a, _)), Some((b, _))) => a.cmp(b),
            };
            match order {
                Ordering::Less => {
                    if let Some((path, _)) = prev_iter.next() {
                        ops.push(Operation {
                            kind: OperationKind::Unlink,
                            path: path.clone(),
                            entry: None,
                        });
                    }
                }
                Ordering::Greater => {
                    if let Some((path, entry)) = next_iter.next() {
                        ops.push(Operation {
                            kind: OperationKind::Create,
                            path: path.clone(),
                            entry: Some(*entry),
                        });
                    }
                }
                Ordering::Equal => {
                    if let (Some((_, before)), Some((path, after))) =
                        (prev_iter.next(), next_iter.next())
                    {
                        if before != after {
                            ops.push(Operation {
                                kind: OperationKind::Update,
                                path: path.clone(),
                                entry: Some(*after),
                            });
                        }
                    }
                }
            }
        }
        ops
    }
}

impl FromIterator<(PathBuf, TreeEntry)> for BuildTree {
    fn from_iter<T: IntoIterator<Item = (PathBuf, TreeEntry)>>(iter: T) -> Self {
        let mut entries: Vec<_> = iter.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self { entries }
    }
}

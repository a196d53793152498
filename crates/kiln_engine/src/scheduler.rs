//! Bounded worker pool driving one batch of source files.
//!
//! Each file moves through `Pending -> Compiling -> (Compiled | Failed)`.
//! An empty batch resolves immediately and a single file runs as one task
//! with no worker pool around it. Larger batches are drained by `min(jobs, files)` workers
//! on a [`JoinSet`], each pulling the next pending file from a shared queue.
//! The first failure stops workers from picking up further files; the batch
//! then resolves with that error once in-flight files settle.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinSet;

use crate::error::BuildError;
use crate::source::SourceFile;

/// Lifecycle state of one scheduled file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Compiling,
    Compiled,
    Failed,
}

impl JobState {
    /// Returns `true` for `Compiled` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Compiled | Self::Failed)
    }
}

/// Final states of a batch plus its aggregate result.
#[derive(Debug)]
pub struct BatchOutcome<R> {
    /// State of every file of the batch, keyed by relative path.
    pub states: BTreeMap<PathBuf, JobState>,
    /// Per-file results in completion order, or the first failure.
    pub result: Result<Vec<R>, BuildError>,
}

/// Runs batches with a fixed job count.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    jobs: usize,
}

struct Batch<R> {
    queue: Mutex<VecDeque<SourceFile>>,
    states: Mutex<BTreeMap<PathBuf, JobState>>,
    results: Mutex<Vec<R>>,
    first_error: Mutex<Option<BuildError>>,
    failed: AtomicBool,
}

impl<R> Batch<R> {
    fn next_file(&self) -> Option<SourceFile> {
        if self.failed.load(Ordering::Acquire) {
            return None;
        }
        lock(&self.queue).pop_front()
    }

    fn set_state(&self, file: &SourceFile, state: JobState) {
        lock(&self.states).insert(file.relative.clone(), state);
    }

    fn fail(&self, error: BuildError) {
        self.failed.store(true, Ordering::Release);
        let mut first = lock(&self.first_error);
        if first.is_none() {
            *first = Some(error);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Scheduler {
    /// Creates a scheduler; a job count of zero is treated as one.
    pub fn new(jobs: usize) -> Self {
        Self { jobs: jobs.max(1) }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Runs `work` for every file and waits for the batch to settle.
    pub async fn run<F, Fut, R>(&self, files: Vec<SourceFile>, work: F) -> BatchOutcome<R>
    where
        F: Fn(SourceFile) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BuildError>> + Send + 'static,
        R: Send + 'static,
    {
        let mut states: BTreeMap<PathBuf, JobState> = files
            .iter()
            .map(|f| (f.relative.clone(), JobState::Pending))
            .collect();

        match files.len() {
            0 => BatchOutcome {
                states,
                result: Ok(Vec::new()),
            },
            1 => {
                let Some(file) = files.into_iter().next() else {
                    return BatchOutcome {
                        states,
                        result: Ok(Vec::new()),
                    };
                };
                let relative = file.relative.clone();
                states.insert(relative.clone(), JobState::Compiling);
                // Spawned so a panicking transform fails the batch.
                let result = match tokio::spawn(work(file)).await {
                    Ok(result) => result,
                    Err(join_error) => Err(BuildError::JobPanicked(join_error)),
                };
                let state = if result.is_ok() {
                    JobState::Compiled
                } else {
                    JobState::Failed
                };
                states.insert(relative, state);
                BatchOutcome {
                    states,
                    result: result.map(|r| vec![r]),
                }
            }
            n => self.run_pool(files, states, n, work).await,
        }
    }

    async fn run_pool<F, Fut, R>(
        &self,
        files: Vec<SourceFile>,
        states: BTreeMap<PathBuf, JobState>,
        count: usize,
        work: F,
    ) -> BatchOutcome<R>
    where
        F: Fn(SourceFile) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BuildError>> + Send + 'static,
        R: Send + 'static,
    {
        let batch = Arc::new(Batch {
            queue: Mutex::new(VecDeque::from(files)),
            states: Mutex::new(states),
            results: Mutex::new(Vec::with_capacity(count)),
            first_error: Mutex::new(None),
            failed: AtomicBool::new(false),
        });
        let work = Arc::new(work);
        let workers = self.jobs.min(count);
        tracing::debug!(files = count, workers, "scheduling batch");

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let batch = Arc::clone(&batch);
            let work = Arc::clone(&work);
            set.spawn(async move {
                while let Some(file) = batch.next_file() {
                    batch.set_state(&file, JobState::Compiling);
                    match (*work)(file.clone()).await {
                        Ok(result) => {
                            batch.set_state(&file, JobState::Compiled);
                            lock(&batch.results).push(result);
                        }
                        Err(error) => {
                            batch.set_state(&file, JobState::Failed);
                            batch.fail(error);
                        }
                    }
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(join_error) = joined {
                batch.fail(BuildError::JobPanicked(join_error));
            }
        }

        let mut states = std::mem::take(&mut *lock(&batch.states));
        // A panicked worker leaves its file mid-flight.
        for state in states.values_mut() {
            if *state == JobState::Compiling {
                *state = JobState::Failed;
            }
        }
        let first_error = lock(&batch.first_error).take();
        let result = match first_error {
            Some(error) => Err(error),
            None => Ok(std::mem::take(&mut *lock(&batch.results))),
        };
        BatchOutcome { states, result }
    }
}

//! Sizing of the per-build worker pool.
//!
//! The plan is computed once per process from the environment controls and
//! the host's core counts, then reused by every engine.

use std::collections::HashSet;
use std::sync::OnceLock;

use kiln_config::EnvControls;

/// Blocking-pool size assumed when the host does not report one.
pub const DEFAULT_IO_THREADS: usize = 4;

/// Job count plus the I/O pool size the host should provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyPlan {
    /// Concurrent transformation jobs per build. Always at least 1.
    pub jobs: usize,
    /// Blocking-pool size to provision, when the default is too small.
    pub io_threads: Option<usize>,
}

impl ConcurrencyPlan {
    /// A runtime builder whose blocking pool matches this plan.
    pub fn runtime_builder(&self) -> tokio::runtime::Builder {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        if let Some(io_threads) = self.io_threads {
            builder.max_blocking_threads(io_threads);
        }
        builder
    }
}

/// Returns the process-wide concurrency plan.
///
/// The first call decides; later calls return the same plan regardless of
/// the controls they pass.
pub fn choose_concurrency(env: &EnvControls) -> ConcurrencyPlan {
    static PLAN: OnceLock<ConcurrencyPlan> = OnceLock::new();
    *PLAN.get_or_init(|| {
        let logical = logical_cores();
        let physical = physical_cores_linux_best_effort().unwrap_or(logical);
        let plan = plan_concurrency(env.jobs, env.io_threads, logical, physical);
        tracing::debug!(
            jobs = plan.jobs,
            io_threads = ?plan.io_threads,
            logical,
            physical,
            "chose build concurrency"
        );
        plan
    })
}

/// Pure sizing rule behind [`choose_concurrency`].
pub fn plan_concurrency(
    requested: Option<usize>,
    io_threads: Option<usize>,
    logical: usize,
    physical: usize,
) -> ConcurrencyPlan {
    let logical = logical.max(1);
    let physical = physical.clamp(1, logical);

    let requested = requested.filter(|&jobs| {
        let useful = jobs <= logical;
        if !useful {
            tracing::warn!(
                requested = jobs,
                logical,
                "ignoring job count above logical core count"
            );
        }
        useful
    });

    match (requested, io_threads) {
        (Some(jobs), Some(pool)) => ConcurrencyPlan {
            jobs: jobs.min(pool).max(1),
            io_threads: None,
        },
        (Some(jobs), None) => ConcurrencyPlan {
            jobs,
            io_threads: raise_pool(jobs),
        },
        (None, Some(pool)) => ConcurrencyPlan {
            jobs: physical.min(pool).max(1),
            io_threads: None,
        },
        (None, None) => ConcurrencyPlan {
            jobs: physical,
            io_threads: raise_pool(physical),
        },
    }
}

fn raise_pool(jobs: usize) -> Option<usize> {
    (jobs > DEFAULT_IO_THREADS).then_some(jobs)
}

fn logical_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn physical_cores_linux_best_effort() -> Option<usize> {
    let contents = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    parse_physical_cores(&contents)
}

/// Counts distinct `(physical id, core id)` pairs.
fn parse_physical_cores(cpuinfo: &str) -> Option<usize> {
    let mut cores = HashSet::new();
    let mut package = None;
    for line in cpuinfo.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim() {
            "physical id" => package = value.trim().parse::<u32>().ok(),
            "core id" => {
                if let Ok(core) = value.trim().parse::<u32>() {
                    cores.insert((package.unwrap_or(0), core));
                }
            }
            _ => {}
        }
    }
    (!cores.is_empty()).then_some(cores.len())
}

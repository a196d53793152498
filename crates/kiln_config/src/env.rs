//! Environment-level controls read once at the engine boundary.
//!
//! Nothing below the engine constructor reads the process environment; it is
//! captured here into a plain value so tests can build any combination
//! without touching global state.

/// Explicit job-count override.
pub const JOBS_VAR: &str = "KILN_JOBS";
/// Generic job-count override consulted when [`JOBS_VAR`] is unset.
pub const FALLBACK_JOBS_VAR: &str = "JOBS";
/// Host I/O (blocking) thread-pool size.
pub const IO_THREADS_VAR: &str = "KILN_IO_THREADS";
/// Continuous-integration indicator.
pub const CI_VAR: &str = "CI";
/// Keeps the persistent cache enabled under CI.
pub const FORCE_PERSISTENCE_VAR: &str = "KILN_FORCE_PERSISTENCE_IN_CI";
/// Wipes the persistent cache at the start of every build.
pub const CLEAR_CACHE_VAR: &str = "KILN_CLEAR_CACHE";

/// Snapshot of the environment-level controls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvControls {
    /// Requested number of concurrent transformation jobs.
    pub jobs: Option<usize>,
    /// Known size of the host's I/O thread pool.
    pub io_threads: Option<usize>,
    /// Running under continuous integration.
    pub ci: bool,
    /// Keep persistence on even under CI.
    pub force_persistence_in_ci: bool,
    /// Wipe the persistent cache before each build.
    pub clear_cache: bool,
}

impl EnvControls {
    /// Reads the controls from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the controls through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let jobs = parse_count(lookup(JOBS_VAR).as_deref())
            .or_else(|| parse_count(lookup(FALLBACK_JOBS_VAR).as_deref()));
        Self {
            jobs,
            io_threads: parse_count(lookup(IO_THREADS_VAR).as_deref()),
            ci: parse_flag(lookup(CI_VAR).as_deref()),
            force_persistence_in_ci: parse_flag(lookup(FORCE_PERSISTENCE_VAR).as_deref()),
            clear_cache: parse_flag(lookup(CLEAR_CACHE_VAR).as_deref()),
        }
    }

    /// Decides whether the persistent cache may be used.
    ///
    /// Under CI persistence is off unless explicitly forced, so that a warm
    /// cache never masks an environment-sensitive rebuild.
    pub fn persistence_enabled(&self, configured: bool) -> bool {
        configured && (!self.ci || self.force_persistence_in_ci)
    }
}

fn parse_count(raw: Option<&str>) -> Option<usize> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
}

fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(|v| v.trim().to_ascii_lowercase())
        .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"))
}

// Engine configuration
// Defaults are the usual exam judging limits; every value can
// be overridden through JUDGE_* environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RUN_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_ORPHAN_MAX_AGE_SECS: u64 = 3_600;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root under which each submission gets its own scratch directory
    pub scratch_root: PathBuf,
    pub compile_timeout_ms: u64,
    pub run_timeout_ms: u64,
    /// Submissions evaluated at the same time by the batch orchestrator
    pub max_parallel_jobs: usize,
    /// Test cases of one submission running at the same time
    pub max_parallel_tests: usize,
    pub orphan_max_age_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            scratch_root: std::env::temp_dir().join("examjudge"),
            compile_timeout_ms: DEFAULT_COMPILE_TIMEOUT_MS,
            run_timeout_ms: DEFAULT_RUN_TIMEOUT_MS,
            max_parallel_jobs: parallelism,
            max_parallel_tests: 1,
            orphan_max_age_secs: DEFAULT_ORPHAN_MAX_AGE_SECS,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparseable values fall
    /// back to the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("JUDGE_SCRATCH_DIR").filter(|d| !d.trim().is_empty()) {
            config.scratch_root = PathBuf::from(dir);
        }
        if let Some(ms) = parse(&lookup, "JUDGE_COMPILE_TIMEOUT_MS") {
            config.compile_timeout_ms = ms;
        }
        if let Some(ms) = parse(&lookup, "JUDGE_RUN_TIMEOUT_MS") {
            config.run_timeout_ms = ms;
        }
        if let Some(n) = parse::<_, usize>(&lookup, "JUDGE_MAX_PARALLEL_JOBS") {
            config.max_parallel_jobs = n.max(1);
        }
        if let Some(n) = parse::<_, usize>(&lookup, "JUDGE_MAX_PARALLEL_TESTS") {
            config.max_parallel_tests = n.max(1);
        }
        if let Some(secs) = parse(&lookup, "JUDGE_ORPHAN_MAX_AGE_SECS") {
            config.orphan_max_age_secs = secs;
        }

        config
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn orphan_max_age(&self) -> Duration {
        Duration::from_secs(self.orphan_max_age_secs)
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

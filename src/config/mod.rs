use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

pub const DEFAULT_SOLVER_BINARY: &str = "./target/release/pumpkin-solver";
pub const DEFAULT_INPUT_ROOT: &str = "./fzn_files_community_and_vaccine";
pub const DEFAULT_RUNS_DIR: &str = "./runs";
pub const DEFAULT_INPUT_SUFFIX: &str = "fzn";
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_KILL_GRACE_MS: u64 = 10_000;

const DEFAULT_SOLVER_FLAGS: [&str; 3] = ["-s", "-v", "--gcc-propagation-method"];
const DEFAULT_METHODS: [&str; 4] = [
    "extended-resolution-with-regin",
    "basic-filter",
    "regin-arc-consistent",
    "extended-resolution",
];
const DEFAULT_CATEGORIES: [&str; 2] = ["community", "vaccine"];

/// Everything the harness needs to know to run one benchmark session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Path of the solver executable.
    pub solver_binary: PathBuf,
    /// Flags placed before the method selector on every invocation.
    pub solver_flags: Vec<String>,
    /// Method selectors, one run per method and instance.
    pub methods: Vec<String>,
    /// Directory holding one sub-directory per category.
    pub input_root: PathBuf,
    pub categories: Vec<String>,
    /// Root of the `<category>/<instance>/{out,err}` tree.
    pub runs_dir: PathBuf,
    /// Extension (without the dot) of solver input files.
    pub input_suffix: String,
    /// Timeout handed to the solver through `-t`.
    pub timeout_ms: u64,
    /// Extra time past `timeout_ms` before the harness kills the solver itself.
    pub kill_grace_ms: u64,
    /// Worker pool size; `None` uses every available core.
    pub workers: Option<usize>,
    pub abort_on_first_failure: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            solver_binary: PathBuf::from(DEFAULT_SOLVER_BINARY),
            solver_flags: DEFAULT_SOLVER_FLAGS.iter().map(|s| s.to_string()).collect(),
            methods: DEFAULT_METHODS.iter().map(|s| s.to_string()).collect(),
            input_root: PathBuf::from(DEFAULT_INPUT_ROOT),
            categories: DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect(),
            runs_dir: PathBuf::from(DEFAULT_RUNS_DIR),
            input_suffix: DEFAULT_INPUT_SUFFIX.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
            workers: None,
            abort_on_first_failure: false,
        }
    }
}

impl HarnessConfig {
    /// Loads a configuration from a JSON file. Missing keys keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        let config: HarnessConfig =
            serde_json::from_str(&content).map_err(|source| HarnessError::Config {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.methods.is_empty() {
            return Err(HarnessError::InvalidConfig("no methods configured".into()));
        }
        for (i, method) in self.methods.iter().enumerate() {
            if method.is_empty() || method.contains(['/', '\\']) {
                return Err(HarnessError::InvalidConfig(format!(
                    "method name '{method}' cannot be used as a file name"
                )));
            }
            if self.methods[..i].contains(method) {
                return Err(HarnessError::InvalidConfig(format!(
                    "method '{method}' listed twice"
                )));
            }
        }
        if self.categories.is_empty() {
            return Err(HarnessError::InvalidConfig("no categories configured".into()));
        }
        if self.timeout_ms == 0 {
            return Err(HarnessError::InvalidConfig("timeout_ms must be positive".into()));
        }
        if self.workers == Some(0) {
            return Err(HarnessError::InvalidConfig("workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Pool size actually used by the dispatcher.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(available_workers)
    }

    pub fn category_input_dir(&self, category: &str) -> PathBuf {
        self.input_root.join(category)
    }

    pub fn category_runs_dir(&self, category: &str) -> PathBuf {
        self.runs_dir.join(category)
    }
}

pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

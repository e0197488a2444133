use crate::descriptor::RunDescriptor;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Terminal state of one solver invocation.
///
/// A non-zero exit is data about the run (the solver may report
/// unsatisfiability or an internal timeout that way), not a harness failure.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    NonZeroExit(i32),
    /// Terminated by a signal the harness did not send.
    Killed(Option<i32>),
    /// Still running past the hard deadline; killed by the harness.
    TimedOut,
    SpawnFailed(String),
    /// The run's directories or sink files could not be created.
    LayoutFailed(String),
    /// Never started because the batch was cancelled.
    Cancelled,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }

    /// True when the solver never produced a complete log through no fault of its own.
    pub fn is_harness_failure(&self) -> bool {
        matches!(
            self,
            RunStatus::TimedOut | RunStatus::SpawnFailed(_) | RunStatus::LayoutFailed(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::NonZeroExit(_) => "non-zero exit",
            RunStatus::Killed(_) => "killed",
            RunStatus::TimedOut => "timed out",
            RunStatus::SpawnFailed(_) => "spawn failed",
            RunStatus::LayoutFailed(_) => "layout failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunStatus::Success => Some(0),
            RunStatus::NonZeroExit(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::NonZeroExit(code) => write!(f, "exit code {code}"),
            RunStatus::Killed(Some(signal)) => write!(f, "killed by signal {signal}"),
            RunStatus::SpawnFailed(reason) => write!(f, "spawn failed: {reason}"),
            RunStatus::LayoutFailed(reason) => write!(f, "layout failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Identity of a run inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunKey {
    pub method: String,
    pub input_path: PathBuf,
}

impl RunKey {
    pub fn new(method: &str, input_path: &Path) -> Self {
        Self { method: method.to_string(), input_path: input_path.to_path_buf() }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub descriptor: RunDescriptor,
    pub status: RunStatus,
    pub elapsed: Duration,
}

impl RunOutcome {
    pub fn new(descriptor: RunDescriptor, status: RunStatus, elapsed: Duration) -> Self {
        Self { descriptor, status, elapsed }
    }
}

/// Every outcome of one category batch, keyed by (method, input path).
#[derive(Debug, Default)]
pub struct BatchResult {
    category: String,
    outcomes: FxHashMap<RunKey, RunOutcome>,
}

impl BatchResult {
    pub fn new(category: &str) -> Self {
        Self { category: category.to_string(), outcomes: FxHashMap::default() }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Records an outcome. Returns the previous outcome if the key was already present.
    pub fn insert(&mut self, outcome: RunOutcome) -> Option<RunOutcome> {
        self.outcomes.insert(outcome.descriptor.key(), outcome)
    }

    pub fn get(&self, key: &RunKey) -> Option<&RunOutcome> {
        self.outcomes.get(key)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes.values()
    }

    /// Outcomes ordered by instance, then method.
    pub fn sorted(&self) -> Vec<&RunOutcome> {
        let mut sorted: Vec<_> = self.outcomes.values().collect();
        sorted.sort_by(|a, b| {
            (&a.descriptor.instance, &a.descriptor.method)
                .cmp(&(&b.descriptor.instance, &b.descriptor.method))
        });
        sorted
    }

    pub fn count_succeeded(&self) -> usize {
        self.outcomes().filter(|o| o.status.is_success()).count()
    }

    /// Number of outcomes per status label, in first-seen label order of
    /// the sorted outcomes.
    pub fn status_counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for outcome in self.sorted() {
            let label = outcome.status.label();
            match counts.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((label, 1)),
            }
        }
        counts
    }
}

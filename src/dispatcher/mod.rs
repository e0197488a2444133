use crate::config::HarnessConfig;
use crate::descriptor::RunDescriptor;
use crate::outcome::{BatchResult, RunOutcome, RunStatus};
use crate::solver::{RunSinks, Solver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Batch-wide cancellation flag. Runs that have not started when it is set
/// finish as [`RunStatus::Cancelled`]; running ones are left alone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stop flags seen by the workers of one batch: the caller's token and the
/// batch's own abort flag, which never outlives the batch.
#[derive(Clone, Copy)]
struct StopFlags<'a> {
    caller: &'a CancelToken,
    abort: &'a CancelToken,
}

impl StopFlags<'_> {
    fn is_stopped(&self) -> bool {
        self.caller.is_cancelled() || self.abort.is_cancelled()
    }
}

/// A descriptor whose directories exist and whose sinks are open but not yet truncated.
struct PreparedRun {
    descriptor: RunDescriptor,
    sinks: RunSinks,
}

/// Fixed-size worker pool running one batch of solver invocations at a time.
///
/// Holds no per-batch state, so the same dispatcher can be used for every
/// category in turn.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: usize,
    abort_on_first_failure: bool,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(crate::config::available_workers())
    }
}

impl Dispatcher {
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1), abort_on_first_failure: false }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.worker_count()).abort_on_first_failure(config.abort_on_first_failure)
    }

    pub fn abort_on_first_failure(mut self, abort: bool) -> Self {
        self.abort_on_first_failure = abort;
        self
    }

    pub fn run_batch<S>(&self, category: &str, descriptors: Vec<RunDescriptor>, solver: &S) -> BatchResult
    where
        S: Solver + ?Sized,
    {
        self.run_batch_with_cancel(category, descriptors, solver, &CancelToken::new())
    }

    /// Runs every descriptor and returns once each one has an outcome.
    ///
    /// The calling thread prepares directories and opens sinks, feeding a
    /// bounded queue; workers only spawn and wait. A failed run never stops
    /// its siblings unless abort-on-first-failure is enabled, and then only
    /// within this batch. `cancel` is the caller's own token and is never set here.
    pub fn run_batch_with_cancel<S>(
        &self,
        category: &str,
        descriptors: Vec<RunDescriptor>,
        solver: &S,
        cancel: &CancelToken,
    ) -> BatchResult
    where
        S: Solver + ?Sized,
    {
        let mut batch = BatchResult::new(category);
        let total = descriptors.len();
        if total == 0 {
            info!(category, "no runs to dispatch");
            return batch;
        }

        let workers = self.workers.min(total);
        info!(category, runs = total, workers, "dispatching batch");
        let started = Instant::now();

        let (task_tx, task_rx) = mpsc::sync_channel::<PreparedRun>(workers);
        let task_rx = Mutex::new(task_rx);
        let (done_tx, done_rx) = mpsc::channel::<RunOutcome>();
        let abort = CancelToken::new();
        let stop = StopFlags { caller: cancel, abort: &abort };

        thread::scope(|s| {
            let mut started_workers = 0;
            for id in 0..workers {
                let task_rx = &task_rx;
                let done_tx = done_tx.clone();
                let abort_on_failure = self.abort_on_first_failure;
                let spawned = thread::Builder::new()
                    .name(format!("{category}-worker-{id}"))
                    .spawn_scoped(s, move || worker_loop(task_rx, done_tx, solver, stop, abort_on_failure));
                match spawned {
                    Ok(_) => started_workers += 1,
                    Err(e) => warn!(error = %e, "failed to start worker thread"),
                }
            }

            for descriptor in descriptors {
                if started_workers == 0 {
                    let status = RunStatus::SpawnFailed("no worker threads available".into());
                    let _ = done_tx.send(skipped(descriptor, status));
                    continue;
                }
                if stop.is_stopped() {
                    let _ = done_tx.send(skipped(descriptor, RunStatus::Cancelled));
                    continue;
                }

                let sinks = match prepare(&descriptor) {
                    Ok(sinks) => sinks,
                    Err(reason) => {
                        warn!(
                            method = %descriptor.method,
                            instance = %descriptor.instance,
                            %reason,
                            "could not prepare run"
                        );
                        if self.abort_on_first_failure {
                            abort.cancel();
                        }
                        let _ = done_tx.send(skipped(descriptor, RunStatus::LayoutFailed(reason)));
                        continue;
                    }
                };

                // Blocks while the queue is full, keeping open sinks bounded by the pool size.
                if let Err(mpsc::SendError(run)) = task_tx.send(PreparedRun { descriptor, sinks }) {
                    let status = RunStatus::SpawnFailed("worker pool unavailable".into());
                    let _ = done_tx.send(skipped(run.descriptor, status));
                }
            }
            drop(task_tx);
            drop(done_tx);

            for (done, outcome) in done_rx.iter().enumerate() {
                log_outcome(done + 1, total, &outcome);
                if let Some(previous) = batch.insert(outcome) {
                    warn!(
                        method = %previous.descriptor.method,
                        input = %previous.descriptor.input_path.display(),
                        "duplicate run in batch, keeping the later outcome"
                    );
                }
            }
        });

        info!(
            category,
            runs = batch.len(),
            succeeded = batch.count_succeeded(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "batch finished"
        );
        batch
    }
}

fn worker_loop<S>(
    task_rx: &Mutex<Receiver<PreparedRun>>,
    done_tx: Sender<RunOutcome>,
    solver: &S,
    stop: StopFlags<'_>,
    abort_on_first_failure: bool,
) where
    S: Solver + ?Sized,
{
    loop {
        // The lock is released before the run starts so other workers can pull.
        let next = task_rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok(PreparedRun { descriptor, sinks }) = next else { break };

        // Cancelled runs keep whatever logs an earlier batch left behind.
        if stop.is_stopped() {
            drop(sinks);
            if done_tx.send(skipped(descriptor, RunStatus::Cancelled)).is_err() {
                break;
            }
            continue;
        }

        if let Err(e) = sinks.truncate() {
            let reason = format!("failed to truncate log files of {}: {e}", descriptor.method);
            if abort_on_first_failure {
                stop.abort.cancel();
            }
            if done_tx.send(skipped(descriptor, RunStatus::LayoutFailed(reason))).is_err() {
                break;
            }
            continue;
        }

        debug!(method = %descriptor.method, instance = %descriptor.instance, "running");
        let start = Instant::now();
        let status = solver.run(&descriptor, sinks);
        let elapsed = start.elapsed();

        if abort_on_first_failure && !status.is_success() {
            stop.abort.cancel();
        }
        if done_tx.send(RunOutcome::new(descriptor, status, elapsed)).is_err() {
            break;
        }
    }
}

fn prepare(descriptor: &RunDescriptor) -> Result<RunSinks, String> {
    descriptor.dirs().ensure().map_err(|e| e.to_string())?;
    RunSinks::open(descriptor)
        .map_err(|e| format!("failed to open log files for {}: {e}", descriptor.output_file().display()))
}

fn skipped(descriptor: RunDescriptor, status: RunStatus) -> RunOutcome {
    RunOutcome::new(descriptor, status, Duration::ZERO)
}

fn log_outcome(done: usize, total: usize, outcome: &RunOutcome) {
    let d = &outcome.descriptor;
    let elapsed_s = outcome.elapsed.as_secs_f64();
    if outcome.status.is_harness_failure() {
        warn!(progress = %format!("{done}/{total}"), method = %d.method, instance = %d.instance, status = %outcome.status, elapsed_s, "run failed");
    } else {
        info!(progress = %format!("{done}/{total}"), method = %d.method, instance = %d.instance, status = %outcome.status, elapsed_s, "run finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    /// Records how many runs overlap and fails the methods it is told to.
    #[derive(Default)]
    struct CountingSolver {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        failing_method: Option<&'static str>,
    }

    impl Solver for CountingSolver {
        fn run(&self, descriptor: &RunDescriptor, _sinks: RunSinks) -> RunStatus {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);

            match self.failing_method {
                Some(m) if m == descriptor.method => RunStatus::SpawnFailed("not found".into()),
                _ => RunStatus::Success,
            }
        }
    }

    fn descriptors(root: &std::path::Path, instances: usize, methods: &[&str]) -> Vec<RunDescriptor> {
        let mut out = Vec::new();
        for i in 1..=instances {
            let instance = format!("instance{i}");
            for method in methods {
                out.push(RunDescriptor {
                    category: "community".into(),
                    instance: instance.clone(),
                    method: method.to_string(),
                    input_path: PathBuf::from(format!("in/{instance}.fzn")),
                    output_dir: root.join(&instance).join("out"),
                    error_dir: root.join(&instance).join("err"),
                    timeout_ms: 1000,
                });
            }
        }
        out
    }

    #[test]
    fn single_worker_runs_strictly_sequentially() {
        let tmp = tempfile::tempdir().unwrap();
        let solver = CountingSolver::default();

        let batch = Dispatcher::new(1).run_batch("community", descriptors(tmp.path(), 5, &["A"]), &solver);

        assert_eq!(batch.len(), 5);
        assert_eq!(batch.count_succeeded(), 5);
        assert_eq!(solver.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_size_bounds_concurrency() {
        let tmp = tempfile::tempdir().unwrap();
        let solver = CountingSolver::default();

        let batch = Dispatcher::new(3).run_batch("community", descriptors(tmp.path(), 6, &["A", "B"]), &solver);

        assert_eq!(batch.len(), 12);
        assert!(solver.peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn failures_do_not_stop_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let solver = CountingSolver { failing_method: Some("B"), ..Default::default() };

        let batch = Dispatcher::new(2).run_batch("community", descriptors(tmp.path(), 3, &["A", "B"]), &solver);

        assert_eq!(batch.len(), 6);
        assert_eq!(batch.count_succeeded(), 3);
        for outcome in batch.outcomes() {
            match outcome.descriptor.method.as_str() {
                "A" => assert_eq!(outcome.status, RunStatus::Success),
                _ => assert!(matches!(outcome.status, RunStatus::SpawnFailed(_))),
            }
        }
    }

    #[test]
    fn abort_on_first_failure_cancels_pending_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let solver = CountingSolver { failing_method: Some("A"), ..Default::default() };

        let batch = Dispatcher::new(1)
            .abort_on_first_failure(true)
            .run_batch("community", descriptors(tmp.path(), 4, &["A"]), &solver);

        assert_eq!(batch.len(), 4);
        let cancelled = batch.outcomes().filter(|o| o.status == RunStatus::Cancelled).count();
        assert!(cancelled >= 1);
        assert_eq!(solver.calls.load(Ordering::SeqCst) + cancelled, 4);
    }

    #[test]
    fn abort_does_not_leak_into_the_next_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(1).abort_on_first_failure(true);
        let solver = CountingSolver { failing_method: Some("A"), ..Default::default() };
        let cancel = CancelToken::new();

        let first = dispatcher.run_batch_with_cancel(
            "community",
            descriptors(&tmp.path().join("c"), 3, &["A"]),
            &solver,
            &cancel,
        );
        let second = dispatcher.run_batch_with_cancel(
            "vaccine",
            descriptors(&tmp.path().join("v"), 2, &["B"]),
            &solver,
            &cancel,
        );

        assert!(first.outcomes().any(|o| o.status == RunStatus::Cancelled));
        assert!(!cancel.is_cancelled());
        assert_eq!(second.len(), 2);
        assert_eq!(second.count_succeeded(), 2);
    }

    #[test]
    fn cancelled_runs_keep_previous_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let runs = descriptors(tmp.path(), 4, &["A"]);
        // Logs left over from an earlier batch.
        for d in &runs {
            d.dirs().ensure().unwrap();
            std::fs::write(d.output_file(), "previous\n").unwrap();
        }
        let solver = CountingSolver { failing_method: Some("A"), ..Default::default() };

        let batch = Dispatcher::new(1).abort_on_first_failure(true).run_batch("community", runs, &solver);

        for outcome in batch.outcomes() {
            let text = std::fs::read_to_string(outcome.descriptor.output_file()).unwrap();
            match outcome.status {
                RunStatus::Cancelled => assert_eq!(text, "previous\n"),
                _ => assert_eq!(text, ""),
            }
        }
    }

    #[test]
    fn pre_cancelled_batch_runs_nothing_but_accounts_for_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let solver = CountingSolver::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let batch = Dispatcher::new(2).run_batch_with_cancel(
            "community",
            descriptors(tmp.path(), 2, &["A", "B"]),
            &solver,
            &cancel,
        );

        assert_eq!(batch.len(), 4);
        assert!(batch.outcomes().all(|o| o.status == RunStatus::Cancelled));
        assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unwritable_layout_fails_only_that_run() {
        let tmp = tempfile::tempdir().unwrap();
        let runs = descriptors(tmp.path(), 2, &["A"]);
        // instance1's directory is blocked by a plain file.
        std::fs::write(tmp.path().join("instance1"), b"").unwrap();

        let batch = Dispatcher::new(2).run_batch("community", runs, &CountingSolver::default());

        assert_eq!(batch.len(), 2);
        for outcome in batch.outcomes() {
            match outcome.descriptor.instance.as_str() {
                "instance1" => assert!(matches!(outcome.status, RunStatus::LayoutFailed(_))),
                _ => assert_eq!(outcome.status, RunStatus::Success),
            }
        }
    }

    #[test]
    fn dispatcher_is_reusable_across_batches() {
        let tmp = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(2);
        let solver = CountingSolver::default();

        let first = dispatcher.run_batch("community", descriptors(&tmp.path().join("c"), 2, &["A"]), &solver);
        let second = dispatcher.run_batch("vaccine", descriptors(&tmp.path().join("v"), 3, &["A"]), &solver);

        assert_eq!((first.category(), first.len()), ("community", 2));
        assert_eq!((second.category(), second.len()), ("vaccine", 3));
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let batch = Dispatcher::new(4).run_batch("community", Vec::new(), &CountingSolver::default());
        assert!(batch.is_empty());
    }
}

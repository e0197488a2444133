use super::{RunSinks, Solver, SolverCommand};
use crate::config::HarnessConfig;
use crate::descriptor::RunDescriptor;
use crate::outcome::RunStatus;
use std::io;
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Launches the external solver binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessSolver {
    binary: PathBuf,
    flags: Vec<String>,
    kill_grace: Duration,
}

impl ProcessSolver {
    pub fn new(binary: impl Into<PathBuf>, flags: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            flags,
            kill_grace: Duration::from_millis(crate::config::DEFAULT_KILL_GRACE_MS),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(&config.solver_binary, config.solver_flags.clone())
            .kill_grace(Duration::from_millis(config.kill_grace_ms))
    }

    /// Time the solver may overrun its own `-t` timeout before being killed.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn command_for(&self, descriptor: &RunDescriptor) -> SolverCommand {
        SolverCommand::for_run(&self.binary, &self.flags, descriptor)
    }

    /// How long a run may take before it is killed: the solver's own timeout
    /// plus the grace period, capped at `Duration::MAX`.
    pub fn deadline_for(&self, descriptor: &RunDescriptor) -> Duration {
        Duration::from_millis(descriptor.timeout_ms).saturating_add(self.kill_grace)
    }
}

impl Solver for ProcessSolver {
    fn run(&self, descriptor: &RunDescriptor, sinks: RunSinks) -> RunStatus {
        let command = self.command_for(descriptor);
        debug!(%command, "spawning solver");

        let spawned = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::from(sinks.stdout))
            .stderr(Stdio::from(sinks.stderr))
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(%command, error = %e, "failed to spawn solver");
                return RunStatus::SpawnFailed(e.to_string());
            }
        };

        let deadline = self.deadline_for(descriptor);
        match child.wait_timeout(deadline) {
            Ok(Some(status)) => classify(status),
            Ok(None) => {
                warn!(
                    method = %descriptor.method,
                    instance = %descriptor.instance,
                    deadline_ms = deadline.as_millis() as u64,
                    "solver overran its deadline, killing it"
                );
                let _ = child.kill();
                let _ = child.wait();
                RunStatus::TimedOut
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                RunStatus::SpawnFailed(format!("waiting for solver: {e}"))
            }
        }
    }
}

fn classify(status: ExitStatus) -> RunStatus {
    match status.code() {
        Some(0) => RunStatus::Success,
        Some(code) => RunStatus::NonZeroExit(code),
        None => RunStatus::Killed(signal_of(&status)),
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Adds a polling `wait_timeout` to `Child`.
trait ChildExt {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>>;
}

impl ChildExt for Child {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn descriptor(dir: &std::path::Path, timeout_ms: u64) -> RunDescriptor {
        RunDescriptor {
            category: "community".into(),
            instance: "instance1".into(),
            method: "A".into(),
            input_path: dir.join("instance1.fzn"),
            output_dir: dir.to_path_buf(),
            error_dir: dir.to_path_buf(),
            timeout_ms,
        }
    }

    /// `sh -c <script> solver <method> <input> -t <timeout>`
    fn shell(script: &str) -> ProcessSolver {
        ProcessSolver::new("/bin/sh", vec!["-c".into(), script.into(), "solver".into()])
    }

    #[test]
    fn streams_go_to_their_own_files() {
        let tmp = tempfile::tempdir().unwrap();
        let d = descriptor(tmp.path(), 1000);
        let solver = shell(r#"echo "method=$1 timeout=$4"; echo oops >&2"#);

        let status = solver.run(&d, RunSinks::create(&d).unwrap());

        assert_eq!(status, RunStatus::Success);
        assert_eq!(fs::read_to_string(d.output_file()).unwrap(), "method=A timeout=1000\n");
        assert_eq!(fs::read_to_string(d.error_file()).unwrap(), "oops\n");
    }

    #[test]
    fn non_zero_exit_is_reported_as_data() {
        let tmp = tempfile::tempdir().unwrap();
        let d = descriptor(tmp.path(), 1000);
        let status = shell("exit 3").run(&d, RunSinks::create(&d).unwrap());
        assert_eq!(status, RunStatus::NonZeroExit(3));
    }

    #[test]
    fn missing_binary_is_spawn_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let d = descriptor(tmp.path(), 1000);
        let solver = ProcessSolver::new(tmp.path().join("no-such-solver"), vec![]);
        let status = solver.run(&d, RunSinks::create(&d).unwrap());
        assert!(matches!(status, RunStatus::SpawnFailed(_)));
    }

    #[test]
    fn hanging_solver_is_killed() {
        let tmp = tempfile::tempdir().unwrap();
        let d = descriptor(tmp.path(), 100);
        let solver = shell("sleep 30").kill_grace(Duration::from_millis(100));

        let start = Instant::now();
        let status = solver.run(&d, RunSinks::create(&d).unwrap());

        assert_eq!(status, RunStatus::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn signal_death_is_reported_as_killed() {
        let tmp = tempfile::tempdir().unwrap();
        let d = descriptor(tmp.path(), 1000);
        let status = shell("kill -9 $$").run(&d, RunSinks::create(&d).unwrap());
        assert_eq!(status, RunStatus::Killed(Some(9)));
        assert!(!status.is_harness_failure());
        assert_eq!(status.exit_code(), None);
    }

    #[test]
    fn deadline_adds_grace_without_overflow() {
        let tmp = tempfile::tempdir().unwrap();
        let solver = shell("exit 0").kill_grace(Duration::from_millis(50));
        assert_eq!(solver.deadline_for(&descriptor(tmp.path(), 100)), Duration::from_millis(150));

        let solver = solver.kill_grace(Duration::MAX);
        assert_eq!(solver.deadline_for(&descriptor(tmp.path(), u64::MAX)), Duration::MAX);
    }

    #[test]
    fn reruns_truncate_previous_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let d = descriptor(tmp.path(), 1000);
        fs::write(d.output_file(), "stale output from an earlier run\n").unwrap();

        shell("echo fresh").run(&d, RunSinks::create(&d).unwrap());

        assert_eq!(fs::read_to_string(d.output_file()).unwrap(), "fresh\n");
    }
}

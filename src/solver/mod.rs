pub mod process;

use crate::descriptor::RunDescriptor;
use crate::outcome::RunStatus;
use std::ffi::OsString;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Runs one descriptor to completion, writing its logs into the given sinks.
///
/// Implementations block the calling thread and never panic on solver
/// failures: every way a run can end maps onto a [`RunStatus`].
pub trait Solver: Send + Sync {
    fn run(&self, descriptor: &RunDescriptor, sinks: RunSinks) -> RunStatus;
}

/// The stdout and stderr files of one run.
#[derive(Debug)]
pub struct RunSinks {
    pub stdout: File,
    pub stderr: File,
}

impl RunSinks {
    /// Opens both log files of a descriptor, creating them if missing but
    /// leaving any previous content in place.
    pub fn open(descriptor: &RunDescriptor) -> io::Result<Self> {
        let open = |path: PathBuf| OpenOptions::new().write(true).create(true).truncate(false).open(path);
        Ok(Self {
            stdout: open(descriptor.output_file())?,
            stderr: open(descriptor.error_file())?,
        })
    }

    /// Opens both log files of a descriptor, replacing any previous content.
    pub fn create(descriptor: &RunDescriptor) -> io::Result<Self> {
        let sinks = Self::open(descriptor)?;
        sinks.truncate()?;
        Ok(sinks)
    }

    /// Drops whatever an earlier run left in both files.
    pub fn truncate(&self) -> io::Result<()> {
        self.stdout.set_len(0)?;
        self.stderr.set_len(0)
    }
}

/// Argument vector of one solver invocation:
/// `<binary> <flags..> <method> <input> -t <timeout_ms>`.
///
/// Each argument stays a separate token, so paths with spaces need no quoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl SolverCommand {
    pub fn for_run(binary: &Path, flags: &[String], descriptor: &RunDescriptor) -> Self {
        let mut args: Vec<OsString> = flags.iter().map(OsString::from).collect();
        args.push(OsString::from(&descriptor.method));
        args.push(descriptor.input_path.clone().into_os_string());
        args.push(OsString::from("-t"));
        args.push(OsString::from(descriptor.timeout_ms.to_string()));
        Self { program: binary.to_path_buf(), args }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for SolverCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {:?}", arg)?;
        }
        Ok(())
    }
}

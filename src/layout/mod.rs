use crate::error::{HarnessError, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const OUT_DIR: &str = "out";
pub const ERR_DIR: &str = "err";

/// Maps (instance, method) pairs of one category onto
/// `<runs_dir>/<category>/<instance>/{out,err}/<method>_{output,error}.txt`.
#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    category_dir: PathBuf,
}

/// The two directories a run of one instance writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDirs {
    pub out_dir: PathBuf,
    pub err_dir: PathBuf,
}

impl DirectoryLayout {
    pub fn new<P: AsRef<Path>>(runs_dir: P, category: &str) -> Self {
        Self { category_dir: runs_dir.as_ref().join(category) }
    }

    pub fn category_dir(&self) -> &Path {
        &self.category_dir
    }

    pub fn instance_dirs(&self, instance: &str) -> InstanceDirs {
        let instance_dir = self.category_dir.join(instance);
        InstanceDirs {
            out_dir: instance_dir.join(OUT_DIR),
            err_dir: instance_dir.join(ERR_DIR),
        }
    }

}

impl InstanceDirs {
    /// Creates both directories, tolerating ones that already exist.
    ///
    /// Safe to call from several workers at once: existing directories are
    /// not an error, only genuine filesystem failures are.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.out_dir, &self.err_dir] {
            fs::create_dir_all(dir).map_err(|source| HarnessError::LayoutCreationFailed {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

pub fn output_file_name(method: &str) -> String {
    format!("{method}_output.txt")
}

pub fn error_file_name(method: &str) -> String {
    format!("{method}_error.txt")
}

/// Inverse of [`output_file_name`].
pub fn method_from_output_file(file_name: &str) -> Option<&str> {
    file_name.strip_suffix("_output.txt").filter(|m| !m.is_empty())
}

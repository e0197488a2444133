use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::layout::{self, DirectoryLayout, InstanceDirs};
use crate::outcome::RunKey;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// One solver input file found in a category directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub path: PathBuf,
}

/// Exactly one solver invocation: which method, on which input, writing where.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RunDescriptor {
    pub category: String,
    pub instance: String,
    pub method: String,
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub error_dir: PathBuf,
    pub timeout_ms: u64,
}

impl RunDescriptor {
    pub fn key(&self) -> RunKey {
        RunKey::new(&self.method, &self.input_path)
    }

    pub fn dirs(&self) -> InstanceDirs {
        InstanceDirs { out_dir: self.output_dir.clone(), err_dir: self.error_dir.clone() }
    }

    pub fn output_file(&self) -> PathBuf {
        self.output_dir.join(layout::output_file_name(&self.method))
    }

    pub fn error_file(&self) -> PathBuf {
        self.error_dir.join(layout::error_file_name(&self.method))
    }
}

/// Lists the files in `dir` (non-recursively) whose extension is `suffix`,
/// sorted by path.
pub fn discover_instances<P: AsRef<Path>>(dir: P, suffix: &str) -> Result<Vec<Instance>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(HarnessError::DirectoryNotFound(dir.to_path_buf()));
    }

    // Read the directory
    let mut instances = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| HarnessError::io(dir, e))? {
        let path = entry.map_err(|e| HarnessError::io(dir, e))?.path();

        // Check if the path is a file and has the input extension
        if path.is_file() && path.extension().map(|ext| ext == suffix).unwrap_or(false) {
            let Some(stem) = path.file_stem() else { continue };
            instances.push(Instance {
                name: stem.to_string_lossy().into_owned(),
                path,
            });
        }
    }

    // read_dir order is platform-dependent
    instances.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(instances)
}

/// Enumerates the (instance, method) product of one category.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    category: String,
    input_dir: PathBuf,
    layout: DirectoryLayout,
    methods: Vec<String>,
    suffix: String,
    timeout_ms: u64,
}

impl DescriptorBuilder {
    pub fn new(
        category: &str,
        input_dir: impl Into<PathBuf>,
        layout: DirectoryLayout,
        methods: &[String],
    ) -> Self {
        Self {
            category: category.to_string(),
            input_dir: input_dir.into(),
            layout,
            methods: methods.to_vec(),
            suffix: crate::config::DEFAULT_INPUT_SUFFIX.to_string(),
            timeout_ms: crate::config::DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn from_config(config: &HarnessConfig, category: &str) -> Self {
        Self::new(
            category,
            config.category_input_dir(category),
            DirectoryLayout::new(&config.runs_dir, category),
            &config.methods,
        )
        .suffix(&config.input_suffix)
        .timeout_ms(config.timeout_ms)
    }

    pub fn suffix(mut self, suffix: &str) -> Self {
        self.suffix = suffix.to_string();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Produces one descriptor per (instance, method), instances outermost.
    ///
    /// Touches nothing on disk besides reading the input directory.
    pub fn build(&self) -> Result<Vec<RunDescriptor>> {
        let instances = discover_instances(&self.input_dir, &self.suffix)?;

        let mut descriptors = Vec::with_capacity(instances.len() * self.methods.len());
        for instance in &instances {
            let dirs = self.layout.instance_dirs(&instance.name);
            for method in &self.methods {
                descriptors.push(RunDescriptor {
                    category: self.category.clone(),
                    instance: instance.name.clone(),
                    method: method.clone(),
                    input_path: instance.path.clone(),
                    output_dir: dirs.out_dir.clone(),
                    error_dir: dirs.err_dir.clone(),
                    timeout_ms: self.timeout_ms,
                });
            }
        }
        Ok(descriptors)
    }
}

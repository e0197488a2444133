use crate::config::HarnessConfig;
use crate::descriptor::DescriptorBuilder;
use crate::dispatcher::{CancelToken, Dispatcher};
use crate::error::{HarnessError, Result};
use crate::outcome::BatchResult;
use crate::report::{self, MANIFEST_FILE};
use crate::solver::Solver;
use std::fs;
use tracing::{error, info, warn};

/// Result of one category: either a complete batch, or the setup error that
/// prevented any of its runs from starting.
#[derive(Debug)]
pub struct CategoryReport {
    pub category: String,
    pub result: Result<BatchResult>,
}

/// Runs every (method, instance) pair of one category.
///
/// Input discovery happens before anything is written, so a missing input
/// directory leaves no trace under the runs directory.
pub fn run_category<S>(
    config: &HarnessConfig,
    category: &str,
    dispatcher: &Dispatcher,
    solver: &S,
    cancel: &CancelToken,
) -> Result<BatchResult>
where
    S: Solver + ?Sized,
{
    let builder = DescriptorBuilder::from_config(config, category);
    let descriptors = builder.build()?;
    info!(category, runs = descriptors.len(), "discovered runs");

    let category_dir = builder.layout().category_dir();
    fs::create_dir_all(category_dir).map_err(|source| HarnessError::LayoutCreationFailed {
        path: category_dir.to_path_buf(),
        source,
    })?;

    let batch = dispatcher.run_batch_with_cancel(category, descriptors, solver, cancel);

    let manifest = category_dir.join(MANIFEST_FILE);
    if let Err(e) = report::write_batch_manifest(&batch, &manifest) {
        warn!(error = %e, "could not write batch manifest");
    }
    Ok(batch)
}

/// Runs each configured category in turn with the same dispatcher.
///
/// A category that cannot be set up is reported and skipped; the others
/// still run.
pub fn run_benchmark<S>(config: &HarnessConfig, solver: &S, cancel: &CancelToken) -> Vec<CategoryReport>
where
    S: Solver + ?Sized,
{
    let dispatcher = Dispatcher::from_config(config);

    config
        .categories
        .iter()
        .map(|category| {
            let result = run_category(config, category, &dispatcher, solver, cancel);
            if let Err(e) = &result {
                error!(category = %category, error = %e, "category skipped");
            }
            CategoryReport { category: category.clone(), result }
        })
        .collect()
}

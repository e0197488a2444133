use anyhow::{bail, Context, Result};
use clap::Parser;
use solver_benchmark_rs::benchmark::run_benchmark;
use solver_benchmark_rs::config::HarnessConfig;
use solver_benchmark_rs::dispatcher::CancelToken;
use solver_benchmark_rs::report::print_batch_summary;
use solver_benchmark_rs::solver::process::ProcessSolver;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// Runs every configured solver method on every instance of each category.
#[derive(Debug, Parser)]
#[command(name = "run_benchmark", version)]
struct Cli {
    /// JSON configuration file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Solver executable.
    #[arg(long)]
    solver: Option<PathBuf>,

    /// Directory containing one sub-directory of input files per category.
    #[arg(long)]
    input_root: Option<PathBuf>,

    /// Where `<category>/<instance>/{out,err}` trees are written.
    #[arg(long)]
    runs_dir: Option<PathBuf>,

    /// Comma-separated method selectors.
    #[arg(long, value_delimiter = ',')]
    methods: Option<Vec<String>>,

    /// Comma-separated categories.
    #[arg(long, value_delimiter = ',')]
    categories: Option<Vec<String>>,

    /// Timeout passed to the solver, in milliseconds.
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Extra milliseconds before an overrunning solver is killed.
    #[arg(long)]
    kill_grace_ms: Option<u64>,

    /// Worker pool size (default: number of cores).
    #[arg(short, long)]
    workers: Option<usize>,

    /// Stop starting new runs after the first run that does not succeed.
    #[arg(long)]
    abort_on_first_failure: bool,
}

impl Cli {
    fn into_config(self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => HarnessConfig::default(),
        };

        if let Some(solver) = self.solver {
            config.solver_binary = solver;
        }
        if let Some(input_root) = self.input_root {
            config.input_root = input_root;
        }
        if let Some(runs_dir) = self.runs_dir {
            config.runs_dir = runs_dir;
        }
        if let Some(methods) = self.methods {
            config.methods = methods;
        }
        if let Some(categories) = self.categories {
            config.categories = categories;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(kill_grace_ms) = self.kill_grace_ms {
            config.kill_grace_ms = kill_grace_ms;
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }
        config.abort_on_first_failure |= self.abort_on_first_failure;

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Cli::parse().into_config()?;
    tracing::info!(
        solver = %config.solver_binary.display(),
        workers = config.worker_count(),
        timeout_ms = config.timeout_ms,
        "starting benchmark"
    );

    let solver = ProcessSolver::from_config(&config);
    let reports = run_benchmark(&config, &solver, &CancelToken::new());

    let mut skipped = Vec::new();
    for report in &reports {
        match &report.result {
            Ok(batch) => print_batch_summary(batch),
            Err(e) => {
                eprintln!("Error: category '{}' skipped: {}", report.category, e);
                skipped.push(report.category.as_str());
            }
        }
    }

    println!("\nOutputs saved to '{}'.", config.runs_dir.display());

    if !skipped.is_empty() {
        bail!("{} categories could not be run: {}", skipped.len(), skipped.join(", "));
    }
    Ok(())
}

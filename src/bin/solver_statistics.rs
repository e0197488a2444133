use anyhow::{anyhow, Context, Result};
use clap::Parser;
use solver_benchmark_rs::config::HarnessConfig;
use solver_benchmark_rs::report::print_comparison;
use solver_benchmark_rs::statistics::{collect_statistics, Metric, StatisticsRecord};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// Parses finished solver logs and compares methods per metric.
#[derive(Debug, Parser)]
#[command(name = "solver_statistics", version)]
struct Cli {
    /// Root of the runs tree written by `run_benchmark`.
    #[arg(long, default_value = solver_benchmark_rs::config::DEFAULT_RUNS_DIR)]
    runs_dir: PathBuf,

    /// Comma-separated categories (default: the configured ones).
    #[arg(long, value_delimiter = ',')]
    categories: Option<Vec<String>>,

    /// Comma-separated method column order (default: order found on disk).
    #[arg(long, value_delimiter = ',')]
    methods: Option<Vec<String>>,

    /// Comma-separated metrics: decisions, conflicts, lbd, clause-length, time.
    #[arg(long, value_delimiter = ',')]
    metrics: Option<Vec<String>>,

    /// Print the parsed statistics as JSON instead of tables.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let categories = cli.categories.unwrap_or_else(|| HarnessConfig::default().categories);
    let methods = cli.methods.unwrap_or_default();
    let metrics = match cli.metrics {
        Some(names) => names
            .iter()
            .map(|n| Metric::from_name(n).ok_or_else(|| anyhow!("unknown metric '{n}'")))
            .collect::<Result<Vec<_>>>()?,
        None => Metric::ALL.to_vec(),
    };

    let mut all: Vec<StatisticsRecord> = Vec::new();
    for category in &categories {
        let dir = cli.runs_dir.join(category);
        let records = collect_statistics(&dir, category)
            .with_context(|| format!("reading runs of category '{category}'"))?;
        if !cli.json {
            print_comparison(category, &records, &metrics, &methods);
        }
        all.extend(records);
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&all)?);
    }
    Ok(())
}

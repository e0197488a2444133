use crate::error::{HarnessError, Result};
use crate::outcome::{BatchResult, RunStatus};
use crate::statistics::{Metric, StatisticsRecord};
use prettytable::{row, Cell, Row, Table};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "batch_results.json";

/// One line of the per-category manifest written after a batch.
#[derive(Serialize, Debug)]
pub struct ManifestEntry<'a> {
    pub instance: &'a str,
    pub method: &'a str,
    pub input_path: &'a Path,
    #[serde(flatten)]
    pub status: &'a RunStatus,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u128,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

pub fn manifest_entries(batch: &BatchResult) -> Vec<ManifestEntry<'_>> {
    batch
        .sorted()
        .into_iter()
        .map(|o| ManifestEntry {
            instance: &o.descriptor.instance,
            method: &o.descriptor.method,
            input_path: &o.descriptor.input_path,
            status: &o.status,
            exit_code: o.status.exit_code(),
            elapsed_ms: o.elapsed.as_millis(),
            stdout: o.descriptor.output_file(),
            stderr: o.descriptor.error_file(),
        })
        .collect()
}

/// Writes the batch manifest as pretty JSON, replacing any earlier one.
pub fn write_batch_manifest(batch: &BatchResult, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&manifest_entries(batch))
        .map_err(|e| HarnessError::io(path, e.into()))?;
    fs::write(path, json).map_err(|e| HarnessError::io(path, e))
}

pub fn batch_table(batch: &BatchResult) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Instance", "Method", "Status", "Elapsed (s)"]);
    for outcome in batch.sorted() {
        table.add_row(row![
            &outcome.descriptor.instance,
            &outcome.descriptor.method,
            outcome.status.to_string(),
            format!("{:.2}", outcome.elapsed.as_secs_f64()),
        ]);
    }
    table
}

pub fn print_batch_summary(batch: &BatchResult) {
    println!("\nResults for Category: {}", batch.category());
    batch_table(batch).printstd();

    let counts: Vec<String> = batch
        .status_counts()
        .into_iter()
        .map(|(label, n)| format!("{n} {label}"))
        .collect();
    println!("{} runs: {}", batch.len(), counts.join(", "));
}

/// Methods in first-seen order.
fn methods_of(records: &[StatisticsRecord]) -> Vec<&str> {
    let mut methods: Vec<&str> = Vec::new();
    for record in records {
        if !methods.contains(&record.method.as_str()) {
            methods.push(&record.method);
        }
    }
    methods
}

fn format_value(metric: Metric, value: Option<f64>) -> String {
    match value {
        Some(v) if metric.is_count() => format!("{}", v.round() as u64),
        Some(v) => format!("{v:.3}"),
        None => "-".to_string(),
    }
}

/// One row per instance, one column per method, closing with the average
/// of the values present in each column.
pub fn metric_table(records: &[StatisticsRecord], metric: Metric, method_order: &[String]) -> Table {
    let methods: Vec<&str> = if method_order.is_empty() {
        methods_of(records)
    } else {
        method_order.iter().map(String::as_str).collect()
    };

    let mut instances: Vec<&str> = records.iter().map(|r| r.instance.as_str()).collect();
    instances.sort_unstable();
    instances.dedup();

    let lookup = |instance: &str, method: &str| {
        records
            .iter()
            .find(|r| r.instance == instance && r.method == method)
            .and_then(|r| metric.value(&r.statistics))
    };

    // Header row: one column per method
    let mut table = Table::new();
    let mut header = vec![Cell::new("Instance")];
    header.extend(methods.iter().map(|m| Cell::new(m)));
    table.add_row(Row::new(header));

    // One row per instance, "-" where the log had no value
    for instance in &instances {
        let mut cells = vec![Cell::new(instance)];
        cells.extend(methods.iter().map(|m| Cell::new(&format_value(metric, lookup(instance, m)))));
        table.add_row(Row::new(cells));
    }

    // Average over the instances that reported the metric
    let mut averages = vec![Cell::new("AVERAGE")];
    for method in &methods {
        let values: Vec<f64> = instances.iter().filter_map(|i| lookup(i, method)).collect();
        let average = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
        averages.push(Cell::new(&match average {
            Some(v) => format!("{v:.3}"),
            None => "-".to_string(),
        }));
    }
    table.add_row(Row::new(averages));
    table
}

pub fn print_comparison(category: &str, records: &[StatisticsRecord], metrics: &[Metric], method_order: &[String]) {
    for &metric in metrics {
        println!("\n{} ({})", metric.label(), category);
        metric_table(records, metric, method_order).printstd();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RunDescriptor;
    use crate::outcome::RunOutcome;
    use crate::statistics::SolverStatistics;
    use std::time::Duration;

    fn record(instance: &str, method: &str, decisions: Option<u64>) -> StatisticsRecord {
        StatisticsRecord {
            category: "community".into(),
            instance: instance.into(),
            method: method.into(),
            statistics: SolverStatistics { decisions, ..Default::default() },
        }
    }

    #[test]
    fn metric_table_fills_gaps_and_averages() {
        let records = vec![
            record("instance_1", "A", Some(10)),
            record("instance_1", "B", Some(30)),
            record("instance_2", "A", Some(20)),
            record("instance_2", "B", None),
        ];

        let table = metric_table(&records, Metric::Decisions, &[]);
        let rendered = table.to_string();

        assert_eq!(table.len(), 4);
        assert!(rendered.contains("instance_2"));
        assert!(rendered.contains(" - "));
        assert!(rendered.contains("15.000"));
        assert!(rendered.contains("30.000"));
    }

    #[test]
    fn manifest_lists_every_outcome_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let mut batch = BatchResult::new("community");
        for (instance, method, status) in [
            ("i2", "A", RunStatus::Success),
            ("i1", "A", RunStatus::NonZeroExit(1)),
        ] {
            let descriptor = RunDescriptor {
                category: "community".into(),
                instance: instance.into(),
                method: method.into(),
                input_path: PathBuf::from(format!("{instance}.fzn")),
                output_dir: PathBuf::from("out"),
                error_dir: PathBuf::from("err"),
                timeout_ms: 10,
            };
            batch.insert(RunOutcome::new(descriptor, status, Duration::from_millis(5)));
        }

        let path = tmp.path().join(MANIFEST_FILE);
        write_batch_manifest(&batch, &path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["instance"], "i1");
        assert_eq!(entries[0]["status"], "non_zero_exit");
        assert_eq!(entries[0]["exit_code"], 1);
        assert_eq!(entries[1]["status"], "success");
    }
}

use crate::error::{HarnessError, Result};
use crate::layout::{self, OUT_DIR};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

const NUMBER: &str = r"([0-9]+(?:\.[0-9]+)?(?:[eE][-+]?[0-9]+)?)";

/// Statistics a solver prints at the end of its log. Fields the log does
/// not mention stay `None`.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SolverStatistics {
    pub decisions: Option<u64>,
    pub conflicts: Option<u64>,
    pub average_lbd: Option<f64>,
    pub average_learned_clause_length: Option<f64>,
    pub time_elapsed_s: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Decisions,
    Conflicts,
    AverageLbd,
    AverageLearnedClauseLength,
    Time,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Decisions,
        Metric::Conflicts,
        Metric::AverageLbd,
        Metric::AverageLearnedClauseLength,
        Metric::Time,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Decisions => "decisions",
            Metric::Conflicts => "conflicts",
            Metric::AverageLbd => "lbd",
            Metric::AverageLearnedClauseLength => "clause-length",
            Metric::Time => "time",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Decisions => "Number of Decisions",
            Metric::Conflicts => "Number of Conflicts",
            Metric::AverageLbd => "Average LBD",
            Metric::AverageLearnedClauseLength => "Average Learned Clause Length",
            Metric::Time => "Runtime (s)",
        }
    }

    pub fn from_name(name: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn value(&self, stats: &SolverStatistics) -> Option<f64> {
        match self {
            Metric::Decisions => stats.decisions.map(|v| v as f64),
            Metric::Conflicts => stats.conflicts.map(|v| v as f64),
            Metric::AverageLbd => stats.average_lbd,
            Metric::AverageLearnedClauseLength => stats.average_learned_clause_length,
            Metric::Time => stats.time_elapsed_s,
        }
    }

    /// Whether values are counts and print without decimals.
    pub fn is_count(&self) -> bool {
        matches!(self, Metric::Decisions | Metric::Conflicts)
    }
}

struct Patterns {
    decisions: Regex,
    conflicts: Regex,
    average_lbd: Regex,
    average_learned_clause_length: Regex,
    time_elapsed: Regex,
}

fn build_patterns() -> std::result::Result<Patterns, regex::Error> {
    let keyed = |key: &str| Regex::new(&format!(r"{key}={NUMBER}"));
    Ok(Patterns {
        decisions: keyed("engineStatisticsNumDecisions")?,
        conflicts: keyed("engineStatisticsNumConflicts")?,
        average_lbd: keyed("learnedClauseStatisticsAverageLbd")?,
        average_learned_clause_length: keyed("learnedClauseStatisticsAverageLearnedClauseLength")?,
        time_elapsed: Regex::new(&format!(r"% time elapsed: {NUMBER} s"))?,
    })
}

/// Compiled once; `None` if a pattern failed to compile.
fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| match build_patterns() {
            Ok(patterns) => Some(patterns),
            Err(e) => {
                tracing::error!(error = %e, "statistics patterns failed to compile");
                None
            }
        })
        .as_ref()
}

fn capture<T: std::str::FromStr>(re: &Regex, text: &str) -> Option<T> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Extracts the known statistics from a solver log.
pub fn parse_statistics(text: &str) -> SolverStatistics {
    let Some(p) = patterns() else {
        return SolverStatistics::default();
    };
    SolverStatistics {
        decisions: capture(&p.decisions, text),
        conflicts: capture(&p.conflicts, text),
        average_lbd: capture(&p.average_lbd, text),
        average_learned_clause_length: capture(&p.average_learned_clause_length, text),
        time_elapsed_s: capture(&p.time_elapsed, text),
    }
}

/// Statistics of one finished run, located by its place in the runs tree.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatisticsRecord {
    pub category: String,
    pub instance: String,
    pub method: String,
    pub statistics: SolverStatistics,
}

/// Parses every `<instance>/out/<method>_output.txt` below a category's runs
/// directory, sorted by instance then method.
pub fn collect_statistics<P: AsRef<Path>>(category_dir: P, category: &str) -> Result<Vec<StatisticsRecord>> {
    let category_dir = category_dir.as_ref();
    if !category_dir.is_dir() {
        return Err(HarnessError::DirectoryNotFound(category_dir.to_path_buf()));
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(category_dir).map_err(|e| HarnessError::io(category_dir, e))? {
        let instance_dir = entry.map_err(|e| HarnessError::io(category_dir, e))?.path();
        let out_dir = instance_dir.join(OUT_DIR);
        if !out_dir.is_dir() {
            continue;
        }
        let instance = match instance_dir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };

        for file in fs::read_dir(&out_dir).map_err(|e| HarnessError::io(&out_dir, e))? {
            let path = file.map_err(|e| HarnessError::io(&out_dir, e))?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(method) = layout::method_from_output_file(file_name) else { continue };

            // Solver logs may hold arbitrary bytes; only the ASCII statistics lines matter.
            let bytes = fs::read(&path).map_err(|e| HarnessError::io(&path, e))?;
            let text = String::from_utf8_lossy(&bytes);
            records.push(StatisticsRecord {
                category: category.to_string(),
                instance: instance.clone(),
                method: method.to_string(),
                statistics: parse_statistics(&text),
            });
        }
    }

    records.sort_by(|a, b| (&a.instance, &a.method).cmp(&(&b.instance, &b.method)));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
%% engineStatisticsNumDecisions=1532
%% engineStatisticsNumConflicts=871
%% learnedClauseStatisticsAverageLearnedClauseLength=12.5
%% learnedClauseStatisticsAverageLbd=3.25
% time elapsed: 1.042 s
";

    #[test]
    fn parses_all_fields() {
        let stats = parse_statistics(LOG);
        assert_eq!(stats.decisions, Some(1532));
        assert_eq!(stats.conflicts, Some(871));
        assert_eq!(stats.average_lbd, Some(3.25));
        assert_eq!(stats.average_learned_clause_length, Some(12.5));
        assert_eq!(stats.time_elapsed_s, Some(1.042));
    }

    #[test]
    fn missing_fields_are_none() {
        let stats = parse_statistics("=====UNKNOWN=====\n% time elapsed: 20 s\n");
        assert_eq!(stats.decisions, None);
        assert_eq!(stats.average_lbd, None);
        assert_eq!(stats.time_elapsed_s, Some(20.0));
        assert_eq!(Metric::Decisions.value(&stats), None);
    }

    #[test]
    fn metric_names_round_trip() {
        for metric in Metric::ALL {
            assert_eq!(Metric::from_name(metric.name()), Some(metric));
        }
        assert_eq!(Metric::from_name("restarts"), None);
    }

    #[test]
    fn patterns_compile() {
        assert!(build_patterns().is_ok());
    }

    #[test]
    fn invalid_utf8_log_is_parsed_lossily() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("instance_1").join("out");
        fs::create_dir_all(&out).unwrap();
        let mut garbled = b"\xff\xfe partial write\n".to_vec();
        garbled.extend_from_slice(LOG.as_bytes());
        fs::write(out.join("regin_output.txt"), garbled).unwrap();
        fs::write(out.join("basic-filter_output.txt"), LOG).unwrap();

        let records = collect_statistics(tmp.path(), "community").unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].statistics.decisions, Some(1532));
        assert_eq!(records[1].method, "regin");
        assert_eq!(records[1].statistics.decisions, Some(1532));
        assert_eq!(records[1].statistics.time_elapsed_s, Some(1.042));
    }

    #[test]
    fn collects_from_runs_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("instance_1").join("out");
        fs::create_dir_all(&out).unwrap();
        fs::create_dir_all(tmp.path().join("instance_1").join("err")).unwrap();
        fs::write(out.join("regin_output.txt"), LOG).unwrap();
        fs::write(out.join("basic-filter_output.txt"), "").unwrap();
        fs::write(out.join("README"), "ignored").unwrap();
        fs::write(tmp.path().join("batch_results.json"), "[]").unwrap();

        let records = collect_statistics(tmp.path(), "community").unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].method, "basic-filter");
        assert_eq!(records[0].statistics, SolverStatistics::default());
        assert_eq!(records[1].method, "regin");
        assert_eq!(records[1].statistics.decisions, Some(1532));
    }
}

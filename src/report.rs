//! Aggregation of persisted run records into per-agent statistics.
//!
//! Reporting is a pure function over the record set: it re-derives
//! everything from the JSON records so it can be re-run at any time,
//! including against the results of a sweep still in progress. The output
//! is written next to the records as `agent_stats.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::coverage::CoverageSummary;
use crate::error::ReportError;
use crate::result::{RunRecord, RunResult};

/// Token usage aggregated per model across an agent's runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelStats {
    pub model_name: String,
    pub completions_count: usize,
    pub prompt_token_count: u64,
    pub completion_token_count: u64,
    pub total_token_count: u64,
}

/// Derived statistics for one run record.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub run: String,
    pub repository_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub validation_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_execution_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_before: Option<CoverageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_after: Option<CoverageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_rate_delta: Option<f64>,
    pub completions_count: usize,
    pub prompt_token_count: u64,
    pub completion_token_count: u64,
    pub total_token_count: u64,
}

/// All statistics for one (agent name, agent version) pair.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStats {
    pub agent_name: String,
    pub agent_version: String,
    pub total_runs: usize,
    pub completed_runs: usize,
    pub successful_runs: usize,
    pub error_runs: usize,
    pub validation_failed_runs: usize,
    pub resolved_runs: usize,
    pub success_rate: f64,
    pub completions_count: usize,
    pub total_prompt_token_count: u64,
    pub total_completion_token_count: u64,
    pub total_token_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_agent_execution_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_line_rate_before: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_line_rate_after: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_line_rate_delta: Option<f64>,
    pub models: Vec<ModelStats>,
    pub runs: Vec<RunStats>,
}

/// Groups records by agent and derives per-run and per-agent statistics.
/// Agents are ordered by (name, version); runs keep record order within
/// each agent.
pub fn generate_report(records: &[&RunRecord]) -> Vec<AgentStats> {
    let mut grouped: BTreeMap<(String, String), Vec<&RunRecord>> = BTreeMap::new();
    for record in records {
        grouped
            .entry((record.agent_name.clone(), record.agent_version.clone()))
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .map(|((agent_name, agent_version), records)| {
            let runs: Vec<RunStats> = records.iter().map(|r| run_stats(r)).collect();

            let average_line_rate_delta = average(runs.iter().filter_map(|r| r.line_rate_delta));
            let average_line_rate_before =
                average(runs.iter().filter_map(|r| r.coverage_before.as_ref().map(|c| c.line_rate)));
            let average_line_rate_after =
                average(runs.iter().filter_map(|r| r.coverage_after.as_ref().map(|c| c.line_rate)));
            let average_agent_execution_time =
                average(runs.iter().filter_map(|r| r.agent_execution_time));

            let mut models: BTreeMap<String, ModelStats> = BTreeMap::new();
            for record in &records {
                if let Some(result) = record.completed() {
                    for metric in &result.llm_metrics {
                        let entry = models
                            .entry(metric.model_name.clone())
                            .or_insert_with(|| ModelStats {
                                model_name: metric.model_name.clone(),
                                ..Default::default()
                            });
                        entry.completions_count += 1;
                        entry.prompt_token_count += metric.prompt_token_count;
                        entry.completion_token_count += metric.completion_token_count;
                        entry.total_token_count += metric.total_token_count;
                    }
                }
            }

            let successful_runs = runs.iter().filter(|r| r.successful).count();
            AgentStats {
                agent_name,
                agent_version,
                total_runs: runs.len(),
                completed_runs: runs.iter().filter(|r| r.error.is_none()).count(),
                successful_runs,
                error_runs: runs.iter().filter(|r| r.error.is_some()).count(),
                validation_failed_runs: runs.iter().filter(|r| r.validation_failed).count(),
                resolved_runs: runs.iter().filter(|r| r.resolved == Some(true)).count(),
                success_rate: if runs.is_empty() {
                    0.0
                } else {
                    successful_runs as f64 / runs.len() as f64
                },
                completions_count: runs.iter().map(|r| r.completions_count).sum(),
                total_prompt_token_count: runs.iter().map(|r| r.prompt_token_count).sum(),
                total_completion_token_count: runs
                    .iter()
                    .map(|r| r.completion_token_count)
                    .sum(),
                total_token_count: runs.iter().map(|r| r.total_token_count).sum(),
                average_agent_execution_time,
                average_line_rate_before,
                average_line_rate_after,
                average_line_rate_delta,
                models: models.into_values().collect(),
                runs,
            }
        })
        .collect()
}

/// Generates the report and writes it as `agent_stats.json` under
/// `output_path`. Fails if there are no records to aggregate.
pub fn write_report(records: &[&RunRecord], output_path: &Path) -> Result<PathBuf, ReportError> {
    if records.is_empty() {
        return Err(ReportError::NoResults(output_path.to_path_buf()));
    }

    let stats = generate_report(records);
    let path = output_path.join("agent_stats.json");
    fs::write(&path, serde_json::to_string_pretty(&stats)?)?;
    info!(path = %path.display(), agents = stats.len(), "Wrote report");
    Ok(path)
}

fn average(values: impl Iterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn run_stats(record: &RunRecord) -> RunStats {
    let mut stats = RunStats {
        run: record.run.clone(),
        repository_url: record.repository_url.clone(),
        instance_id: record.instance_id.clone(),
        successful: false,
        error: None,
        validation_failed: false,
        resolved: None,
        agent_execution_time: None,
        coverage_before: None,
        coverage_after: None,
        line_rate_delta: None,
        completions_count: 0,
        prompt_token_count: 0,
        completion_token_count: 0,
        total_token_count: 0,
    };

    let result: &RunResult = match &record.result {
        crate::result::RunOutcome::Error { error, .. } => {
            stats.error = Some(error.clone());
            return stats;
        }
        crate::result::RunOutcome::Completed(result) => result,
    };

    stats.validation_failed = result.validation_failed;
    stats.resolved = result.resolved;
    stats.agent_execution_time = result.agent_execution_time;
    stats.completions_count = result.llm_metrics.len();
    stats.prompt_token_count = result.llm_metrics.iter().map(|m| m.prompt_token_count).sum();
    stats.completion_token_count = result
        .llm_metrics
        .iter()
        .map(|m| m.completion_token_count)
        .sum();
    stats.total_token_count = result.llm_metrics.iter().map(|m| m.total_token_count).sum();

    stats.coverage_before = result
        .initial_coverage_tool_output
        .as_deref()
        .and_then(CoverageSummary::parse);
    stats.coverage_after = result
        .final_coverage_tool_output
        .as_deref()
        .and_then(CoverageSummary::parse);
    if let (Some(before), Some(after)) = (&stats.coverage_before, &stats.coverage_after) {
        stats.line_rate_delta = Some(after.line_rate - before.line_rate);
    }

    // A run counts as successful when it produced a readable coverage
    // snapshot (coverage mode) or resolved its instance (issue mode).
    // Validation failures never count, even with output attached.
    stats.successful =
        !result.validation_failed && (stats.coverage_after.is_some() || result.resolved == Some(true));

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{LlmMetric, RunOutcome, RunResult};
    use tempfile::TempDir;

    fn record(run: &str, agent: &str, result: RunOutcome) -> RunRecord {
        RunRecord {
            run: run.to_string(),
            agent_name: agent.to_string(),
            agent_version: "1.0".to_string(),
            repository_url: "https://github.com/psf/requests".to_string(),
            instance_id: None,
            result,
        }
    }

    fn coverage_xml(line_rate: f64) -> String {
        format!(r#"<coverage line-rate="{line_rate}" lines-valid="100" lines-covered="80">"#)
    }

    #[test]
    fn test_coverage_run_success_and_delta() {
        let result = RunResult {
            initial_coverage_tool_output: Some(coverage_xml(0.50)),
            final_coverage_tool_output: Some(coverage_xml(0.75)),
            llm_metrics: vec![LlmMetric {
                model_name: "gpt-4".to_string(),
                prompt_token_count: 100,
                completion_token_count: 50,
                total_token_count: 150,
            }],
            ..Default::default()
        };
        let records = vec![record("aider-1.0-requests-0", "aider", RunOutcome::Completed(Box::new(result)))];
        let refs: Vec<&RunRecord> = records.iter().collect();

        let stats = generate_report(&refs);
        assert_eq!(stats.len(), 1);
        let agent = &stats[0];
        assert_eq!(agent.successful_runs, 1);
        assert_eq!(agent.runs[0].total_token_count, 150);
        let delta = agent.runs[0].line_rate_delta.unwrap();
        assert!((delta - 0.25).abs() < 1e-9);
        assert_eq!(agent.average_line_rate_delta, agent.runs[0].line_rate_delta);
        assert_eq!(agent.success_rate, 1.0);
        assert_eq!(agent.total_token_count, 150);
        assert_eq!(agent.average_line_rate_before, Some(0.50));
        assert_eq!(agent.average_line_rate_after, Some(0.75));
    }

    #[test]
    fn test_unreadable_final_coverage_is_not_successful() {
        let result = RunResult {
            initial_coverage_tool_output: Some(coverage_xml(0.50)),
            final_coverage_tool_output: Some("pytest crashed".to_string()),
            ..Default::default()
        };
        let records = vec![record("aider-1.0-requests-0", "aider", RunOutcome::Completed(Box::new(result)))];
        let refs: Vec<&RunRecord> = records.iter().collect();

        let stats = generate_report(&refs);
        assert_eq!(stats[0].successful_runs, 0);
        assert!(stats[0].runs[0].line_rate_delta.is_none());
    }

    #[test]
    fn test_resolved_run_is_successful_without_coverage() {
        let result = RunResult {
            resolved: Some(true),
            ..Default::default()
        };
        let records = vec![record("aider-1.0-x-0", "aider", RunOutcome::Completed(Box::new(result)))];
        let refs: Vec<&RunRecord> = records.iter().collect();

        let stats = generate_report(&refs);
        assert_eq!(stats[0].successful_runs, 1);
        assert_eq!(stats[0].resolved_runs, 1);
    }

    #[test]
    fn test_errors_and_validation_failures_counted_separately() {
        let records = vec![
            record(
                "aider-1.0-r-0",
                "aider",
                RunOutcome::Error {
                    error: "boom".to_string(),
                    backtrace: String::new(),
                },
            ),
            record(
                "aider-1.0-r-1",
                "aider",
                RunOutcome::Completed(Box::new(RunResult {
                    validation_failed: true,
                    ..Default::default()
                })),
            ),
        ];
        let refs: Vec<&RunRecord> = records.iter().collect();

        let stats = generate_report(&refs);
        let agent = &stats[0];
        assert_eq!(agent.total_runs, 2);
        assert_eq!(agent.error_runs, 1);
        assert_eq!(agent.validation_failed_runs, 1);
        assert_eq!(agent.successful_runs, 0);
        assert_eq!(agent.completed_runs, 1);
        assert_eq!(agent.success_rate, 0.0);
        assert_eq!(agent.runs[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_groups_by_agent_and_aggregates_models() {
        let metric = |model: &str, total: u64| LlmMetric {
            model_name: model.to_string(),
            prompt_token_count: total / 2,
            completion_token_count: total / 2,
            total_token_count: total,
        };
        let records = vec![
            record(
                "aider-1.0-r-0",
                "aider",
                RunOutcome::Completed(Box::new(RunResult {
                    llm_metrics: vec![metric("gpt-4", 100), metric("gpt-4", 40)],
                    ..Default::default()
                })),
            ),
            record(
                "sweagent-1.0-r-0",
                "sweagent",
                RunOutcome::Completed(Box::new(RunResult {
                    llm_metrics: vec![metric("claude-3", 60)],
                    ..Default::default()
                })),
            ),
        ];
        let refs: Vec<&RunRecord> = records.iter().collect();

        let stats = generate_report(&refs);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].agent_name, "aider");
        assert_eq!(stats[0].models.len(), 1);
        assert_eq!(stats[0].models[0].total_token_count, 140);
        assert_eq!(stats[1].agent_name, "sweagent");
        assert_eq!(stats[1].models[0].model_name, "claude-3");
    }

    #[test]
    fn test_completions_and_token_totals_roll_up_per_run_and_agent() {
        let metric = |prompt: u64, completion: u64| LlmMetric {
            model_name: "gpt-4".to_string(),
            prompt_token_count: prompt,
            completion_token_count: completion,
            total_token_count: prompt + completion,
        };
        let records = vec![record(
            "aider-1.0-r-0",
            "aider",
            RunOutcome::Completed(Box::new(RunResult {
                llm_metrics: vec![metric(100, 30), metric(200, 70)],
                ..Default::default()
            })),
        )];
        let refs: Vec<&RunRecord> = records.iter().collect();

        let stats = generate_report(&refs);
        let agent = &stats[0];

        let run = &agent.runs[0];
        assert_eq!(run.completions_count, 2);
        assert_eq!(run.prompt_token_count, 300);
        assert_eq!(run.completion_token_count, 100);
        assert_eq!(run.total_token_count, 400);

        assert_eq!(agent.completions_count, 2);
        assert_eq!(agent.total_prompt_token_count, 300);
        assert_eq!(agent.total_completion_token_count, 100);
        assert_eq!(agent.total_token_count, 400);

        assert_eq!(agent.models[0].completions_count, 2);
        assert_eq!(agent.models[0].prompt_token_count, 300);
    }

    #[test]
    fn test_write_report_requires_records() {
        let tmp = TempDir::new().unwrap();
        let err = write_report(&[], tmp.path()).unwrap_err();
        assert!(matches!(err, ReportError::NoResults(_)));

        let records = vec![record(
            "aider-1.0-r-0",
            "aider",
            RunOutcome::Completed(Box::new(RunResult::default())),
        )];
        let refs: Vec<&RunRecord> = records.iter().collect();
        let path = write_report(&refs, tmp.path()).unwrap();
        assert!(path.ends_with("agent_stats.json"));
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("\"agent_name\": \"aider\""));
    }
}

//! SWE-bench instance loading and prediction export.
//!
//! Dataset download itself is external; instances are consumed from a
//! line-delimited JSON dump of the published dataset. The two test-state
//! fields (`FAIL_TO_PASS`, `PASS_TO_PASS`) appear both as JSON arrays and
//! as doubly-encoded JSON strings in the wild, so deserialization accepts
//! either.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::error::{ConfigError, ReportError};
use crate::result::RunRecord;

/// One issue-resolution benchmark instance, sourced from the dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweBenchInstance {
    pub repo: String,
    pub instance_id: String,
    pub base_commit: String,
    /// The ground-truth patch resolving the issue.
    pub patch: String,
    /// Test-only patch introducing the tests that must go from fail to pass.
    pub test_patch: String,
    pub problem_statement: String,
    #[serde(default)]
    pub hints_text: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "FAIL_TO_PASS", deserialize_with = "list_or_json_string")]
    pub fail_to_pass: Vec<String>,
    #[serde(rename = "PASS_TO_PASS", deserialize_with = "list_or_json_string")]
    pub pass_to_pass: Vec<String>,
    #[serde(default)]
    pub environment_setup_commit: Option<String>,
}

impl SweBenchInstance {
    /// The repository template name this instance resolves against, e.g.
    /// `astropy/astropy` + `5.1` → `swe-bench/astropy_5.1`.
    pub fn repository_template_name(&self) -> String {
        let short_name = self.repo.split('/').next_back().unwrap_or(&self.repo);
        format!("swe-bench/{}_{}", short_name, self.version)
    }
}

fn list_or_json_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Encoded(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(list) => Ok(list),
        Raw::Encoded(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
    }
}

/// Loads instances from a line-delimited JSON dataset dump.
pub fn load_instances(path: &Path) -> Result<Vec<SweBenchInstance>, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut instances = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        instances.push(serde_json::from_str(line)?);
    }
    info!(count = instances.len(), path = %path.display(), "Loaded SWE-bench instances");
    Ok(instances)
}

/// One line of the prediction file consumed by the downstream scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub instance_id: String,
    pub model_name_or_path: String,
    pub model_patch: String,
}

/// Writes a line-delimited prediction file mapping instance id to the
/// produced diff, for issue-resolution sweeps. Error records and runs
/// without a diff are skipped.
pub fn export_predictions(records: &[&RunRecord], path: &Path) -> Result<usize, ReportError> {
    let mut file = fs::File::create(path)?;
    let mut written = 0;

    for record in records {
        let Some(instance_id) = &record.instance_id else {
            continue;
        };
        let Some(result) = record.completed() else {
            continue;
        };
        let Some(diff) = &result.git_diff else {
            continue;
        };

        let prediction = Prediction {
            instance_id: instance_id.clone(),
            model_name_or_path: record.agent_name.clone(),
            model_patch: diff.clone(),
        };
        serde_json::to_writer(&mut file, &prediction)?;
        file.write_all(b"\n")?;
        written += 1;
    }

    info!(count = written, path = %path.display(), "Exported predictions");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{RunOutcome, RunResult};
    use tempfile::TempDir;

    fn instance_json(encoded_sets: bool) -> String {
        let sets = if encoded_sets {
            r#""FAIL_TO_PASS": "[\"test_a\"]", "PASS_TO_PASS": "[\"test_b\", \"test_c\"]""#
        } else {
            r#""FAIL_TO_PASS": ["test_a"], "PASS_TO_PASS": ["test_b", "test_c"]"#
        };
        format!(
            r#"{{"repo": "psf/requests", "instance_id": "psf__requests-1142",
                "base_commit": "abc123", "patch": "diff", "test_patch": "test diff",
                "problem_statement": "it breaks", "version": "2.3", {sets}}}"#
        )
        .replace('\n', " ")
    }

    #[test]
    fn test_parse_instance_with_array_sets() {
        let instance: SweBenchInstance = serde_json::from_str(&instance_json(false)).unwrap();
        assert_eq!(instance.fail_to_pass, vec!["test_a"]);
        assert_eq!(instance.pass_to_pass, vec!["test_b", "test_c"]);
    }

    #[test]
    fn test_parse_instance_with_doubly_encoded_sets() {
        let instance: SweBenchInstance = serde_json::from_str(&instance_json(true)).unwrap();
        assert_eq!(instance.fail_to_pass, vec!["test_a"]);
        assert_eq!(instance.pass_to_pass, vec!["test_b", "test_c"]);
    }

    #[test]
    fn test_repository_template_name() {
        let instance: SweBenchInstance = serde_json::from_str(&instance_json(false)).unwrap();
        assert_eq!(instance.repository_template_name(), "swe-bench/requests_2.3");
    }

    #[test]
    fn test_load_instances_skips_blank_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dataset.jsonl");
        fs::write(
            &path,
            format!("{}\n\n{}\n", instance_json(false), instance_json(true)),
        )
        .unwrap();

        let instances = load_instances(&path).unwrap();
        assert_eq!(instances.len(), 2);
    }

    #[test]
    fn test_export_predictions_skips_errors_and_missing_diffs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("predictions.jsonl");

        let with_diff = RunRecord {
            run: "agent-1.0-psf__requests-1142-0".to_string(),
            agent_name: "agent".to_string(),
            agent_version: "1.0".to_string(),
            repository_url: "https://github.com/psf/requests".to_string(),
            instance_id: Some("psf__requests-1142".to_string()),
            result: RunOutcome::Completed(Box::new(RunResult {
                git_diff: Some("diff --git".to_string()),
                resolved: Some(true),
                ..Default::default()
            })),
        };
        let errored = RunRecord {
            result: RunOutcome::Error {
                error: "boom".to_string(),
                backtrace: String::new(),
            },
            ..with_diff.clone()
        };

        let written = export_predictions(&[&with_diff, &errored], &path).unwrap();
        assert_eq!(written, 1);

        let content = fs::read_to_string(&path).unwrap();
        let prediction: Prediction = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(prediction.instance_id, "psf__requests-1142");
        assert_eq!(prediction.model_name_or_path, "agent");
    }
}

//! Persisted run records.
//!
//! One record is written per run key. A record is either a structured
//! result from a completed run (success or validation failure) or a
//! structured error captured at the sweep boundary. Records are append-only
//! by key and durable across process restarts; the result store rebuilds
//! its index from them on startup.

use serde::{Deserialize, Serialize};

/// Usage metrics for one LLM completion, reported by the metering proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMetric {
    pub model_name: String,
    pub prompt_token_count: u64,
    pub completion_token_count: u64,
    pub total_token_count: u64,
}

/// The structured result of one completed benchmark run.
///
/// The elapsed time, git diff and LLM metrics are present on every run
/// that reached the done phase; a run aborted by a failed pre-condition
/// check carries `validation_failed` and the captured output instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_coverage_tool_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_coverage_tool_output: Option<String>,
    #[serde(default)]
    pub agent_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_diff: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub llm_metrics: Vec<LlmMetric>,
    /// Set when the benchmark instance's expected pre/post test states did
    /// not hold. Distinct from an error: the harness worked, the instance
    /// (or its environment template) did not.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub validation_failed: bool,
    /// Issue-resolution mode only: whether the agent's patch satisfied both
    /// success criteria. `Some(false)` records a regression or an
    /// incomplete fix, not an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
    /// Raw output of the last test command run, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_output: Option<String>,
}

/// Either a completed result or a captured error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Error { error: String, backtrace: String },
    Completed(Box<RunResult>),
}

/// The durable outcome of one run key. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: String,
    pub agent_name: String,
    pub agent_version: String,
    pub repository_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub result: RunOutcome,
}

impl RunRecord {
    pub fn is_error(&self) -> bool {
        matches!(self.result, RunOutcome::Error { .. })
    }

    pub fn completed(&self) -> Option<&RunResult> {
        match &self.result {
            RunOutcome::Completed(result) => Some(result),
            RunOutcome::Error { .. } => None,
        }
    }
}

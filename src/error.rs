//! Error types for the agent test harness.
//!
//! Each subsystem has its own error enum:
//! - Configuration loading and template layering
//! - Service provisioning (workspace provider, LLM proxy)
//! - Single-run execution
//! - The durable result store
//! - Result reporting and exports
//!
//! Errors raised inside one run are caught at the sweep boundary and
//! converted to persisted error records; only configuration errors are
//! fatal to the whole process.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Config cannot be empty")]
    Empty,

    #[error("Config must contain '{0}'")]
    MissingField(&'static str),

    #[error("'{field}' has the wrong type: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("'{0}' section cannot be empty")]
    EmptySection(&'static str),

    #[error("{entity} '{name}' is missing required field '{field}'")]
    MissingEntityField {
        entity: &'static str,
        name: String,
        field: &'static str,
    },

    #[error("Repository '{0}' has no (source, test) file pairs for coverage mode")]
    NoFilePairs(String),

    #[error("No repository template found for '{repo}' version '{version}' at {path}")]
    TemplateNotFound {
        repo: String,
        version: String,
        path: PathBuf,
    },

    #[error("Both --agent and --repository must be specified together")]
    PartialOverride,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while provisioning or talking to the external
/// services (workspace provider, LLM proxy).
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to spawn {service}: {source}")]
    Spawn {
        service: &'static str,
        source: std::io::Error,
    },

    #[error("{service} failed to start within {seconds}s")]
    StartupTimeout { service: &'static str, seconds: u64 },

    #[error("{service} process exited early")]
    ServiceExited { service: &'static str },

    #[error("{service} returned status code {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Malformed response from {service}: {message}")]
    MalformedResponse {
        service: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that are fatal to a single run.
///
/// These never abort the sweep; the driving loop converts them into a
/// persisted error record keyed by the run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Failed to establish initial git ref: {0}")]
    Baseline(String),

    #[error("Test command failed: {0}")]
    TestCommand(String),

    #[error("Failed to read coverage report: {0}")]
    CoverageReport(String),

    #[error("Git diff failed: {0}")]
    GitDiff(String),
}

/// Errors that can occur in the durable result store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Malformed run record at {path}: {source}")]
    MalformedRecord {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while generating reports and exports.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("No results found at {0}")]
    NoResults(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

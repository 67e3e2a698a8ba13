//! Typed configuration entities.
//!
//! Agents, repository targets and the run mode are immutable records built
//! once at configuration-load time. The mode a run executes in is a tagged
//! variant selected per target, so a run can never silently execute neither
//! (or both) of the two flows.

use serde::{Deserialize, Serialize};

use crate::swe_bench::SweBenchInstance;

/// A coding agent under benchmark.
///
/// `setup_script` is prepended into the workspace setup; `command` is the
/// opaque invocation template executed inside the workspace for each
/// agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub setup_script: String,
    pub command: String,
}

/// A (source file, test file) pair for coverage mode, serialized as a
/// two-element array in config templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePair(pub String, pub String);

impl FilePair {
    pub fn source(&self) -> &str {
        &self.0
    }

    pub fn test_file(&self) -> &str {
        &self.1
    }
}

/// A repository a benchmark run executes against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub setup_script: String,
    pub test_command: String,
    #[serde(default)]
    pub coverage_report_path: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<FilePair>>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// The execution mode of one run, selected once per target.
#[derive(Debug, Clone)]
pub enum RunMode {
    /// Iterate (source, test) file pairs, measuring coverage improvement.
    Coverage { files: Vec<FilePair> },
    /// Resolve a SWE-bench instance and validate the produced patch.
    IssueResolution { instance: Box<SweBenchInstance> },
}

/// One unit the scheduler enumerates: a repository checkout plus the mode
/// to execute in it.
#[derive(Debug, Clone)]
pub struct Target {
    pub repository: Repository,
    pub mode: RunMode,
}

impl Target {
    /// Stable identifier used in run names: the instance id in
    /// issue-resolution mode, the repository name otherwise.
    pub fn id(&self) -> &str {
        match &self.mode {
            RunMode::Coverage { .. } => &self.repository.name,
            RunMode::IssueResolution { instance } => &instance.instance_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_pair_accessors() {
        let pair = FilePair("src/lib.rs".to_string(), "tests/lib_test.rs".to_string());
        assert_eq!(pair.source(), "src/lib.rs");
        assert_eq!(pair.test_file(), "tests/lib_test.rs");
    }

    #[test]
    fn test_file_pair_yaml_round_trip() {
        let yaml = "- [src/a.py, tests/test_a.py]\n- [src/b.py, tests/test_b.py]";
        let pairs: Vec<FilePair> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].source(), "src/a.py");
        assert_eq!(pairs[1].test_file(), "tests/test_b.py");
    }

    #[test]
    fn test_target_id_coverage_mode() {
        let repo = Repository {
            name: "requests".to_string(),
            url: "https://github.com/psf/requests".to_string(),
            setup_script: String::new(),
            test_command: "pytest".to_string(),
            coverage_report_path: Some("coverage.xml".to_string()),
            files: None,
            platform: None,
        };
        let target = Target {
            repository: repo,
            mode: RunMode::Coverage { files: vec![] },
        };
        assert_eq!(target.id(), "requests");
    }
}

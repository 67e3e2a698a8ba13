//! Benchmark configuration loading, template layering and validation.
//!
//! Configuration is YAML, layered per entry: a base template selected by
//! name, then an optional platform template that only fills gaps (lowest
//! precedence), with the user-supplied overrides winning everywhere.
//! Entities come out as typed, immutable records validated once here;
//! nothing downstream touches raw mappings. Validation failures are fatal
//! before any run starts.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::ConfigError;
use crate::model::{Agent, Repository, RunMode, Target};
use crate::swe_bench;

const DEFAULT_TEMPLATES_PATH: &str = "templates";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Fully validated harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Benchmark name, used as the results subdirectory.
    pub name: String,
    pub agents: Vec<Agent>,
    pub repositories: Vec<Repository>,
    pub runs: usize,
    pub results_path: PathBuf,
    pub templates_path: PathBuf,
    /// Line-delimited dataset dump enabling issue-resolution mode.
    pub swe_bench_dataset: Option<PathBuf>,
    /// Upper bound on remote command execution time.
    pub command_timeout_secs: u64,
}

impl HarnessConfig {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let raw: Value = serde_yaml::from_str(&content)?;
        Self::from_value(raw)
    }

    /// Builds the one-run config used by `--agent X --repository Y`.
    pub fn from_agent_repository(
        agent: &str,
        repository: &str,
        templates_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut raw = Mapping::new();
        raw.insert(
            Value::from("agents"),
            Value::Sequence(vec![singleton_mapping("name", agent)]),
        );
        raw.insert(
            Value::from("repositories"),
            Value::Sequence(vec![singleton_mapping("name", repository)]),
        );
        raw.insert(Value::from("runs"), Value::from(1));
        raw.insert(Value::from("results_path"), Value::from("results"));
        if let Some(templates_path) = templates_path {
            raw.insert(
                Value::from("templates_path"),
                Value::from(templates_path.to_string_lossy().to_string()),
            );
        }
        Self::from_value(Value::Mapping(raw))
    }

    /// Validates the raw document and resolves template layering.
    pub fn from_value(raw: Value) -> Result<Self, ConfigError> {
        let root = raw.as_mapping().ok_or(ConfigError::Empty)?;
        if root.is_empty() {
            return Err(ConfigError::Empty);
        }

        let templates_path = match root.get("templates_path") {
            Some(value) => PathBuf::from(require_str(value, "templates_path")?),
            None => PathBuf::from(DEFAULT_TEMPLATES_PATH),
        };

        let swe_bench_dataset = match root.get("swe_bench_dataset") {
            Some(value) => Some(PathBuf::from(require_str(value, "swe_bench_dataset")?)),
            None => None,
        };

        let runs = root
            .get("runs")
            .ok_or(ConfigError::MissingField("runs"))?
            .as_u64()
            .ok_or(ConfigError::WrongType {
                field: "runs",
                expected: "integer",
            })? as usize;

        let results_path = PathBuf::from(require_str(
            root.get("results_path")
                .ok_or(ConfigError::MissingField("results_path"))?,
            "results_path",
        )?);

        let agents_raw = require_sequence(root, "agents")?;
        let agents = agents_raw
            .iter()
            .map(|entry| load_agent(entry, &templates_path))
            .collect::<Result<Vec<_>, _>>()?;

        // In issue-resolution mode repositories come from per-instance
        // templates instead of the config file.
        let repositories = if swe_bench_dataset.is_some() && root.get("repositories").is_none() {
            Vec::new()
        } else {
            require_sequence(root, "repositories")?
                .iter()
                .map(|entry| load_repository(entry, &templates_path))
                .collect::<Result<Vec<_>, _>>()?
        };

        let name = match root.get("name") {
            Some(value) => require_str(value, "name")?.to_string(),
            None => "benchmark".to_string(),
        };

        let command_timeout_secs = match root.get("command_timeout_secs") {
            Some(value) => value.as_u64().ok_or(ConfigError::WrongType {
                field: "command_timeout_secs",
                expected: "integer",
            })?,
            None => DEFAULT_COMMAND_TIMEOUT_SECS,
        };

        Ok(Self {
            name,
            agents,
            repositories,
            runs,
            results_path,
            templates_path,
            swe_bench_dataset,
            command_timeout_secs,
        })
    }

    /// Builds the scheduled target list: SWE-bench instances when a dataset
    /// is configured, coverage-mode repositories otherwise.
    pub fn targets(&self) -> Result<Vec<Target>, ConfigError> {
        if let Some(dataset) = &self.swe_bench_dataset {
            let instances = swe_bench::load_instances(dataset)?;
            let mut targets = Vec::with_capacity(instances.len());
            for instance in instances {
                let template_name = instance.repository_template_name();
                let template_path = self
                    .templates_path
                    .join("repositories")
                    .join(format!("{template_name}.yaml"));
                if !template_path.exists() {
                    return Err(ConfigError::TemplateNotFound {
                        repo: instance.repo.clone(),
                        version: instance.version.clone(),
                        path: template_path,
                    });
                }
                let entry: Value = serde_yaml::from_str(&std::fs::read_to_string(&template_path)?)?;
                let repository = load_repository(&entry, &self.templates_path)?;
                targets.push(Target {
                    repository,
                    mode: RunMode::IssueResolution {
                        instance: Box::new(instance),
                    },
                });
            }
            return Ok(targets);
        }

        let mut targets = Vec::with_capacity(self.repositories.len());
        for repository in &self.repositories {
            let files = repository
                .files
                .clone()
                .filter(|files| !files.is_empty())
                .ok_or_else(|| ConfigError::NoFilePairs(repository.name.clone()))?;
            if repository.coverage_report_path.is_none() {
                return Err(ConfigError::MissingEntityField {
                    entity: "repository",
                    name: repository.name.clone(),
                    field: "coverage_report_path",
                });
            }
            targets.push(Target {
                repository: repository.clone(),
                mode: RunMode::Coverage { files },
            });
        }
        Ok(targets)
    }
}

fn singleton_mapping(key: &str, value: &str) -> Value {
    let mut mapping = Mapping::new();
    mapping.insert(Value::from(key), Value::from(value));
    Value::Mapping(mapping)
}

fn require_str<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, ConfigError> {
    value.as_str().ok_or(ConfigError::WrongType {
        field,
        expected: "string",
    })
}

fn require_sequence<'a>(
    root: &'a Mapping,
    field: &'static str,
) -> Result<&'a Vec<Value>, ConfigError> {
    let sequence = root
        .get(field)
        .ok_or(ConfigError::MissingField(field))?
        .as_sequence()
        .ok_or(ConfigError::WrongType {
            field,
            expected: "list",
        })?;
    if sequence.is_empty() {
        return Err(ConfigError::EmptySection(field));
    }
    Ok(sequence)
}

/// Loads a template YAML mapping if it exists.
fn load_template(
    templates_path: &Path,
    template_type: &str,
    name: &str,
) -> Result<Option<Mapping>, ConfigError> {
    let path = templates_path.join(template_type).join(format!("{name}.yaml"));
    if !path.exists() {
        return Ok(None);
    }
    debug!(template = %path.display(), "Loading template");
    let value: Value = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
    Ok(value.as_mapping().cloned())
}

/// Overlays `overrides` on top of `base`, overrides winning.
fn merge_over(mut base: Mapping, overrides: &Mapping) -> Mapping {
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
    base
}

/// Inserts entries from `filler` only where `target` has no value yet.
fn fill_gaps(target: &mut Mapping, filler: &Mapping) {
    for (key, value) in filler {
        if !target.contains_key(key) {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn entry_name(entry: &Mapping) -> Option<&str> {
    entry.get("name").and_then(Value::as_str)
}

fn load_agent(entry: &Value, templates_path: &Path) -> Result<Agent, ConfigError> {
    let overrides = entry.as_mapping().ok_or(ConfigError::WrongType {
        field: "agents",
        expected: "list of mappings",
    })?;

    let mut merged = Mapping::new();
    if let Some(name) = entry_name(overrides) {
        if let Some(template) = load_template(templates_path, "agents", name)? {
            merged = template;
        }
    }
    merged = merge_over(merged, overrides);

    let name = entry_name(&merged).unwrap_or("<unnamed>").to_string();
    for field in ["name", "version", "command"] {
        if !merged.contains_key(field) {
            return Err(ConfigError::MissingEntityField {
                entity: "agent",
                name: name.clone(),
                field,
            });
        }
    }

    Ok(serde_yaml::from_value(Value::Mapping(merged))?)
}

fn load_repository(entry: &Value, templates_path: &Path) -> Result<Repository, ConfigError> {
    let overrides = entry.as_mapping().ok_or(ConfigError::WrongType {
        field: "repositories",
        expected: "list of mappings",
    })?;

    let mut merged = Mapping::new();
    if let Some(name) = entry_name(overrides) {
        if let Some(template) = load_template(templates_path, "repositories", name)? {
            merged = template;
        }
    }
    merged = merge_over(merged, overrides);

    // The platform template has the lowest precedence: it only fills keys
    // neither the repository template nor the overrides set.
    if let Some(platform) = merged.get("platform").and_then(Value::as_str) {
        if let Some(platform_template) = load_template(templates_path, "platforms", platform)? {
            fill_gaps(&mut merged, &platform_template);
        }
    }

    let name = entry_name(&merged).unwrap_or("<unnamed>").to_string();
    for field in ["name", "url", "test_command"] {
        if !merged.contains_key(field) {
            return Err(ConfigError::MissingEntityField {
                entity: "repository",
                name: name.clone(),
                field,
            });
        }
    }

    Ok(serde_yaml::from_value(Value::Mapping(merged))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_template(dir: &Path, template_type: &str, name: &str, content: &str) {
        let type_dir = dir.join(template_type);
        fs::create_dir_all(&type_dir).unwrap();
        fs::write(type_dir.join(format!("{name}.yaml")), content).unwrap();
    }

    fn base_config(templates: &Path) -> String {
        format!(
            "\
templates_path: {}
agents:
  - name: aider
repositories:
  - name: requests
runs: 2
results_path: results
",
            templates.display()
        )
    }

    fn seed_templates(templates: &Path) {
        write_template(
            templates,
            "agents",
            "aider",
            "name: aider\nversion: '0.50'\ncommand: aider-wrapper\nsetup_script: pip install aider\n",
        );
        write_template(
            templates,
            "repositories",
            "requests",
            "\
name: requests
url: https://github.com/psf/requests
platform: python
files:
  - [src/requests/api.py, tests/test_api.py]
",
        );
        write_template(
            templates,
            "platforms",
            "python",
            "\
test_command: pytest --cov
coverage_report_path: coverage.xml
setup_script: pip install -e .
",
        );
    }

    #[test]
    fn test_template_layering_with_platform_filling_gaps() {
        let tmp = TempDir::new().unwrap();
        seed_templates(tmp.path());

        let raw: Value = serde_yaml::from_str(&base_config(tmp.path())).unwrap();
        let config = HarnessConfig::from_value(raw).unwrap();

        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].version, "0.50");

        let repo = &config.repositories[0];
        assert_eq!(repo.url, "https://github.com/psf/requests");
        // Filled in by the platform template.
        assert_eq!(repo.test_command, "pytest --cov");
        assert_eq!(repo.coverage_report_path.as_deref(), Some("coverage.xml"));
    }

    #[test]
    fn test_user_overrides_beat_platform_template() {
        let tmp = TempDir::new().unwrap();
        seed_templates(tmp.path());

        let yaml = format!(
            "\
templates_path: {}
agents:
  - name: aider
repositories:
  - name: requests
    test_command: pytest -x --cov
runs: 1
results_path: results
",
            tmp.path().display()
        );
        let config = HarnessConfig::from_value(serde_yaml::from_str(&yaml).unwrap()).unwrap();
        assert_eq!(config.repositories[0].test_command, "pytest -x --cov");
    }

    #[test]
    fn test_missing_required_key_fails_fast() {
        let raw: Value = serde_yaml::from_str("agents:\n  - name: a\n").unwrap();
        let err = HarnessConfig::from_value(raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("runs")));
    }

    #[test]
    fn test_wrong_runs_type_fails_fast() {
        let raw: Value =
            serde_yaml::from_str("agents: [{name: a}]\nrepositories: [{name: r}]\nruns: two\nresults_path: results\n")
                .unwrap();
        let err = HarnessConfig::from_value(raw).unwrap_err();
        assert!(matches!(err, ConfigError::WrongType { field: "runs", .. }));
    }

    #[test]
    fn test_empty_agent_list_fails_fast() {
        let raw: Value =
            serde_yaml::from_str("agents: []\nrepositories: [{name: r}]\nruns: 1\nresults_path: results\n")
                .unwrap();
        let err = HarnessConfig::from_value(raw).unwrap_err();
        assert!(matches!(err, ConfigError::EmptySection("agents")));
    }

    #[test]
    fn test_agent_missing_command_reports_entity_field() {
        let tmp = TempDir::new().unwrap();
        let yaml = format!(
            "\
templates_path: {}
agents:
  - name: mystery
    version: '1.0'
repositories:
  - name: r
    url: https://example.com/r
    test_command: make test
runs: 1
results_path: results
",
            tmp.path().display()
        );
        let err = HarnessConfig::from_value(serde_yaml::from_str(&yaml).unwrap()).unwrap_err();
        match err {
            ConfigError::MissingEntityField { entity, name, field } => {
                assert_eq!(entity, "agent");
                assert_eq!(name, "mystery");
                assert_eq!(field, "command");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_coverage_targets_require_file_pairs() {
        let tmp = TempDir::new().unwrap();
        seed_templates(tmp.path());

        let yaml = format!(
            "\
templates_path: {}
agents:
  - name: aider
repositories:
  - name: requests
    files: []
runs: 1
results_path: results
",
            tmp.path().display()
        );
        let config = HarnessConfig::from_value(serde_yaml::from_str(&yaml).unwrap()).unwrap();
        let err = config.targets().unwrap_err();
        assert!(matches!(err, ConfigError::NoFilePairs(name) if name == "requests"));
    }

    #[test]
    fn test_coverage_targets_built_from_config() {
        let tmp = TempDir::new().unwrap();
        seed_templates(tmp.path());

        let raw: Value = serde_yaml::from_str(&base_config(tmp.path())).unwrap();
        let config = HarnessConfig::from_value(raw).unwrap();
        let targets = config.targets().unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id(), "requests");
        match &targets[0].mode {
            RunMode::Coverage { files } => assert_eq!(files.len(), 1),
            RunMode::IssueResolution { .. } => panic!("expected coverage mode"),
        }
    }

    #[test]
    fn test_from_agent_repository_builds_one_run_config() {
        let tmp = TempDir::new().unwrap();
        seed_templates(tmp.path());

        let config =
            HarnessConfig::from_agent_repository("aider", "requests", Some(tmp.path())).unwrap();
        assert_eq!(config.runs, 1);
        assert_eq!(config.results_path, PathBuf::from("results"));
        assert_eq!(config.agents[0].command, "aider-wrapper");
    }
}

//! Run identity, durable result store and the run scheduler.
//!
//! The store derives a stable run name for every (agent, target, iteration)
//! triple and keeps one JSON record per run name under
//! `{results_path}/{benchmark}/runs/`. On construction it scans that
//! directory and rebuilds the in-memory index; this is the sole recovery
//! mechanism, there is no separate journal. `next_run` enumerates the full
//! cross product lazily and yields the first triple without a record, so
//! two processes given the same config and result set resume at the same
//! unit of work.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{Agent, Target};
use crate::result::RunRecord;

/// The next unit of scheduled work.
#[derive(Debug, Clone)]
pub struct NextRun {
    pub agent: Agent,
    pub target: Target,
    pub run_name: String,
}

/// Result store plus scheduler state for one benchmark sweep.
#[derive(Debug)]
pub struct Benchmark {
    agents: Vec<Agent>,
    targets: Vec<Target>,
    runs: usize,
    results: HashMap<String, RunRecord>,
    runs_path: PathBuf,
    output_path: PathBuf,
}

impl Benchmark {
    /// Opens (or creates) the result store and rebuilds the completed-run
    /// index from persisted records.
    ///
    /// A record that fails to parse is fatal at startup: the error names
    /// the offending file rather than silently dropping it.
    pub fn new(
        name: &str,
        results_path: &Path,
        agents: Vec<Agent>,
        targets: Vec<Target>,
        runs: usize,
    ) -> Result<Self, StoreError> {
        let output_path = results_path.join(name);
        let runs_path = output_path.join("runs");
        fs::create_dir_all(&runs_path)?;

        let mut results = HashMap::new();
        for entry in fs::read_dir(&runs_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let record: RunRecord = serde_json::from_str(&content)
                .map_err(|source| StoreError::MalformedRecord {
                    path: path.clone(),
                    source,
                })?;
            debug!(run = %record.run, "Recovered persisted run record");
            results.insert(record.run.clone(), record);
        }

        info!(
            recovered = results.len(),
            path = %runs_path.display(),
            "Result store ready"
        );

        Ok(Self {
            agents,
            targets,
            runs,
            results,
            runs_path,
            output_path,
        })
    }

    /// Derives the stable, collision-free identifier for one unit of work.
    pub fn run_name(agent: &Agent, target: &Target, iteration: usize) -> String {
        format!(
            "{}-{}-{}-{}",
            agent.name,
            agent.version,
            target.id(),
            iteration
        )
    }

    /// Persists a record, fully replacing any partial state atomically,
    /// and updates the in-memory index.
    pub fn add_result(&mut self, record: RunRecord) -> Result<(), StoreError> {
        let final_path = self.runs_path.join(format!("{}.json", record.run));
        let tmp_path = self.runs_path.join(format!("{}.json.tmp", record.run));

        let json = serde_json::to_string_pretty(&record)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &final_path)?;

        self.results.insert(record.run.clone(), record);
        Ok(())
    }

    /// Yields the next not-yet-completed unit of work, enumerating agents
    /// outer, targets middle, iteration index inner, in declared order.
    ///
    /// Returns `None` once every triple has a record. Error records count
    /// as done: a failed run is not retried automatically.
    pub fn next_run(&self) -> Option<NextRun> {
        for agent in &self.agents {
            for target in &self.targets {
                for iteration in 0..self.runs {
                    let run_name = Self::run_name(agent, target, iteration);
                    if !self.results.contains_key(&run_name) {
                        return Some(NextRun {
                            agent: agent.clone(),
                            target: target.clone(),
                            run_name,
                        });
                    }
                }
            }
        }
        None
    }

    /// All records currently in the index, in no particular order.
    pub fn results(&self) -> Vec<&RunRecord> {
        self.results.values().collect()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

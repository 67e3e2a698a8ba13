//! The sweep driver: pulls units of work from the scheduler and executes
//! them one at a time until the cross product is exhausted.
//!
//! Every pulled unit produces exactly one durable record. A run that
//! completes (including validation failures) records its structured
//! result; a run that errors records the error string and a captured
//! backtrace. Both count as done, so a crashed-and-restarted sweep resumes
//! at the first unit with no record and never re-executes finished work.

use std::backtrace::Backtrace;
use std::sync::Arc;

use tracing::{error, info};

use crate::error::RunError;
use crate::model::{Agent, Repository, RunMode};
use crate::proxy::LlmProxy;
use crate::result::{RunOutcome, RunRecord, RunResult};
use crate::run::AgentTestBenchmark;
use crate::store::{Benchmark, NextRun};
use crate::workspace::WorkspaceProvider;

pub struct AgentTestHarness {
    benchmark: Benchmark,
    proxy: Arc<LlmProxy>,
    command_timeout_secs: u64,
}

impl AgentTestHarness {
    pub fn new(benchmark: Benchmark, proxy: Arc<LlmProxy>, command_timeout_secs: u64) -> Self {
        Self {
            benchmark,
            proxy,
            command_timeout_secs,
        }
    }

    pub fn benchmark(&self) -> &Benchmark {
        &self.benchmark
    }

    /// Drives the sweep to completion, persisting one record per unit of
    /// work. Errors from individual runs are absorbed into error records;
    /// only storage failures abort the sweep.
    pub async fn run_sweep(&mut self) -> Result<(), crate::error::StoreError> {
        while let Some(next) = self.benchmark.next_run() {
            info!(run = %next.run_name, "Starting run");
            let record = self.execute_run(&next).await;
            if record.is_error() {
                info!(run = %next.run_name, "Run recorded as error");
            } else {
                info!(run = %next.run_name, "Run complete");
            }
            self.benchmark.add_result(record)?;
        }
        info!("Sweep complete: no work remaining");
        Ok(())
    }

    async fn execute_run(&self, next: &NextRun) -> RunRecord {
        match self.try_run(next).await {
            Ok(result) => run_record(next, RunOutcome::Completed(Box::new(result))),
            Err(err) => {
                error!(run = %next.run_name, error = %err, "Run failed");
                run_record(
                    next,
                    RunOutcome::Error {
                        error: err.to_string(),
                        backtrace: Backtrace::force_capture().to_string(),
                    },
                )
            }
        }
    }

    /// Provisions a dedicated workspace provider for this run, executes the
    /// run state machine against it, and stops the provider on every path.
    async fn try_run(&self, next: &NextRun) -> Result<RunResult, RunError> {
        let setup_script = combined_setup_script(&next.agent, &next.target.repository);
        let provider = WorkspaceProvider::new(
            &next.run_name,
            &next.target.repository,
            &setup_script,
            self.command_timeout_secs,
        );
        provider.run().await?;

        let result = AgentTestBenchmark::new(
            &next.run_name,
            self.proxy.as_ref(),
            &provider,
            &next.agent,
            &next.target,
            self.proxy.endpoint(),
        )
        .run()
        .await;

        provider.stop().await;
        result
    }
}

/// Repository setup followed by agent setup, in one script.
fn combined_setup_script(agent: &Agent, repository: &Repository) -> String {
    format!(
        "{}\n# Agent setup script:\n\n{}",
        repository.setup_script, agent.setup_script
    )
}

fn run_record(next: &NextRun, result: RunOutcome) -> RunRecord {
    let instance_id = match &next.target.mode {
        RunMode::IssueResolution { instance } => Some(instance.instance_id.clone()),
        RunMode::Coverage { .. } => None,
    };
    RunRecord {
        run: next.run_name.clone(),
        agent_name: next.agent.name.clone(),
        agent_version: next.agent.version.clone(),
        repository_url: next.target.repository.url.clone(),
        instance_id,
        result,
    }
}

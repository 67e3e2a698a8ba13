//! Execution of one benchmark run, end to end.
//!
//! The run is a small state machine: provision a metering credential,
//! provision a workspace, establish a git baseline, then execute exactly
//! one of the two flows (coverage improvement or issue resolution)
//! selected by the target's tagged mode. The done phase (elapsed time,
//! git diff against the baseline, LLM metrics) runs for every flow that
//! was not aborted by a failed validation pre-condition.
//!
//! There is no retry at this layer: a run either completes (success or
//! validation failure) or returns an error the sweep driver persists as
//! an error record.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{info, warn};

use crate::error::RunError;
use crate::model::{Agent, FilePair, RunMode, Target};
use crate::proxy::CredentialIssuer;
use crate::result::RunResult;
use crate::swe_bench::SweBenchInstance;
use crate::validation::{validate_test_results, TestResults};
use crate::workspace::{CommandExecutor, CommandOutput};

const TEST_PATCH_PATH: &str = "/tmp/test_patch.diff";

/// Executes one (agent, target, iteration) unit of work.
///
/// The workspace provider's lifecycle is owned by the caller; this type
/// only creates a workspace inside it and never tears anything down.
pub struct AgentTestBenchmark<'a> {
    run_name: &'a str,
    issuer: &'a dyn CredentialIssuer,
    executor: &'a dyn CommandExecutor,
    agent: &'a Agent,
    target: &'a Target,
    api_base: &'a str,
    repository_path: String,
}

/// Per-run state established during provisioning.
struct RunContext {
    token: String,
    workspace_id: String,
    initial_git_ref: String,
}

enum FlowOutcome {
    Completed,
    ValidationFailed,
}

impl<'a> AgentTestBenchmark<'a> {
    pub fn new(
        run_name: &'a str,
        issuer: &'a dyn CredentialIssuer,
        executor: &'a dyn CommandExecutor,
        agent: &'a Agent,
        target: &'a Target,
        api_base: &'a str,
    ) -> Self {
        let repository_path = format!("/{}", target.repository.name);
        Self {
            run_name,
            issuer,
            executor,
            agent,
            target,
            api_base,
            repository_path,
        }
    }

    /// Runs the full state machine and returns the structured result.
    pub async fn run(&self) -> Result<RunResult, RunError> {
        info!(run = %self.run_name, "Provisioning metering project");
        let project = self.issuer.create_project(self.run_name).await?;

        info!(run = %self.run_name, "Provisioning workspace");
        let env = self.environment_variables(&project.token);
        let workspace = self.executor.create_workspace(&env).await?;

        info!(run = %self.run_name, "Establishing initial git ref");
        let mut ctx = RunContext {
            token: project.token,
            workspace_id: workspace.id,
            initial_git_ref: String::new(),
        };
        ctx.initial_git_ref = self.establish_initial_git_ref(&ctx).await?;

        let mut result = RunResult::default();
        let mode = self.target.mode.clone();
        let outcome = match &mode {
            RunMode::Coverage { files } => self.coverage_flow(&ctx, files, &mut result).await?,
            RunMode::IssueResolution { instance } => {
                self.issue_resolution_flow(&ctx, instance, &mut result).await?
            }
        };

        if matches!(outcome, FlowOutcome::ValidationFailed) {
            // Pre-conditions did not hold; the agent never ran, so there is
            // no diff or usage to collect.
            return Ok(result);
        }

        info!(run = %self.run_name, "Running git diff");
        result.git_diff = Some(self.run_git_diff(&ctx).await?);

        info!(run = %self.run_name, "Getting LLM metrics");
        result.llm_metrics = self.issuer.get_metrics(&ctx.token).await?;

        Ok(result)
    }

    /// Environment every workspace command runs with.
    fn environment_variables(&self, token: &str) -> HashMap<String, String> {
        let repository = &self.target.repository;
        let mut env = HashMap::from([
            ("OPENAI_API_BASE".to_string(), self.api_base.to_string()),
            ("OPENAI_API_KEY".to_string(), token.to_string()),
            ("REPOSITORY_URL".to_string(), repository.url.clone()),
            ("PROJECT_ROOT".to_string(), self.repository_path.clone()),
            ("TEST_COMMAND".to_string(), repository.test_command.clone()),
        ]);
        if let Some(path) = &repository.coverage_report_path {
            env.insert("COVERAGE_REPORT_PATH".to_string(), path.clone());
        }
        if let RunMode::IssueResolution { instance } = &self.target.mode {
            env.insert("BASE_COMMIT".to_string(), instance.base_commit.clone());
        }
        env
    }

    async fn run_command_in_workdir(
        &self,
        ctx: &RunContext,
        command: &str,
        extra_env: &HashMap<String, String>,
    ) -> Result<CommandOutput, RunError> {
        let mut env = self.environment_variables(&ctx.token);
        env.extend(extra_env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let command = format!("cd {} && {}", self.repository_path, command);
        Ok(self
            .executor
            .run_command_with_output(&ctx.workspace_id, &command, &env)
            .await?)
    }

    /// Commits any pre-existing dirty state under a synthetic identity and
    /// records the resulting commit hash as the diff baseline.
    async fn establish_initial_git_ref(&self, ctx: &RunContext) -> Result<String, RunError> {
        let command = "git config user.name 'agent-test-harness'; \
             git config user.email 'agent-test-harness@example.com'; \
             git commit -a -m \"benchmark-head\" 1>/dev/null; git rev-parse HEAD";
        let output = self
            .run_command_in_workdir(ctx, command, &HashMap::new())
            .await?;
        if output.failed() {
            return Err(RunError::Baseline(output.output));
        }
        Ok(output.output.trim().to_string())
    }

    async fn run_test_command(&self, ctx: &RunContext) -> Result<CommandOutput, RunError> {
        self.run_command_in_workdir(ctx, &self.target.repository.test_command, &HashMap::new())
            .await
    }

    async fn read_coverage_report(&self, ctx: &RunContext) -> Result<CommandOutput, RunError> {
        let path = self
            .target
            .repository
            .coverage_report_path
            .as_deref()
            .ok_or_else(|| {
                RunError::CoverageReport("no coverage_report_path configured".to_string())
            })?;
        self.run_command_in_workdir(ctx, &format!("cat {path}"), &HashMap::new())
            .await
    }

    /// Runs the test command and reads the coverage report, treating any
    /// failure as fatal. Used to establish the baseline snapshot.
    async fn get_test_coverage(&self, ctx: &RunContext) -> Result<String, RunError> {
        let test_run = self.run_test_command(ctx).await?;
        if test_run.failed() {
            return Err(RunError::TestCommand(test_run.output));
        }
        let coverage = self.read_coverage_report(ctx).await?;
        if coverage.failed() {
            return Err(RunError::CoverageReport(coverage.output));
        }
        Ok(coverage.output)
    }

    async fn run_git_diff(&self, ctx: &RunContext) -> Result<String, RunError> {
        let output = self
            .run_command_in_workdir(
                ctx,
                &format!("git diff {}", ctx.initial_git_ref),
                &HashMap::new(),
            )
            .await?;
        if output.failed() {
            return Err(RunError::GitDiff(output.output));
        }
        Ok(output.output)
    }

    /// Coverage-improvement flow: iterate the declared file pairs, invoking
    /// the agent on each and re-measuring coverage, stopping at the first
    /// failing test run. The final coverage snapshot reflects the last
    /// successfully-tested pair.
    async fn coverage_flow(
        &self,
        ctx: &RunContext,
        files: &[FilePair],
        result: &mut RunResult,
    ) -> Result<FlowOutcome, RunError> {
        info!(run = %self.run_name, "Establishing baseline coverage");
        result.initial_coverage_tool_output = Some(self.get_test_coverage(ctx).await?);

        let started = Instant::now();
        let mut log = String::new();

        for pair in files {
            log.push_str(&format!("Running agent on file {}\n", pair.source()));

            let extra_env = HashMap::from([
                ("FILE_PATH".to_string(), pair.source().to_string()),
                ("TEST_FILE_PATH".to_string(), pair.test_file().to_string()),
                ("AGENT_INSTRUCTIONS".to_string(), coverage_prompt(pair)),
            ]);
            let agent_run = self
                .run_command_in_workdir(ctx, &self.agent.command, &extra_env)
                .await?;
            log.push_str(&agent_run.output);

            info!(run = %self.run_name, file = pair.source(), "Re-running coverage tool");
            let test_run = self.run_test_command(ctx).await?;
            if test_run.failed() {
                info!(run = %self.run_name, "Test command failed, stopping coverage loop");
                log.push_str("Test command failed. Stopping benchmark...\n");
                break;
            }

            let coverage = self.read_coverage_report(ctx).await?;
            if coverage.succeeded() {
                result.final_coverage_tool_output = Some(coverage.output);
            }
        }

        result.agent_execution_time = Some(started.elapsed().as_secs_f64());
        result.agent_output = log;
        Ok(FlowOutcome::Completed)
    }

    /// Issue-resolution flow: apply the instance's test-only patch, verify
    /// the expected pre-state, invoke the agent, and verify the expected
    /// post-state. A failed pre-condition is a validation failure (the
    /// instance is invalid or the environment drifted), not an error.
    async fn issue_resolution_flow(
        &self,
        ctx: &RunContext,
        instance: &SweBenchInstance,
        result: &mut RunResult,
    ) -> Result<FlowOutcome, RunError> {
        info!(run = %self.run_name, instance = %instance.instance_id, "Applying test patch");
        self.executor
            .write_file(&ctx.workspace_id, TEST_PATCH_PATH, instance.test_patch.as_bytes())
            .await?;
        let apply = self
            .run_command_in_workdir(ctx, &format!("git apply {TEST_PATCH_PATH}"), &HashMap::new())
            .await?;
        if apply.failed() {
            warn!(run = %self.run_name, "Test patch failed to apply");
            result.validation_failed = true;
            result.test_output = Some(apply.output);
            return Ok(FlowOutcome::ValidationFailed);
        }

        info!(run = %self.run_name, "Validating pre-agent test state");
        let pre_run = self.run_test_command(ctx).await?;
        let pre_results = TestResults::parse(&pre_run.output);

        let remain_passing = validate_test_results(&pre_results, &[], &instance.pass_to_pass);
        if !remain_passing.is_valid() {
            warn!(
                run = %self.run_name,
                missing = ?remain_passing.missing_from_passed,
                "Expected-passing tests are not passing before the agent ran"
            );
            result.validation_failed = true;
            result.test_output = Some(pre_run.output);
            return Ok(FlowOutcome::ValidationFailed);
        }

        let any_target_failing = instance
            .fail_to_pass
            .iter()
            .any(|test| pre_results.failed.contains(test));
        if !any_target_failing {
            warn!(
                run = %self.run_name,
                "No fail_to_pass test is failing: the task is already solved"
            );
            result.validation_failed = true;
            result.test_output = Some(pre_run.output);
            return Ok(FlowOutcome::ValidationFailed);
        }

        info!(run = %self.run_name, "Running agent");
        let extra_env = HashMap::from([
            (
                "PROBLEM_STATEMENT".to_string(),
                instance.problem_statement.clone(),
            ),
            ("AGENT_INSTRUCTIONS".to_string(), issue_prompt(instance)),
        ]);
        let started = Instant::now();
        let agent_run = self
            .run_command_in_workdir(ctx, &self.agent.command, &extra_env)
            .await?;
        result.agent_execution_time = Some(started.elapsed().as_secs_f64());
        result.agent_output = agent_run.output;

        info!(run = %self.run_name, "Validating post-agent test state");
        let post_run = self.run_test_command(ctx).await?;
        let post_results = TestResults::parse(&post_run.output);

        let remain_passing = validate_test_results(&post_results, &[], &instance.pass_to_pass);
        let still_failing: Vec<&String> = instance
            .fail_to_pass
            .iter()
            .filter(|test| post_results.failed.contains(*test))
            .collect();

        let resolved =
            remain_passing.is_valid() && still_failing.is_empty() && post_results.is_structured();
        if !remain_passing.is_valid() {
            info!(
                run = %self.run_name,
                missing = ?remain_passing.missing_from_passed,
                "Agent introduced a regression"
            );
        } else if !still_failing.is_empty() {
            info!(run = %self.run_name, still_failing = ?still_failing, "Incomplete fix");
        } else if resolved {
            info!(run = %self.run_name, "Instance resolved");
        }

        result.resolved = Some(resolved);
        result.test_output = Some(post_run.output);
        Ok(FlowOutcome::Completed)
    }
}

/// Instruction prompt for one coverage-mode file pair.
fn coverage_prompt(pair: &FilePair) -> String {
    format!(
        "Improve the test coverage of `{source}`.\n\n\
         Add or extend tests in `{test_file}` so that more of `{source}` is \
         exercised by the test suite. Run the configured test command to \
         verify your changes. Only modify `{test_file}`; do not change \
         `{source}` or any other file in the repository.",
        source = pair.source(),
        test_file = pair.test_file(),
    )
}

/// Instruction prompt for one issue-resolution instance.
fn issue_prompt(instance: &SweBenchInstance) -> String {
    format!(
        "Resolve the following issue in this repository.\n\n\
         # Problem statement\n\n{problem}\n\n\
         # Reference patch\n\n\
         The following patch is known to resolve the issue. Use it only as a \
         reference for what a correct solution looks like:\n\n{patch}\n\n\
         Do not modify any test files; the test suite will be used to verify \
         your solution.",
        problem = instance.problem_statement,
        patch = instance.patch,
    )
}

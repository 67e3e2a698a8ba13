//! Command-line interface for the agent test harness.
//!
//! `run` drives a full (possibly resumed) benchmark sweep, `report`
//! re-aggregates persisted records, and `print-config` shows the resolved
//! configuration after template layering. Shared services registered with
//! the teardown registry are stopped on every exit path, including Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::ConfigError;
use crate::harness::AgentTestHarness;
use crate::proxy::LlmProxy;
use crate::store::Benchmark;
use crate::swe_bench;
use crate::teardown::Teardown;
use crate::{report, result::RunRecord};

/// Benchmark harness for coding agents.
#[derive(Parser)]
#[command(name = "agent-harness")]
#[command(about = "Run coding-agent benchmarks against repositories and SWE-bench instances")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run (or resume) a benchmark sweep.
    Run(RunArgs),

    /// Aggregate persisted run records into per-agent statistics.
    Report(ReportArgs),

    /// Print the resolved configuration after template layering.
    PrintConfig(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Benchmark configuration file.
    #[arg(short, long, default_value = "benchmark.yaml")]
    pub config: PathBuf,

    /// Run a single agent by template name, bypassing the config's agent
    /// list. Requires --repository.
    #[arg(long)]
    pub agent: Option<String>,

    /// Run against a single repository by template name. Requires --agent.
    #[arg(long)]
    pub repository: Option<String>,

    /// Template directory override for --agent/--repository.
    #[arg(long)]
    pub templates_path: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Benchmark configuration file the sweep ran with.
    #[arg(short, long, default_value = "benchmark.yaml")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Benchmark configuration file.
    #[arg(short, long, default_value = "benchmark.yaml")]
    pub config: PathBuf,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_sweep(args).await,
        Commands::Report(args) => run_report(args),
        Commands::PrintConfig(args) => print_config(args),
    }
}

fn load_run_config(args: &RunArgs) -> Result<HarnessConfig, ConfigError> {
    match (&args.agent, &args.repository) {
        (Some(agent), Some(repository)) => {
            HarnessConfig::from_agent_repository(agent, repository, args.templates_path.as_deref())
        }
        (None, None) => HarnessConfig::load(&args.config),
        _ => Err(ConfigError::PartialOverride),
    }
}

async fn run_sweep(args: RunArgs) -> anyhow::Result<()> {
    let config = load_run_config(&args)?;
    let targets = config.targets()?;
    let issue_mode = config.swe_bench_dataset.is_some();
    info!(
        benchmark = %config.name,
        agents = config.agents.len(),
        targets = targets.len(),
        runs = config.runs,
        "Loaded benchmark configuration"
    );

    let benchmark = Benchmark::new(
        &config.name,
        &config.results_path,
        config.agents.clone(),
        targets,
        config.runs,
    )?;

    let proxy = Arc::new(LlmProxy::new());
    let mut teardown = Teardown::new();
    {
        let proxy = Arc::clone(&proxy);
        teardown.register("llm-proxy", move || async move { proxy.stop().await });
    }

    let proxy_started = proxy.run().await;
    if let Err(err) = proxy_started {
        teardown.run_hooks().await;
        return Err(err.into());
    }

    let mut harness = AgentTestHarness::new(benchmark, proxy, config.command_timeout_secs);

    let outcome = tokio::select! {
        result = harness.run_sweep() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted: stopping services. Re-run to resume the sweep.");
            teardown.run_hooks().await;
            return Ok(());
        }
    };

    teardown.run_hooks().await;
    outcome?;

    let records = harness.benchmark().results();
    let output_path = harness.benchmark().output_path();
    write_outputs(&records, output_path, issue_mode)?;
    Ok(())
}

fn run_report(args: ReportArgs) -> anyhow::Result<()> {
    let config = HarnessConfig::load(&args.config)?;
    let targets = config.targets()?;
    let benchmark = Benchmark::new(
        &config.name,
        &config.results_path,
        config.agents.clone(),
        targets,
        config.runs,
    )?;

    let records = benchmark.results();
    write_outputs(
        &records,
        benchmark.output_path(),
        config.swe_bench_dataset.is_some(),
    )?;
    Ok(())
}

fn write_outputs(
    records: &[&RunRecord],
    output_path: &std::path::Path,
    issue_mode: bool,
) -> anyhow::Result<()> {
    let report_path = report::write_report(records, output_path)?;
    info!(path = %report_path.display(), "Report written");

    if issue_mode {
        let predictions_path = output_path.join("predictions.jsonl");
        let written = swe_bench::export_predictions(records, &predictions_path)?;
        info!(
            path = %predictions_path.display(),
            predictions = written,
            "Predictions exported"
        );
    }
    Ok(())
}

fn print_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = HarnessConfig::load(&args.config)?;
    println!("benchmark: {}", config.name);
    println!("runs per pair: {}", config.runs);
    println!("results path: {}", config.results_path.display());
    if let Some(dataset) = &config.swe_bench_dataset {
        println!("mode: issue-resolution ({})", dataset.display());
    } else {
        println!("mode: coverage");
    }
    println!("agents:");
    for agent in &config.agents {
        println!("  - {} {} ({})", agent.name, agent.version, agent.command);
    }
    println!("repositories:");
    for repository in &config.repositories {
        println!("  - {} ({})", repository.name, repository.url);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_override_is_rejected() {
        let args = RunArgs {
            config: PathBuf::from("benchmark.yaml"),
            agent: Some("aider".to_string()),
            repository: None,
            templates_path: None,
        };
        let err = load_run_config(&args).unwrap_err();
        assert!(matches!(err, ConfigError::PartialOverride));
    }

    #[test]
    fn test_cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["agent-harness", "run", "--config", "bench.yaml"]);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.config, PathBuf::from("bench.yaml")),
            _ => panic!("expected run subcommand"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_global_log_level() {
        let cli = Cli::parse_from(["agent-harness", "report", "--log-level", "debug"]);
        assert_eq!(cli.log_level, "debug");
    }
}

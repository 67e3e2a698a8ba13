//! Benchmark harness for coding agents.
//!
//! Coordinates reproducible benchmark runs of autonomous coding agents
//! against real repositories (test-coverage improvement) and SWE-bench
//! instances (issue resolution). A resumable scheduler enumerates the
//! {agent x target x iteration} cross product, each unit of work executes
//! in an isolated workspace with a metered LLM credential, and every run
//! produces one durable JSON record that doubles as recovery state.

pub mod cli;
pub mod config;
pub mod coverage;
pub mod error;
pub mod harness;
pub mod model;
pub mod process;
pub mod proxy;
pub mod report;
pub mod result;
pub mod run;
pub mod store;
pub mod swe_bench;
pub mod teardown;
pub mod validation;
pub mod workspace;

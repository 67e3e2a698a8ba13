//! Minimal Cobertura summary extraction.
//!
//! Full coverage-report diffing is an external concern; reporting only
//! needs the summary attributes of the root `<coverage>` element. An
//! unreadable snapshot yields `None` and degrades the run to unsuccessful
//! in the report rather than crashing it.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Summary figures from one Cobertura coverage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub line_rate: f64,
    pub branch_rate: f64,
    pub total_statements: u64,
    pub total_misses: u64,
}

impl CoverageSummary {
    /// Extracts the summary from raw Cobertura XML text.
    pub fn parse(xml: &str) -> Option<Self> {
        let start = xml.find("<coverage")?;
        let rest = &xml[start..];
        let end = rest.find('>')?;
        let root = &rest[..end];

        let line_rate = attribute(root, "line-rate")?.parse().ok()?;
        let branch_rate = attribute(root, "branch-rate")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let lines_valid: u64 = attribute(root, "lines-valid")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let lines_covered: u64 = attribute(root, "lines-covered")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Some(Self {
            line_rate,
            branch_rate,
            total_statements: lines_valid,
            total_misses: lines_valid.saturating_sub(lines_covered),
        })
    }
}

fn attribute(element: &str, name: &str) -> Option<String> {
    // Attribute names contain hyphens only, no regex metacharacters.
    let pattern = Regex::new(&format!(r#"{name}="([^"]*)""#)).ok()?;
    pattern
        .captures(element)
        .map(|captures| captures[1].to_string())
}

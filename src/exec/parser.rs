// src/exec/parser.rs

//! Result extraction from the runner's combined output.
//!
//! The orchestrator only depends on [`OutputParser`]; [`CucumberSummaryParser`]
//! is the implementation shipped for Maven + Cucumber output.

use regex::Regex;
use tracing::debug;

use crate::errors::Result;
use crate::record::Counts;

/// What a parser could extract from one run's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scenarios: Counts,
    pub steps: Counts,
    /// Human-readable run time, if the output carried one.
    pub duration: Option<String>,
}

/// Pluggable output parser.
///
/// Must tolerate arbitrary text: anything it does not recognise simply
/// leaves the corresponding fields at their defaults.
pub trait OutputParser: Send + Sync {
    fn summarize(&self, output: &str) -> RunSummary;
}

/// Parser for cucumber's end-of-run summary:
///
/// ```text
/// 3 Scenarios (1 failed, 2 passed)
/// 12 Steps (1 failed, 2 skipped, 9 passed)
/// 0m4.207s
/// ```
///
/// `undefined` and `pending` results count as skipped, `ambiguous` as
/// failed. When cucumber prints several summaries (one per runner class)
/// they are added up. Duration falls back to Maven's `Total time:` line.
#[derive(Debug, Clone)]
pub struct CucumberSummaryParser {
    totals: Regex,
    outcome: Regex,
    cucumber_time: Regex,
    maven_time: Regex,
}

impl CucumberSummaryParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            totals: compile(r"^\s*(\d+) (Scenarios?|Steps?)\b(?:\s*\(([^)]*)\))?")?,
            outcome: compile(r"(\d+) (passed|failed|skipped|undefined|pending|ambiguous)")?,
            cucumber_time: compile(r"\b(\d+m\d+(?:\.\d+)?s)\b")?,
            maven_time: compile(r"Total time:\s*(.+?)\s*$")?,
        })
    }

    fn add_outcomes(&self, counts: &mut Counts, total: u32, breakdown: Option<&str>) {
        counts.total += total;
        let Some(breakdown) = breakdown else {
            return;
        };
        for cap in self.outcome.captures_iter(breakdown) {
            let n: u32 = cap[1].parse().unwrap_or(0);
            match &cap[2] {
                "passed" => counts.passed += n,
                "failed" | "ambiguous" => counts.failed += n,
                _ => counts.skipped += n,
            }
        }
    }

    fn duration(&self, output: &str) -> Option<String> {
        let cucumber = output
            .lines()
            .filter_map(|l| self.cucumber_time.captures(l.trim()))
            .last()
            .map(|c| c[1].to_string());

        cucumber.or_else(|| {
            output
                .lines()
                .filter_map(|l| self.maven_time.captures(l))
                .last()
                .map(|c| c[1].to_string())
        })
    }
}

impl OutputParser for CucumberSummaryParser {
    fn summarize(&self, output: &str) -> RunSummary {
        let mut summary = RunSummary::default();

        for line in output.lines() {
            let Some(cap) = self.totals.captures(strip_log_prefix(line)) else {
                continue;
            };
            let total: u32 = cap[1].parse().unwrap_or(0);
            let breakdown = cap.get(3).map(|m| m.as_str());
            if cap[2].starts_with("Scenario") {
                self.add_outcomes(&mut summary.scenarios, total, breakdown);
            } else {
                self.add_outcomes(&mut summary.steps, total, breakdown);
            }
        }

        summary.duration = self.duration(output);
        debug!(
            scenarios = summary.scenarios.total,
            steps = summary.steps.total,
            duration = ?summary.duration,
            "parsed runner summary"
        );
        summary
    }
}

/// Maven prefixes forwarded test output with `[INFO] ` and similar.
fn strip_log_prefix(line: &str) -> &str {
    let trimmed = line.trim_start();
    match trimmed.strip_prefix('[').and_then(|rest| rest.split_once("] ")) {
        Some((level, rest)) if level.chars().all(|c| c.is_ascii_uppercase()) => rest,
        _ => trimmed,
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(pattern).map_err(anyhow::Error::from)?)
}

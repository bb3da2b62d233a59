//! Outcome records, failure artifacts and the run summary

use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::command::{Command, CommandState};
use crate::driver::PageContext;
use crate::error::{E2eError, E2eResult, FailureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    /// Excluded by `skip` or `only`; never executed
    Skipped,
}

/// Why a scenario failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn from_error(e: &E2eError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// How one command of a scenario ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub index: usize,
    pub description: String,
    pub state: CommandState,
    pub duration_ms: u64,
}

impl CommandRecord {
    pub fn new(index: usize, command: &Command, elapsed: Duration) -> Self {
        Self {
            index,
            description: command.to_string(),
            state: command.state(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Final record of one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub group: String,
    pub scenario: String,
    pub status: ScenarioStatus,
    pub failure: Option<Failure>,
    /// Screenshot captured on failure
    pub artifact: Option<PathBuf>,
    pub commands: Vec<CommandRecord>,
    pub duration_ms: u64,
}

impl Outcome {
    /// A scenario that failed before any command could run
    pub fn failed(group: &str, scenario: &str, error: &E2eError) -> Self {
        Self {
            group: group.to_string(),
            scenario: scenario.to_string(),
            status: ScenarioStatus::Failed,
            failure: Some(Failure::from_error(error)),
            artifact: None,
            commands: vec![],
            duration_ms: 0,
        }
    }

    pub fn skipped(group: &str, scenario: &str) -> Self {
        Self {
            group: group.to_string(),
            scenario: scenario.to_string(),
            status: ScenarioStatus::Skipped,
            failure: None,
            artifact: None,
            commands: vec![],
            duration_ms: 0,
        }
    }

    pub fn with_artifact(mut self, artifact: Option<PathBuf>) -> Self {
        self.artifact = artifact;
        self
    }

    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    pub fn count_in(&self, state: CommandState) -> usize {
        self.commands.iter().filter(|c| c.state == state).count()
    }

    /// `<group> -- <scenario>` as used in artifact names
    pub fn title(&self) -> String {
        format!("{} -- {}", self.group, self.scenario)
    }
}

/// Capture a failure screenshot. Never fails: problems are logged and
/// `None` is returned.
pub async fn capture_failure(context: &mut PageContext, dir: &Path, outcome: &Outcome) -> Option<PathBuf> {
    let path = dir.join(format!("{} (failed).png", sanitize(&outcome.title())));
    match context.screenshot(&path).await {
        Ok(()) => {
            info!("Screenshot saved: {}", path.display());
            Some(path)
        }
        Err(e) => {
            warn!("Could not capture screenshot for '{}': {}", outcome.title(), e);
            None
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Totals of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
}

/// Results document written to the output directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub summary: RunSummary,
    pub outcomes: Vec<Outcome>,
}

/// Collects outcomes in report order
#[derive(Debug)]
pub struct Reporter {
    started_at: chrono::DateTime<chrono::Utc>,
    outcomes: Vec<Outcome>,
    duration: Duration,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            started_at: chrono::Utc::now(),
            outcomes: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Append an outcome and log it
    pub fn record(&mut self, outcome: Outcome) {
        match outcome.status {
            ScenarioStatus::Passed => {
                info!("✓ {} ({} ms)", outcome.title(), outcome.duration_ms);
            }
            ScenarioStatus::Failed => {
                error!(
                    "✗ {} - {}",
                    outcome.title(),
                    outcome.failure.as_ref().map(|f| f.message.as_str()).unwrap_or("unknown error")
                );
            }
            ScenarioStatus::Skipped => {
                info!("- {} (skipped)", outcome.title());
            }
        }
        self.outcomes.push(outcome);
    }

    pub fn finish(&mut self, duration: Duration) {
        self.duration = duration;
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn summary(&self) -> RunSummary {
        let count = |status| self.outcomes.iter().filter(|o| o.status == status).count();
        RunSummary {
            total: self.outcomes.len(),
            passed: count(ScenarioStatus::Passed),
            failed: count(ScenarioStatus::Failed),
            skipped: count(ScenarioStatus::Skipped),
            duration_ms: self.duration.as_millis() as u64,
        }
    }

    /// 0 when no scenario failed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.outcomes.iter().any(|o| o.status == ScenarioStatus::Failed) {
            1
        } else {
            0
        }
    }

    /// Human-readable per-scenario table
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Spec", "Scenario", "Status", "Duration", "Reason", "Artifact"]);

        for outcome in &self.outcomes {
            let status = match outcome.status {
                ScenarioStatus::Passed => "passed".green().to_string(),
                ScenarioStatus::Failed => "failed".red().to_string(),
                ScenarioStatus::Skipped => "skipped".yellow().to_string(),
            };
            let reason = outcome
                .failure
                .as_ref()
                .map(|f| format!("{}: {}", f.kind, f.message))
                .unwrap_or_default();
            let artifact = outcome
                .artifact
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            table.add_row(vec![
                outcome.group.clone(),
                outcome.scenario.clone(),
                status,
                format!("{} ms", outcome.duration_ms),
                reason,
                artifact,
            ]);
        }

        table.to_string()
    }

    pub fn print_summary(&self) {
        let summary = self.summary();
        println!("{}", self.render_table());
        let line = format!(
            "{} passed, {} failed, {} skipped ({} ms)",
            summary.passed, summary.failed, summary.skipped, summary.duration_ms
        );
        if summary.failed == 0 {
            println!("{}", line.green().bold());
        } else {
            println!("{}", line.red().bold());
        }
    }

    /// Write `test-results.json` into `output_dir`
    pub fn write_results(&self, output_dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;

        let results = RunResults {
            started_at: self.started_at,
            summary: self.summary(),
            outcomes: self.outcomes.clone(),
        };
        let path = output_dir.join("test-results.json");
        std::fs::write(&path, serde_json::to_string_pretty(&results)?)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: ScenarioStatus) -> Outcome {
        Outcome {
            group: "Button #btn3 Click Test".into(),
            scenario: "should click button #btn3".into(),
            status,
            failure: None,
            artifact: None,
            commands: vec![],
            duration_ms: 12,
        }
    }

    #[test]
    fn test_exit_code_zero_only_when_all_pass() {
        let mut reporter = Reporter::new();
        reporter.record(outcome(ScenarioStatus::Passed));
        reporter.record(outcome(ScenarioStatus::Passed));
        assert_eq!(reporter.exit_code(), 0);

        reporter.record(Outcome::failed("g", "s", &E2eError::Cancelled("run timeout".into())));
        assert_eq!(reporter.exit_code(), 1);

        let summary = reporter.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_empty_run_exits_zero() {
        assert_eq!(Reporter::new().exit_code(), 0);
    }

    #[test]
    fn test_table_lists_failure_reason() {
        let mut reporter = Reporter::new();
        let err = E2eError::ElementNotFound {
            selector: "#missing".into(),
            elapsed: Duration::from_millis(500),
        };
        reporter.record(Outcome::failed("Buttons", "missing", &err));
        let table = reporter.render_table();
        assert!(table.contains("ElementNotFoundError"));
        assert!(table.contains("#missing"));
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = Reporter::new();
        reporter.record(outcome(ScenarioStatus::Passed));
        let path = reporter.write_results(dir.path()).unwrap();

        let results: RunResults = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(results.summary.passed, 1);
        assert_eq!(results.outcomes[0].scenario, "should click button #btn3");
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize("a/b: c?"), "a_b_ c_");
    }
}

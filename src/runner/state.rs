use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::error::{PlaybackStatus, StepOutcome};

/// Step execution status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Dispatching,
    Retrying { attempt: u32 },
    Passed,
    Failed { message: String },
    Errored { message: String },
    Skipped { reason: String },
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Passed
                | StepStatus::Failed { .. }
                | StepStatus::Errored { .. }
                | StepStatus::Skipped { .. }
        )
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        match self {
            StepStatus::Failed { .. } => PlaybackStatus::Failure,
            StepStatus::Errored { .. } => PlaybackStatus::Error,
            _ => PlaybackStatus::Ok,
        }
    }
}

impl From<&StepOutcome> for StepStatus {
    fn from(outcome: &StepOutcome) -> Self {
        match outcome {
            StepOutcome::Passed(_) => StepStatus::Passed,
            StepOutcome::Failed(f) => StepStatus::Failed {
                message: f.to_string(),
            },
            StepOutcome::Errored(e) => StepStatus::Errored {
                message: e.to_string(),
            },
            StepOutcome::Skipped(reason) => StepStatus::Skipped {
                reason: reason.clone(),
            },
        }
    }
}

/// Device metrics fetched after a step (`memory,cpu,diskSpace,battery`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub memory: Option<String>,
    pub cpu: Option<String>,
    pub disk_space: Option<String>,
    pub battery: Option<String>,
}

impl Metrics {
    /// Parse the comma-separated `allinfo` reply. `None` for an empty reply.
    pub fn parse(message: &str) -> Option<Self> {
        if message.trim().is_empty() {
            return None;
        }
        let mut parts = message.split(',').map(|p| Some(p.trim().to_string()));
        Some(Self {
            memory: parts.next().flatten(),
            cpu: parts.next().flatten(),
            disk_space: parts.next().flatten(),
            battery: parts.next().flatten(),
        })
    }
}

/// Live state of one step while it runs
#[derive(Debug, Clone)]
pub struct StepState {
    pub index: usize,
    pub command: String,
    pub status: StepStatus,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub duration_ms: Option<u64>,
    pub retry_count: u32,
}

impl StepState {
    pub fn new(index: usize, command: &str) -> Self {
        Self {
            index,
            command: command.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            retry_count: 0,
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Dispatching;
        self.started_at = Some(Instant::now());
    }

    pub fn retry(&mut self, attempt: u32) {
        self.status = StepStatus::Retrying { attempt };
        self.retry_count = attempt;
    }

    pub fn finish(&mut self, outcome: &StepOutcome) {
        self.status = outcome.into();
        self.finished_at = Some(Instant::now());
        if let Some(start) = self.started_at {
            self.duration_ms = Some(start.elapsed().as_millis() as u64);
        }
    }
}

/// Finished step, as reported
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub index: usize,
    pub command: String,
    pub command_name: String,
    pub scope: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
    /// Saved screenshot file, when one was captured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    pub duration_ms: Option<u64>,
    pub retry_count: u32,
    /// Steps of a sub-script run by this step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepResult>,
}

impl StepResult {
    pub fn playback_status(&self) -> PlaybackStatus {
        self.status.playback_status()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, StepStatus::Skipped { .. })
    }
}

/// Aggregate of one script run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackResult {
    pub status: PlaybackStatus,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Scope hierarchy, e.g. `login.mt > enter_user.mt`
    pub scope: String,
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<String>,
    pub duration_ms: u64,
}

impl PlaybackResult {
    pub fn new(status: PlaybackStatus, message: Option<String>, scope: &str) -> Self {
        Self {
            status,
            message,
            warning: None,
            scope: scope.to_string(),
            steps: Vec::new(),
            screenshots: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn error(message: impl Into<String>, scope: &str) -> Self {
        Self::new(PlaybackStatus::Error, Some(message.into()), scope)
    }

    pub fn is_ok(&self) -> bool {
        self.status == PlaybackStatus::Ok
    }

    /// Counts over the top-level steps: (passed, failed, errored, skipped)
    pub fn counts(&self) -> (u32, u32, u32, u32) {
        self.steps.iter().fold((0, 0, 0, 0), |(p, f, e, s), step| {
            match step.status {
                StepStatus::Passed => (p + 1, f, e, s),
                StepStatus::Failed { .. } => (p, f + 1, e, s),
                StepStatus::Errored { .. } => (p, f, e + 1, s),
                StepStatus::Skipped { .. } => (p, f, e, s + 1),
                _ => (p, f, e, s),
            }
        })
    }
}

/// One script of a run, for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptReport {
    pub name: String,
    pub path: String,
    pub result: PlaybackResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub session_id: String,
    pub total_scripts: u32,
    pub total_steps: u32,
    pub passed: u32,
    pub failed: u32,
    pub errored: u32,
    pub skipped: u32,
    pub total_duration_ms: u64,
}

/// Everything a `run` produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub session_id: String,
    pub scripts: Vec<ScriptReport>,
    pub summary: RunSummary,
    pub generated_at: String,
}

impl RunReport {
    pub fn new(session_id: &str, scripts: Vec<ScriptReport>) -> Self {
        let mut summary = RunSummary {
            session_id: session_id.to_string(),
            total_scripts: scripts.len() as u32,
            total_steps: 0,
            passed: 0,
            failed: 0,
            errored: 0,
            skipped: 0,
            total_duration_ms: 0,
        };
        for script in &scripts {
            let (p, f, e, s) = script.result.counts();
            summary.total_steps += script.result.steps.len() as u32;
            summary.passed += p;
            summary.failed += f;
            summary.errored += e;
            summary.skipped += s;
            summary.total_duration_ms += script.result.duration_ms;
        }
        Self {
            session_id: session_id.to_string(),
            scripts,
            summary,
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.scripts.iter().all(|s| s.result.is_ok())
    }
}

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::run_stage::RunStage;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContentRun {
    pub id: Uuid,
    pub content_request_id: Uuid,
    pub n8n_execution_id: Option<String>,
    pub status: String,
    pub current_stage: String,
    pub completed_stages: i32,
    pub total_stages: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ContentRun {
    pub fn run_status(&self) -> Option<RunStatus> {
        RunStatus::parse(&self.status)
    }
}

/// Bootstrap payload for a run view: the run plus its stages ordered by
/// `stage_order`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunSnapshot {
    pub run: ContentRun,
    pub stages: Vec<RunStage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
    /// Written by older control paths; treated like `Stopped`.
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Stopped => "stopped",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "paused" => Some(RunStatus::Paused),
            "stopped" => Some(RunStatus::Stopped),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" | "canceled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped | RunStatus::Cancelled
        )
    }

    /// Statuses a user control action leaves behind that must end polling.
    pub fn halts_polling(&self) -> bool {
        matches!(self, RunStatus::Stopped | RunStatus::Cancelled)
    }

    pub const TERMINAL: [RunStatus; 4] = [
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Stopped,
        RunStatus::Cancelled,
    ];
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunAction {
    Pause,
    Resume,
    Stop,
}

impl RunAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pause" => Some(RunAction::Pause),
            "resume" => Some(RunAction::Resume),
            "stop" => Some(RunAction::Stop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunAction::Pause => "pause",
            RunAction::Resume => "resume",
            RunAction::Stop => "stop",
        }
    }

    pub fn target_status(&self) -> RunStatus {
        match self {
            RunAction::Pause => RunStatus::Paused,
            RunAction::Resume => RunStatus::Running,
            RunAction::Stop => RunStatus::Stopped,
        }
    }

    /// Statuses from which this action is a legal transition. Terminal
    /// statuses never appear here.
    pub fn allowed_from(&self) -> &'static [RunStatus] {
        match self {
            RunAction::Pause => &[RunStatus::Pending, RunStatus::Running],
            RunAction::Resume => &[RunStatus::Paused],
            RunAction::Stop => &[RunStatus::Pending, RunStatus::Running, RunStatus::Paused],
        }
    }

    pub fn is_allowed_from(&self, status: RunStatus) -> bool {
        self.allowed_from().contains(&status)
    }
}

/// Partial run fields carried by a `run-update` live event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_stages: Option<i32>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<OffsetDateTime>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        RunUpdate {
            status: Some(status.as_str().to_string()),
            ..Default::default()
        }
    }

    /// Overlay the present fields onto `run`.
    pub fn apply_to(&self, run: &mut ContentRun) {
        if let Some(status) = &self.status {
            run.status = status.clone();
        }
        if let Some(stage) = &self.current_stage {
            run.current_stage = stage.clone();
        }
        if let Some(count) = self.completed_stages {
            run.completed_stages = count;
        }
        if self.completed_at.is_some() {
            run.completed_at = self.completed_at;
        }
    }
}

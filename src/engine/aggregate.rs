//! Run-level aggregation rules, kept free of I/O so they can be tested on
//! their own.

use super::catalog::{StageDefinition, TOTAL_STAGES};
use crate::models::content_run::RunStatus;
use crate::models::run_stage::StageStatus;

/// Shown as the current stage when a poll recognises no node at all.
pub const FALLBACK_STAGE: &str = "Processing";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunProgress {
    pub completed_stages: i32,
    pub current_stage: String,
}

/// Summarise the catalog stages seen in one execution snapshot.
///
/// `observed` must be in the order the engine reported the nodes. The count
/// is the number of recognised nodes and the current stage is the last one
/// in that order, which is not necessarily the highest ordinal: n8n lists
/// nodes as they finished, and parallel branches finish out of order.
pub fn summarize<'a, I>(observed: I) -> RunProgress
where
    I: IntoIterator<Item = &'a StageDefinition>,
{
    let mut count = 0i32;
    let mut last: Option<&StageDefinition> = None;
    for stage in observed {
        count += 1;
        last = Some(stage);
    }
    RunProgress {
        completed_stages: count.min(TOTAL_STAGES),
        current_stage: last
            .map(|s| s.display_name)
            .unwrap_or(FALLBACK_STAGE)
            .to_string(),
    }
}

/// Final run status for a finished execution. n8n reports `success` for a
/// clean run; every other finished status counts as a failure.
pub fn terminal_outcome(finished: bool, engine_status: Option<&str>) -> Option<RunStatus> {
    if !finished {
        return None;
    }
    match engine_status {
        Some("success") => Some(RunStatus::Completed),
        _ => Some(RunStatus::Failed),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedProgress {
    pub completed_stages: i32,
    pub outcome: Option<RunStatus>,
}

/// Aggregation for stages pushed directly by the workflow: every catalog
/// stage completed finishes the run, any failed stage fails it.
pub fn summarize_reported<I>(statuses: I, total_stages: i32) -> ReportedProgress
where
    I: IntoIterator<Item = StageStatus>,
{
    let mut completed = 0i32;
    let mut has_failed = false;
    for status in statuses {
        match status {
            StageStatus::Completed => completed += 1,
            StageStatus::Failed => has_failed = true,
            _ => {}
        }
    }

    let outcome = if completed >= total_stages {
        Some(RunStatus::Completed)
    } else if has_failed {
        Some(RunStatus::Failed)
    } else {
        None
    };

    ReportedProgress {
        completed_stages: completed.min(total_stages),
        outcome,
    }
}

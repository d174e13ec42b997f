use crate::models::content_run::{ContentRun, RunAction, RunSnapshot, RunStatus};
use crate::models::run_stage::RunStage;
use crate::services::live_channel::LiveEvent;

/// Local state of a run view: the bootstrap snapshot with live deltas
/// merged in. Never writes anything back; control actions go through the
/// server and their effect arrives as a `run-update`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunView {
    pub run: ContentRun,
    pub stages: Vec<RunStage>,
    selected: Option<String>,
}

impl RunView {
    pub fn bootstrap(snapshot: RunSnapshot) -> Self {
        let mut view = RunView {
            run: snapshot.run,
            stages: snapshot.stages,
            selected: None,
        };
        view.sort_stages();
        view.selected = view.default_selection();
        view
    }

    /// Terminal statuses are absorbing: once the view has seen one, a late
    /// `run-update` may still move progress but not the status or
    /// `completed_at`.
    pub fn apply(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::RunUpdate(mut update) => {
                if self.status().is_some_and(|s| s.is_terminal()) {
                    update.status = None;
                    update.completed_at = None;
                }
                update.apply_to(&mut self.run);
            }
            LiveEvent::StageUpdate(stage) => self.merge_stage(*stage),
        }
    }

    /// Replace the stage with the same name, or append it and keep the list
    /// ordered by `stage_order`.
    pub fn merge_stage(&mut self, stage: RunStage) {
        match self
            .stages
            .iter_mut()
            .find(|s| s.stage_name == stage.stage_name)
        {
            Some(existing) => *existing = stage,
            None => {
                self.stages.push(stage);
                self.sort_stages();
            }
        }
        if self.selected.is_none() {
            self.selected = self.default_selection();
        }
    }

    fn sort_stages(&mut self) {
        self.stages.sort_by_key(|s| s.stage_order);
    }

    /// First running or failed stage, else the first stage.
    pub fn default_selection(&self) -> Option<String> {
        self.stages
            .iter()
            .find(|s| s.status == "running" || s.status == "failed")
            .or_else(|| self.stages.first())
            .map(|s| s.stage_name.clone())
    }

    pub fn select(&mut self, stage_name: &str) -> bool {
        if self.stages.iter().any(|s| s.stage_name == stage_name) {
            self.selected = Some(stage_name.to_string());
            true
        } else {
            false
        }
    }

    pub fn selected_stage(&self) -> Option<&RunStage> {
        let name = self.selected.as_deref()?;
        self.stages.iter().find(|s| s.stage_name == name)
    }

    pub fn status(&self) -> Option<RunStatus> {
        self.run.run_status()
    }

    pub fn progress_percent(&self) -> u8 {
        if self.run.total_stages <= 0 {
            return 0;
        }
        let done = self.run.completed_stages.clamp(0, self.run.total_stages) as f64;
        ((done / self.run.total_stages as f64) * 100.0).round() as u8
    }

    /// Control actions the server would accept from the current status.
    pub fn available_actions(&self) -> Vec<RunAction> {
        let Some(status) = self.status() else {
            return Vec::new();
        };
        [RunAction::Pause, RunAction::Resume, RunAction::Stop]
            .into_iter()
            .filter(|a| a.is_allowed_from(status))
            .collect()
    }
}

/// `850ms`, `12s`, `3m 5s`.
pub fn format_duration(ms: Option<i64>) -> String {
    let Some(ms) = ms else {
        return "-".to_string();
    };
    if ms < 1000 {
        return format!("{ms}ms");
    }
    let seconds = ms / 1000;
    if seconds < 60 {
        return format!("{seconds}s");
    }
    format!("{}m {}s", seconds / 60, seconds % 60)
}

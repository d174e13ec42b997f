use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use super::run_repository::RunRepository;
use crate::models::content_run::{ContentRun, RunStatus};
use crate::models::run_stage::{RunStage, StageUpsert};

/// In-memory store with the same write semantics as the Postgres repository.
/// Used by handler and poller tests.
#[derive(Default)]
pub struct InMemoryRunRepository {
    pub runs: Mutex<HashMap<Uuid, ContentRun>>,
    pub stages: Mutex<Vec<RunStage>>,
    /// content_request_id -> (current_run_id, status)
    pub requests: Mutex<HashMap<Uuid, (Option<Uuid>, String)>>,
    pub should_fail: AtomicBool,
    pub stage_writes: AtomicUsize,
    pub run_writes: AtomicUsize,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(self, content_request_id: Uuid) -> Self {
        self.requests
            .lock()
            .unwrap()
            .insert(content_request_id, (None, "pending".to_string()));
        self
    }

    pub fn insert_run(&self, run: ContentRun) {
        self.requests
            .lock()
            .unwrap()
            .insert(run.content_request_id, (Some(run.id), "in_progress".to_string()));
        self.runs.lock().unwrap().insert(run.id, run);
    }

    pub fn run(&self, run_id: Uuid) -> Option<ContentRun> {
        self.runs.lock().unwrap().get(&run_id).cloned()
    }

    pub fn set_status(&self, run_id: Uuid, status: RunStatus) {
        if let Some(run) = self.runs.lock().unwrap().get_mut(&run_id) {
            run.status = status.as_str().to_string();
        }
    }

    pub fn stages_for(&self, run_id: Uuid) -> Vec<RunStage> {
        let mut stages: Vec<RunStage> = self
            .stages
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.stage_order);
        stages
    }

    pub fn request_status(&self, content_request_id: Uuid) -> Option<String> {
        self.requests
            .lock()
            .unwrap()
            .get(&content_request_id)
            .map(|(_, status)| status.clone())
    }

    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }
}

pub fn run_fixture(status: RunStatus) -> ContentRun {
    let now = OffsetDateTime::now_utc();
    ContentRun {
        id: Uuid::new_v4(),
        content_request_id: Uuid::new_v4(),
        n8n_execution_id: Some("exec-1".to_string()),
        status: status.as_str().to_string(),
        current_stage: "Webhook Received".to_string(),
        completed_stages: 0,
        total_stages: 19,
        started_at: now,
        completed_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create_run(
        &self,
        content_request_id: Uuid,
        n8n_execution_id: Option<&str>,
        initial_stage: &str,
        total_stages: i32,
    ) -> Result<ContentRun, sqlx::Error> {
        self.check()?;
        let now = OffsetDateTime::now_utc();
        let run = ContentRun {
            id: Uuid::new_v4(),
            content_request_id,
            n8n_execution_id: n8n_execution_id.map(str::to_string),
            status: RunStatus::Running.as_str().to_string(),
            current_stage: initial_stage.to_string(),
            completed_stages: 0,
            total_stages,
            started_at: now,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.runs.lock().unwrap().insert(run.id, run.clone());
        Ok(run)
    }

    async fn link_content_request(
        &self,
        content_request_id: Uuid,
        run_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        self.check()?;
        let mut requests = self.requests.lock().unwrap();
        match requests.get_mut(&content_request_id) {
            Some(entry) => {
                *entry = (Some(run_id), "in_progress".to_string());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_run(&self, run_id: Uuid) -> Result<Option<ContentRun>, sqlx::Error> {
        self.check()?;
        Ok(self.run(run_id))
    }

    async fn get_run_status(&self, run_id: Uuid) -> Result<Option<String>, sqlx::Error> {
        self.check()?;
        Ok(self.run(run_id).map(|r| r.status))
    }

    async fn list_pollable_runs(&self) -> Result<Vec<ContentRun>, sqlx::Error> {
        self.check()?;
        let mut runs: Vec<ContentRun> = self
            .runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.n8n_execution_id.is_some())
            .filter(|r| {
                matches!(
                    r.run_status(),
                    Some(RunStatus::Pending | RunStatus::Running | RunStatus::Paused)
                )
            })
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn list_stages(&self, run_id: Uuid) -> Result<Vec<RunStage>, sqlx::Error> {
        self.check()?;
        Ok(self.stages_for(run_id))
    }

    async fn upsert_stage(
        &self,
        run_id: Uuid,
        stage: &StageUpsert,
    ) -> Result<RunStage, sqlx::Error> {
        self.check()?;
        self.stage_writes.fetch_add(1, Ordering::SeqCst);
        let now = OffsetDateTime::now_utc();
        let mut stages = self.stages.lock().unwrap();
        if let Some(existing) = stages
            .iter_mut()
            .find(|s| s.run_id == run_id && s.stage_name == stage.stage_name)
        {
            existing.stage_order = stage.stage_order;
            existing.status = stage.status.as_str().to_string();
            if stage.output_text.is_some() {
                existing.output_text = stage.output_text.clone();
            }
            if stage.output_metadata.is_some() {
                existing.output_metadata = stage.output_metadata.clone();
            }
            if stage.error_message.is_some() {
                existing.error_message = stage.error_message.clone();
            }
            if stage.started_at.is_some() {
                existing.started_at = stage.started_at;
            }
            if stage.completed_at.is_some() {
                existing.completed_at = stage.completed_at;
            }
            if stage.duration_ms.is_some() {
                existing.duration_ms = stage.duration_ms;
            }
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let row = RunStage {
            id: Uuid::new_v4(),
            run_id,
            stage_name: stage.stage_name.clone(),
            stage_order: stage.stage_order,
            status: stage.status.as_str().to_string(),
            output_text: stage.output_text.clone(),
            output_metadata: stage.output_metadata.clone(),
            error_message: stage.error_message.clone(),
            started_at: stage.started_at,
            completed_at: stage.completed_at,
            duration_ms: stage.duration_ms,
            created_at: now,
            updated_at: now,
        };
        stages.push(row.clone());
        Ok(row)
    }

    async fn record_progress(
        &self,
        run_id: Uuid,
        completed_stages: i32,
        current_stage: &str,
    ) -> Result<Option<ContentRun>, sqlx::Error> {
        self.check()?;
        self.run_writes.fetch_add(1, Ordering::SeqCst);
        let mut runs = self.runs.lock().unwrap();
        let Some(run) = runs.get_mut(&run_id) else {
            return Ok(None);
        };
        run.completed_stages = run
            .completed_stages
            .max(completed_stages)
            .min(run.total_stages);
        run.current_stage = current_stage.to_string();
        run.updated_at = OffsetDateTime::now_utc();
        Ok(Some(run.clone()))
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        completed_at: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        self.check()?;
        self.run_writes.fetch_add(1, Ordering::SeqCst);
        let mut runs = self.runs.lock().unwrap();
        let Some(run) = runs.get_mut(&run_id) else {
            return Ok(false);
        };
        if run.run_status().map(|s| s.is_terminal()).unwrap_or(false) {
            return Ok(false);
        }
        run.status = status.as_str().to_string();
        run.completed_at = run.completed_at.or(Some(completed_at));
        run.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn transition_run(
        &self,
        run_id: Uuid,
        from: &[RunStatus],
        to: RunStatus,
        completed_at: Option<OffsetDateTime>,
    ) -> Result<Option<ContentRun>, sqlx::Error> {
        self.check()?;
        self.run_writes.fetch_add(1, Ordering::SeqCst);
        let mut runs = self.runs.lock().unwrap();
        let Some(run) = runs.get_mut(&run_id) else {
            return Ok(None);
        };
        let current = run.run_status();
        if !current.map(|s| from.contains(&s)).unwrap_or(false) {
            return Ok(None);
        }
        run.status = to.as_str().to_string();
        if completed_at.is_some() {
            run.completed_at = completed_at;
        }
        run.updated_at = OffsetDateTime::now_utc();
        Ok(Some(run.clone()))
    }

    async fn set_request_status_for_run(
        &self,
        run_id: Uuid,
        status: &str,
    ) -> Result<u64, sqlx::Error> {
        self.check()?;
        let mut updated = 0;
        for (current_run_id, request_status) in self.requests.lock().unwrap().values_mut() {
            if *current_run_id == Some(run_id) {
                *request_status = status.to_string();
                updated += 1;
            }
        }
        Ok(updated)
    }
}

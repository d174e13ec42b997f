use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::content_run::{ContentRun, RunStatus};
use crate::models::run_stage::{RunStage, StageUpsert};

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn create_run(
        &self,
        content_request_id: Uuid,
        n8n_execution_id: Option<&str>,
        initial_stage: &str,
        total_stages: i32,
    ) -> Result<ContentRun, sqlx::Error>;

    // Points the content request at the run and marks it in progress.
    async fn link_content_request(
        &self,
        content_request_id: Uuid,
        run_id: Uuid,
    ) -> Result<u64, sqlx::Error>;

    async fn find_run(&self, run_id: Uuid) -> Result<Option<ContentRun>, sqlx::Error>;

    async fn get_run_status(&self, run_id: Uuid) -> Result<Option<String>, sqlx::Error>;

    // Runs that were polling when the process last stopped.
    async fn list_pollable_runs(&self) -> Result<Vec<ContentRun>, sqlx::Error>;

    async fn list_stages(&self, run_id: Uuid) -> Result<Vec<RunStage>, sqlx::Error>;

    // Idempotent per-stage write: insert or update by (run_id, stage_name)
    async fn upsert_stage(
        &self,
        run_id: Uuid,
        stage: &StageUpsert,
    ) -> Result<RunStage, sqlx::Error>;

    /// Never lowers `completed_stages` and clamps it to `total_stages`.
    async fn record_progress(
        &self,
        run_id: Uuid,
        completed_stages: i32,
        current_stage: &str,
    ) -> Result<Option<ContentRun>, sqlx::Error>;

    /// Moves a non-terminal run into `status`. Returns false when the run is
    /// missing or already terminal.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        completed_at: OffsetDateTime,
    ) -> Result<bool, sqlx::Error>;

    /// Conditional status change used by control actions: applied only while
    /// the current status is one of `from`.
    async fn transition_run(
        &self,
        run_id: Uuid,
        from: &[RunStatus],
        to: RunStatus,
        completed_at: Option<OffsetDateTime>,
    ) -> Result<Option<ContentRun>, sqlx::Error>;

    async fn set_request_status_for_run(
        &self,
        run_id: Uuid,
        status: &str,
    ) -> Result<u64, sqlx::Error>;
}

use crate::{
    db::run_repository::RunRepository,
    models::content_run::{ContentRun, RunStatus},
    models::run_stage::{RunStage, StageUpsert},
};
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

const RUN_COLUMNS: &str = "id, content_request_id, n8n_execution_id, status, current_stage, \
     completed_stages, total_stages, started_at, completed_at, created_at, updated_at";

const STAGE_COLUMNS: &str = "id, run_id, stage_name, stage_order, status, output_text, \
     output_metadata, error_message, started_at, completed_at, duration_ms, created_at, updated_at";

pub struct PostgresRunRepository {
    pub pool: PgPool,
}

fn status_list(statuses: &[RunStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl RunRepository for PostgresRunRepository {
    async fn create_run(
        &self,
        content_request_id: Uuid,
        n8n_execution_id: Option<&str>,
        initial_stage: &str,
        total_stages: i32,
    ) -> Result<ContentRun, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO content_runs (content_request_id, n8n_execution_id, status, current_stage, completed_stages, total_stages, started_at, created_at, updated_at)
            VALUES ($1, $2, 'running', $3, 0, $4, now(), now(), now())
            RETURNING {RUN_COLUMNS}
            "#
        );
        sqlx::query_as::<_, ContentRun>(&sql)
            .bind(content_request_id)
            .bind(n8n_execution_id)
            .bind(initial_stage)
            .bind(total_stages)
            .fetch_one(&self.pool)
            .await
    }

    async fn link_content_request(
        &self,
        content_request_id: Uuid,
        run_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE content_requests
            SET current_run_id = $2,
                status = 'in_progress'
            WHERE id = $1
            "#,
        )
        .bind(content_request_id)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_run(&self, run_id: Uuid) -> Result<Option<ContentRun>, sqlx::Error> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM content_runs WHERE id = $1");
        sqlx::query_as::<_, ContentRun>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_run_status(&self, run_id: Uuid) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT status FROM content_runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn list_pollable_runs(&self) -> Result<Vec<ContentRun>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM content_runs
            WHERE status IN ('pending', 'running', 'paused')
              AND n8n_execution_id IS NOT NULL
            ORDER BY started_at ASC
            "#
        );
        sqlx::query_as::<_, ContentRun>(&sql)
            .fetch_all(&self.pool)
            .await
    }

    async fn list_stages(&self, run_id: Uuid) -> Result<Vec<RunStage>, sqlx::Error> {
        let sql = format!(
            "SELECT {STAGE_COLUMNS} FROM content_run_stages WHERE run_id = $1 ORDER BY stage_order ASC"
        );
        sqlx::query_as::<_, RunStage>(&sql)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
    }

    async fn upsert_stage(
        &self,
        run_id: Uuid,
        stage: &StageUpsert,
    ) -> Result<RunStage, sqlx::Error> {
        let sql = format!(
            r#"
            INSERT INTO content_run_stages (run_id, stage_name, stage_order, status, output_text, output_metadata, error_message, started_at, completed_at, duration_ms, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), now())
            ON CONFLICT (run_id, stage_name) DO UPDATE SET
                stage_order = EXCLUDED.stage_order,
                status = EXCLUDED.status,
                output_text = COALESCE(EXCLUDED.output_text, content_run_stages.output_text),
                output_metadata = COALESCE(EXCLUDED.output_metadata, content_run_stages.output_metadata),
                error_message = COALESCE(EXCLUDED.error_message, content_run_stages.error_message),
                started_at = COALESCE(EXCLUDED.started_at, content_run_stages.started_at),
                completed_at = COALESCE(EXCLUDED.completed_at, content_run_stages.completed_at),
                duration_ms = COALESCE(EXCLUDED.duration_ms, content_run_stages.duration_ms),
                updated_at = now()
            RETURNING {STAGE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, RunStage>(&sql)
            .bind(run_id)
            .bind(&stage.stage_name)
            .bind(stage.stage_order)
            .bind(stage.status.as_str())
            .bind(stage.output_text.as_deref())
            .bind(stage.output_metadata.clone())
            .bind(stage.error_message.as_deref())
            .bind(stage.started_at)
            .bind(stage.completed_at)
            .bind(stage.duration_ms)
            .fetch_one(&self.pool)
            .await
    }

    async fn record_progress(
        &self,
        run_id: Uuid,
        completed_stages: i32,
        current_stage: &str,
    ) -> Result<Option<ContentRun>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE content_runs
            SET completed_stages = LEAST(GREATEST(completed_stages, $2), total_stages),
                current_stage = $3,
                updated_at = now()
            WHERE id = $1
            RETURNING {RUN_COLUMNS}
            "#
        );
        sqlx::query_as::<_, ContentRun>(&sql)
            .bind(run_id)
            .bind(completed_stages)
            .bind(current_stage)
            .fetch_optional(&self.pool)
            .await
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        completed_at: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE content_runs
            SET status = $2,
                completed_at = COALESCE(completed_at, $3),
                updated_at = now()
            WHERE id = $1
              AND NOT (status = ANY($4))
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(completed_at)
        .bind(status_list(&RunStatus::TERMINAL))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition_run(
        &self,
        run_id: Uuid,
        from: &[RunStatus],
        to: RunStatus,
        completed_at: Option<OffsetDateTime>,
    ) -> Result<Option<ContentRun>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE content_runs
            SET status = $2,
                completed_at = COALESCE($3, completed_at),
                updated_at = now()
            WHERE id = $1
              AND status = ANY($4)
            RETURNING {RUN_COLUMNS}
            "#
        );
        sqlx::query_as::<_, ContentRun>(&sql)
            .bind(run_id)
            .bind(to.as_str())
            .bind(completed_at)
            .bind(status_list(from))
            .fetch_optional(&self.pool)
            .await
    }

    async fn set_request_status_for_run(
        &self,
        run_id: Uuid,
        status: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE content_requests
            SET status = $2
            WHERE current_run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

use serde_json::Value;

use super::prelude::*;
use crate::engine::aggregate::summarize_reported;
use crate::models::run_stage::{StageStatus, StageUpsert};

/// A single stage's state pushed by the workflow itself.
#[derive(Debug, Deserialize)]
pub struct StageReport {
    pub run_id: Option<Uuid>,
    pub stage_name: Option<String>,
    pub stage_order: Option<i32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub output_metadata: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

pub async fn update_stage(
    State(state): State<AppState>,
    Json(report): Json<StageReport>,
) -> Response {
    let (Some(run_id), Some(stage_name), Some(stage_order)) = (
        report.run_id,
        report.stage_name.clone().filter(|n| !n.trim().is_empty()),
        report.stage_order,
    ) else {
        return JsonResponse::bad_request("run_id, stage_name, and stage_order are required")
            .into_response();
    };
    let status = match report.status.as_deref() {
        None => StageStatus::Pending,
        Some(raw) => match StageStatus::parse(raw) {
            Some(status) => status,
            None => {
                return JsonResponse::bad_request(
                    "status must be one of: pending, running, completed, failed, skipped",
                )
                .into_response()
            }
        },
    };

    let run = match state.run_repo.find_run(run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return JsonResponse::not_found("Run not found").into_response(),
        Err(err) => {
            error!(%run_id, ?err, "failed to load run for stage report");
            return JsonResponse::server_error("Failed to update stage").into_response();
        }
    };

    let stages = match state.run_repo.list_stages(run_id).await {
        Ok(stages) => stages,
        Err(err) => {
            error!(%run_id, ?err, "failed to load stages for stage report");
            return JsonResponse::server_error("Failed to update stage").into_response();
        }
    };

    let now = OffsetDateTime::now_utc();
    let mut upsert = StageUpsert {
        stage_name: stage_name.clone(),
        stage_order,
        status,
        output_text: report.output_text,
        output_metadata: report.output_metadata,
        error_message: report.error_message,
        started_at: None,
        completed_at: None,
        duration_ms: None,
    };
    match status {
        StageStatus::Running => upsert.started_at = Some(now),
        StageStatus::Completed | StageStatus::Failed => {
            upsert.completed_at = Some(now);
            upsert.duration_ms = stages
                .iter()
                .find(|s| s.stage_name == stage_name)
                .and_then(|s| s.started_at)
                .map(|started| (now - started).whole_milliseconds() as i64);
        }
        _ => {}
    }

    let row = match state.run_repo.upsert_stage(run_id, &upsert).await {
        Ok(row) => row,
        Err(err) => {
            error!(%run_id, stage = %stage_name, ?err, "failed to upsert reported stage");
            return JsonResponse::server_error("Failed to update stage").into_response();
        }
    };
    state.live.publish_stage_update(run_id, row.clone());

    let statuses = stages
        .iter()
        .filter(|s| s.stage_name != row.stage_name)
        .chain(std::iter::once(&row))
        .filter_map(|s| StageStatus::parse(&s.status));
    let progress = summarize_reported(statuses, run.total_stages);

    let updated = match state
        .run_repo
        .record_progress(run_id, progress.completed_stages, &stage_name)
        .await
    {
        Ok(Some(updated)) => updated,
        Ok(None) => return JsonResponse::not_found("Run not found").into_response(),
        Err(err) => {
            error!(%run_id, ?err, "failed to record reported progress");
            return JsonResponse::server_error("Failed to update run").into_response();
        }
    };

    let mut update = RunUpdate {
        current_stage: Some(updated.current_stage.clone()),
        completed_stages: Some(updated.completed_stages),
        ..Default::default()
    };

    if let Some(outcome) = progress.outcome {
        match state.run_repo.finish_run(run_id, outcome, now).await {
            Ok(true) => {
                update.status = Some(outcome.as_str().to_string());
                update.completed_at = Some(now);
                if let Err(err) = state
                    .run_repo
                    .set_request_status_for_run(run_id, outcome.as_str())
                    .await
                {
                    error!(%run_id, ?err, "failed to update content request status");
                }
                info!(%run_id, status = %outcome, "run finished from stage report");
            }
            Ok(false) => {}
            Err(err) => {
                error!(%run_id, ?err, "failed to finish run from stage report");
                return JsonResponse::server_error("Failed to update run").into_response();
            }
        }
    }
    state.live.publish_run_update(run_id, update);

    (StatusCode::OK, Json(json!({ "success": true }))).into_response()
}

use super::prelude::*;
use crate::engine::catalog::{INITIAL_STAGE, TOTAL_STAGES};

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub content_request_id: Option<Uuid>,
    #[serde(default)]
    pub n8n_execution_id: Option<String>,
}

pub async fn create_run(
    State(state): State<AppState>,
    Json(payload): Json<CreateRunRequest>,
) -> Response {
    let Some(content_request_id) = payload.content_request_id else {
        return JsonResponse::bad_request("content_request_id is required").into_response();
    };
    let execution_id = payload
        .n8n_execution_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    let run = match state
        .run_repo
        .create_run(
            content_request_id,
            execution_id.as_deref(),
            INITIAL_STAGE,
            TOTAL_STAGES,
        )
        .await
    {
        Ok(run) => run,
        Err(err) => {
            error!(%content_request_id, ?err, "failed to create run");
            return JsonResponse::server_error("Failed to create run").into_response();
        }
    };

    match state
        .run_repo
        .link_content_request(content_request_id, run.id)
        .await
    {
        Ok(0) => warn!(%content_request_id, run_id = %run.id, "no content request to link"),
        Ok(_) => {}
        Err(err) => error!(%content_request_id, run_id = %run.id, ?err, "failed to link content request"),
    }

    if let Some(execution_id) = execution_id.as_deref() {
        state.pollers.start(run.id, execution_id);
    }

    info!(run_id = %run.id, %content_request_id, "run created");
    (
        StatusCode::OK,
        Json(json!({ "success": true, "run_id": run.id })),
    )
        .into_response()
}

pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    let run = match state.run_repo.find_run(run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return JsonResponse::not_found("Run not found").into_response(),
        Err(err) => {
            error!(%run_id, ?err, "failed to load run");
            return JsonResponse::server_error("Failed to load run").into_response();
        }
    };

    match state.run_repo.list_stages(run_id).await {
        Ok(stages) => (StatusCode::OK, Json(RunSnapshot { run, stages })).into_response(),
        Err(err) => {
            error!(%run_id, ?err, "failed to load stages");
            JsonResponse::server_error("Failed to load stages").into_response()
        }
    }
}

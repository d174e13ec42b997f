use super::prelude::*;

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub content: Option<String>,
    #[serde(default)]
    pub stage_name: Option<String>,
}

pub async fn score_content(
    State(state): State<AppState>,
    Json(payload): Json<ScoreRequest>,
) -> Response {
    let Some(content) = payload.content.filter(|c| !c.is_empty()) else {
        return JsonResponse::bad_request("content is required").into_response();
    };
    let Some(scorer) = state.scorer.as_ref() else {
        return JsonResponse::service_unavailable("Content scoring is not configured")
            .into_response();
    };

    match scorer.score(&content, payload.stage_name.as_deref()).await {
        Ok(score) => (StatusCode::OK, Json(score)).into_response(),
        Err(err) => {
            error!(?err, "content scoring failed");
            JsonResponse::server_error("Failed to score content").into_response()
        }
    }
}

use super::prelude::*;

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub run_id: Option<Uuid>,
    pub action: Option<String>,
}

/// Pause, resume or stop a run. Only the transitions allowed from the
/// run's current status are applied; anything else is a 409.
pub async fn control_run(
    State(state): State<AppState>,
    Json(payload): Json<ControlRequest>,
) -> Response {
    let (Some(run_id), Some(raw_action)) = (payload.run_id, payload.action.as_deref()) else {
        return JsonResponse::bad_request("run_id and action are required").into_response();
    };
    let Some(action) = RunAction::parse(raw_action) else {
        return JsonResponse::bad_request("action must be one of: pause, resume, stop")
            .into_response();
    };

    let run = match state.run_repo.find_run(run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return JsonResponse::not_found("Run not found").into_response(),
        Err(err) => {
            error!(%run_id, ?err, "failed to load run for control action");
            return JsonResponse::server_error("Failed to update run").into_response();
        }
    };

    let current = run.run_status();
    if !current.map(|s| action.is_allowed_from(s)).unwrap_or(false) {
        return invalid_transition(action, &run.status);
    }

    let target = action.target_status();
    let completed_at = (action == RunAction::Stop).then(OffsetDateTime::now_utc);
    let updated = match state
        .run_repo
        .transition_run(run_id, action.allowed_from(), target, completed_at)
        .await
    {
        Ok(Some(updated)) => updated,
        // The status moved between the read and the write.
        Ok(None) => return invalid_transition(action, &run.status),
        Err(err) => {
            error!(%run_id, ?err, "failed to update run status");
            return JsonResponse::server_error("Failed to update run").into_response();
        }
    };

    match action {
        RunAction::Stop => {
            state.pollers.cancel(run_id);
            if let Err(err) = state
                .run_repo
                .set_request_status_for_run(run_id, RunStatus::Cancelled.as_str())
                .await
            {
                error!(%run_id, ?err, "failed to cancel content request");
            }
        }
        RunAction::Resume => {
            if let Some(execution_id) = updated.n8n_execution_id.as_deref() {
                state.pollers.start(run_id, execution_id);
            }
        }
        RunAction::Pause => {}
    }

    state.live.publish_run_update(
        run_id,
        RunUpdate {
            status: Some(updated.status.clone()),
            completed_at: updated.completed_at,
            ..Default::default()
        },
    );

    info!(%run_id, action = action.as_str(), status = %target, "run control applied");
    (
        StatusCode::OK,
        Json(json!({ "success": true, "status": target.as_str() })),
    )
        .into_response()
}

fn invalid_transition(action: RunAction, status: &str) -> Response {
    JsonResponse::conflict_with_code(
        &format!("Cannot {} a run that is {}", action.as_str(), status),
        "invalid_transition",
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::Request,
        routing::post,
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::db::mock_db::{run_fixture, InMemoryRunRepository};
    use crate::services::live_channel::LiveEvent;
    use crate::services::mock_n8n::MockExecutionSource;
    use crate::state::test_support::test_state;

    fn control_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/control")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn app_for(state: AppState) -> Router {
        Router::new()
            .route("/control", post(control_run))
            .with_state(state)
    }

    #[tokio::test]
    async fn stop_marks_run_and_request_and_publishes() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let run = run_fixture(RunStatus::Running);
        let (run_id, request_id) = (run.id, run.content_request_id);
        repo.insert_run(run);
        let state = test_state(repo.clone(), Arc::new(MockExecutionSource::unreachable()), None);
        let mut rx = state.live.subscribe(run_id);

        let res = app_for(state)
            .oneshot(control_request(json!({ "run_id": run_id, "action": "stop" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = to_bytes(res.into_body(), 1024).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!({ "success": true, "status": "stopped" }));

        let run = repo.run(run_id).unwrap();
        assert_eq!(run.status, "stopped");
        assert!(run.completed_at.is_some());
        assert_eq!(repo.request_status(request_id).as_deref(), Some("cancelled"));

        match rx.recv().await.unwrap() {
            LiveEvent::RunUpdate(update) => {
                assert_eq!(update.status.as_deref(), Some("stopped"));
                assert!(update.completed_at.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_cancels_active_poller() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let run = run_fixture(RunStatus::Running);
        let run_id = run.id;
        repo.insert_run(run);
        let source = Arc::new(MockExecutionSource::new([Some(
            json!({ "finished": false, "status": "running" }),
        )]));
        let state = test_state(repo.clone(), source, None);
        assert!(state.pollers.start(run_id, "exec-1"));

        let res = app_for(state.clone())
            .oneshot(control_request(json!({ "run_id": run_id, "action": "stop" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!state.pollers.is_active(run_id));
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let mut run = run_fixture(RunStatus::Running);
        run.n8n_execution_id = None;
        let run_id = run.id;
        repo.insert_run(run);
        let state = test_state(repo.clone(), Arc::new(MockExecutionSource::unreachable()), None);

        let res = app_for(state.clone())
            .oneshot(control_request(json!({ "run_id": run_id, "action": "pause" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(repo.run(run_id).unwrap().status, "paused");

        let res = app_for(state)
            .oneshot(control_request(json!({ "run_id": run_id, "action": "resume" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let run = repo.run(run_id).unwrap();
        assert_eq!(run.status, "running");
        assert!(run.completed_at.is_none());
    }

    #[tokio::test]
    async fn resume_restarts_polling_for_tracked_runs() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let run = run_fixture(RunStatus::Paused);
        let run_id = run.id;
        repo.insert_run(run);
        let source = Arc::new(MockExecutionSource::new([Some(
            json!({ "finished": false, "status": "running" }),
        )]));
        let state = test_state(repo, source, None);

        let res = app_for(state.clone())
            .oneshot(control_request(json!({ "run_id": run_id, "action": "resume" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(state.pollers.is_active(run_id));
        state.pollers.cancel(run_id);
    }

    #[tokio::test]
    async fn terminal_runs_reject_every_action() {
        for action in ["pause", "resume", "stop"] {
            let repo = Arc::new(InMemoryRunRepository::new());
            let run = run_fixture(RunStatus::Completed);
            let run_id = run.id;
            repo.insert_run(run);
            let state =
                test_state(repo.clone(), Arc::new(MockExecutionSource::unreachable()), None);

            let res = app_for(state)
                .oneshot(control_request(json!({ "run_id": run_id, "action": action })))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::CONFLICT, "action {action}");
            assert_eq!(repo.run(run_id).unwrap().status, "completed");
        }
    }

    #[tokio::test]
    async fn resume_requires_paused() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let run = run_fixture(RunStatus::Running);
        let run_id = run.id;
        repo.insert_run(run);
        let state = test_state(repo, Arc::new(MockExecutionSource::unreachable()), None);

        let res = app_for(state)
            .oneshot(control_request(json!({ "run_id": run_id, "action": "resume" })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn bad_input_is_rejected() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let state = test_state(repo, Arc::new(MockExecutionSource::unreachable()), None);

        let res = app_for(state.clone())
            .oneshot(control_request(json!({ "run_id": Uuid::new_v4() })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app_for(state.clone())
            .oneshot(control_request(
                json!({ "run_id": Uuid::new_v4(), "action": "restart" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app_for(state)
            .oneshot(control_request(
                json!({ "run_id": Uuid::new_v4(), "action": "pause" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}

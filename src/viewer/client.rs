use async_stream::try_stream;
use eventsource_stream::Eventsource;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;
use uuid::Uuid;

use crate::models::content_run::{RunAction, RunSnapshot};
use crate::services::live_channel::LiveEvent;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("run tracking request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("run tracking API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("live event could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("live event stream failed: {0}")]
    Stream(String),
}

/// HTTP client for the run tracking API, used to drive a `RunView`.
#[derive(Clone)]
pub struct RunTrackingClient {
    base_url: String,
    http: Client,
}

impl RunTrackingClient {
    /// `base_url` is the API root, e.g. `http://localhost:3000/api/run-tracking`.
    pub fn new(http: &Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: http.clone(),
        }
    }

    pub async fn fetch_run(&self, run_id: Uuid) -> Result<RunSnapshot, ClientError> {
        let resp = self
            .http
            .get(format!("{}/{}", self.base_url, run_id))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<RunSnapshot>().await?)
    }

    /// Ask the server to apply `action`, then re-fetch so the caller sees
    /// the authoritative state.
    pub async fn control(
        &self,
        run_id: Uuid,
        action: RunAction,
    ) -> Result<RunSnapshot, ClientError> {
        let resp = self
            .http
            .post(format!("{}/control", self.base_url))
            .json(&json!({ "run_id": run_id, "action": action.as_str() }))
            .send()
            .await?;
        check_status(resp).await?;
        self.fetch_run(run_id).await
    }

    /// Live events for `run_id`. Unknown event names are skipped.
    pub async fn subscribe(
        &self,
        run_id: Uuid,
    ) -> Result<impl Stream<Item = Result<LiveEvent, ClientError>>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/{}/events", self.base_url, run_id))
            .header("accept", "text/event-stream")
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let mut events = Box::pin(resp.bytes_stream().eventsource());

        Ok(try_stream! {
            while let Some(frame) = events.next().await {
                let frame = frame.map_err(|err| ClientError::Stream(err.to_string()))?;
                match LiveEvent::decode(&frame.event, &frame.data) {
                    Some(event) => {
                        let event = event?;
                        yield event;
                    }
                    None => debug!(event = %frame.event, "ignoring unknown live event"),
                }
            }
        })
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::run_fixture;
    use crate::models::content_run::RunStatus;
    use crate::viewer::RunView;

    #[tokio::test]
    async fn control_posts_action_and_refetches() {
        let mut run = run_fixture(RunStatus::Paused);
        let run_id = run.id;
        let server = httpmock::MockServer::start_async().await;

        let control = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/api/run-tracking/control")
                    .json_body(json!({ "run_id": run_id, "action": "stop" }));
                then.status(200)
                    .header("content-type", "application/json")
                    .body(json!({ "success": true, "status": "stopped" }).to_string());
            })
            .await;
        run.status = "stopped".into();
        let snapshot = RunSnapshot {
            run,
            stages: Vec::new(),
        };
        let fetch = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET)
                    .path(format!("/api/run-tracking/{run_id}"));
                then.status(200)
                    .header("content-type", "application/json")
                    .body(serde_json::to_string(&snapshot).unwrap());
            })
            .await;

        let client = RunTrackingClient::new(&Client::new(), &server.url("/api/run-tracking"));
        let refreshed = client.control(run_id, RunAction::Stop).await.unwrap();

        control.assert_async().await;
        fetch.assert_async().await;
        let view = RunView::bootstrap(refreshed);
        assert_eq!(view.status(), Some(RunStatus::Stopped));
        assert!(view.available_actions().is_empty());
    }

    #[tokio::test]
    async fn api_errors_carry_the_server_message() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/control");
                then.status(409)
                    .header("content-type", "application/json")
                    .body(
                        json!({
                            "status": "error",
                            "success": false,
                            "message": "Cannot resume a run that is completed",
                            "code": "invalid_transition"
                        })
                        .to_string(),
                    );
            })
            .await;

        let client = RunTrackingClient::new(&Client::new(), &server.base_url());
        let err = client
            .control(Uuid::new_v4(), RunAction::Resume)
            .await
            .expect_err("conflict");
        match err {
            ClientError::Api { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "Cannot resume a run that is completed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_decodes_sse_frames() {
        let run_id = Uuid::new_v4();
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET)
                    .path(format!("/{run_id}/events"));
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(
                        ":keepalive\n\n\
                         event: run-update\ndata: {\"completed_stages\":4}\n\n\
                         event: heartbeat\ndata: {}\n\n\
                         event: run-update\ndata: {\"status\":\"paused\"}\n\n",
                    );
            })
            .await;

        let client = RunTrackingClient::new(&Client::new(), &server.base_url());
        let stream = client.subscribe(run_id).await.unwrap();
        tokio::pin!(stream);

        let mut view = RunView::bootstrap(RunSnapshot {
            run: run_fixture(RunStatus::Running),
            stages: Vec::new(),
        });
        while let Some(event) = stream.next().await {
            view.apply(event.unwrap());
        }
        assert_eq!(view.run.completed_stages, 4);
        assert_eq!(view.status(), Some(RunStatus::Paused));
    }
}

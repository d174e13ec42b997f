pub(crate) use std::{convert::Infallible, time::Duration};

pub(crate) use async_stream::stream;
pub(crate) use axum::response::sse::{Event, KeepAlive, Sse};
pub(crate) use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
pub(crate) use serde::Deserialize;
pub(crate) use serde_json::json;
pub(crate) use time::OffsetDateTime;
pub(crate) use tracing::{error, info, warn};
pub(crate) use uuid::Uuid;

pub(crate) use crate::{
    models::content_run::{RunAction, RunSnapshot, RunStatus, RunUpdate},
    responses::JsonResponse,
    services::live_channel::RunPublisher,
    state::AppState,
};

mod control;
mod lifecycle;
mod prelude;
mod scoring;
mod sse;
mod stages;

pub use control::control_run;
pub use lifecycle::{create_run, get_run};
pub use scoring::score_content;
pub use sse::sse_run_events;
pub use stages::update_stage;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Everything mounted under `/api/run-tracking`.
pub fn run_tracking_routes() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_run))
        .route("/control", post(control_run))
        .route("/update-stage", post(update_stage))
        .route("/score-content", post(score_content))
        .route("/{run_id}", get(get_run))
        .route("/{run_id}/events", get(sse_run_events))
}

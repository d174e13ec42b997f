use tokio::sync::broadcast::error::RecvError;

use super::prelude::*;
use crate::services::live_channel::channel_name;

/// Live channel for one run as Server-Sent Events. Only events published
/// after the subscription are delivered; viewers bootstrap with `GET
/// /{run_id}` first.
pub async fn sse_run_events(
    State(app_state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = app_state.live.subscribe(run_id);
    let channel = channel_name(run_id);

    let s = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    match Event::default().event(event.name()).json_data(event.payload()) {
                        Ok(ev) => yield Ok::<Event, Infallible>(ev),
                        Err(err) => warn!(%channel, ?err, "could not encode live event"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%channel, skipped, "live subscriber lagged; skipping events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(s).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keepalive"),
    )
}

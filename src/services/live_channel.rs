use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::models::content_run::RunUpdate;
use crate::models::run_stage::RunStage;

pub const RUN_UPDATE_EVENT: &str = "run-update";
pub const STAGE_UPDATE_EVENT: &str = "stage-update";

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum LiveEvent {
    #[serde(rename = "run-update")]
    RunUpdate(RunUpdate),
    #[serde(rename = "stage-update")]
    StageUpdate(Box<RunStage>),
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::RunUpdate(_) => RUN_UPDATE_EVENT,
            LiveEvent::StageUpdate(_) => STAGE_UPDATE_EVENT,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        let encoded = match self {
            LiveEvent::RunUpdate(update) => serde_json::to_value(update),
            LiveEvent::StageUpdate(stage) => serde_json::to_value(stage),
        };
        encoded.unwrap_or(serde_json::Value::Null)
    }

    /// Rebuild an event from its wire name and JSON payload.
    pub fn decode(name: &str, payload: &str) -> Option<Result<Self, serde_json::Error>> {
        match name {
            RUN_UPDATE_EVENT => Some(serde_json::from_str(payload).map(LiveEvent::RunUpdate)),
            STAGE_UPDATE_EVENT => Some(
                serde_json::from_str::<RunStage>(payload)
                    .map(|stage| LiveEvent::StageUpdate(Box::new(stage))),
            ),
            _ => None,
        }
    }
}

pub fn channel_name(run_id: Uuid) -> String {
    format!("run-{run_id}")
}

/// Best-effort delivery of run deltas to whoever is listening right now.
/// Implementations must not block and must not report failures: the run
/// store stays the source of truth and viewers re-fetch it.
pub trait RunPublisher: Send + Sync {
    fn publish_run_update(&self, run_id: Uuid, update: RunUpdate);
    fn publish_stage_update(&self, run_id: Uuid, stage: RunStage);
}

/// In-process fan-out, one broadcast channel per run. There is no backlog:
/// a subscriber only sees events published after it subscribed.
#[derive(Default)]
pub struct LiveChannelHub {
    channels: DashMap<Uuid, broadcast::Sender<LiveEvent>>,
}

impl LiveChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, run_id: Uuid) -> broadcast::Receiver<LiveEvent> {
        self.channels
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, run_id: Uuid) -> usize {
        self.channels
            .get(&run_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn publish(&self, run_id: Uuid, event: LiveEvent) {
        let name = event.name();
        let delivered = match self.channels.get(&run_id) {
            Some(tx) => tx.send(event).ok(),
            None => return,
        };
        match delivered {
            Some(receivers) => {
                trace!(channel = %channel_name(run_id), event = name, receivers, "published live event")
            }
            None => {
                self.channels
                    .remove_if(&run_id, |_, tx| tx.receiver_count() == 0);
            }
        }
    }
}

impl RunPublisher for LiveChannelHub {
    fn publish_run_update(&self, run_id: Uuid, update: RunUpdate) {
        self.publish(run_id, LiveEvent::RunUpdate(update));
    }

    fn publish_stage_update(&self, run_id: Uuid, stage: RunStage) {
        self.publish(run_id, LiveEvent::StageUpdate(Box::new(stage)));
    }
}

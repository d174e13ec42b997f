use crate::db::run_repository::RunRepository;
use crate::engine::{ExecutionPoller, PollSettings, PollerRegistry};
use crate::services::live_channel::LiveChannelHub;
use crate::services::n8n::ExecutionSource;
use crate::services::scoring::ContentScorer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub run_repo: Arc<dyn RunRepository>,
    pub live: Arc<LiveChannelHub>,
    pub pollers: Arc<PollerRegistry>,
    pub scorer: Option<Arc<dyn ContentScorer>>,
}

impl AppState {
    /// Wire the live channel and poller registry around a store and an
    /// execution source.
    pub fn new(
        poll: PollSettings,
        run_repo: Arc<dyn RunRepository>,
        source: Arc<dyn ExecutionSource>,
        scorer: Option<Arc<dyn ContentScorer>>,
    ) -> Self {
        let live = Arc::new(LiveChannelHub::new());
        let poller = ExecutionPoller::new(run_repo.clone(), source, live.clone(), poll);
        Self {
            run_repo,
            live,
            pollers: Arc::new(PollerRegistry::new(Arc::new(poller))),
            scorer,
        }
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use super::poller::ExecutionPoller;

/// Owns the background pollers, at most one per run.
pub struct PollerRegistry {
    poller: Arc<ExecutionPoller>,
    active: Arc<DashMap<Uuid, (u64, watch::Sender<bool>)>>,
    generation: AtomicU64,
}

impl PollerRegistry {
    pub fn new(poller: Arc<ExecutionPoller>) -> Self {
        Self {
            poller,
            active: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Spawn a poller for `run_id` unless one is already running. Returns
    /// whether a new task was started.
    pub fn start(&self, run_id: Uuid, execution_id: &str) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel_rx = match self.active.entry(run_id) {
            Entry::Occupied(_) => {
                debug!(%run_id, "poller already active; not starting another");
                return false;
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(false);
                slot.insert((generation, tx));
                rx
            }
        };

        let poller = self.poller.clone();
        let active = self.active.clone();
        let execution_id = execution_id.to_string();
        tokio::spawn(async move {
            let outcome = poller.run(run_id, &execution_id, cancel_rx).await;
            active.remove_if(&run_id, |_, (owner, _)| *owner == generation);
            debug!(%run_id, ?outcome, "poller task exited");
        });
        true
    }

    /// Signal the run's poller to stop. Returns whether one was active.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.active.remove(&run_id) {
            Some((_, (_, tx))) => {
                let _ = tx.send(true);
                info!(%run_id, "poller cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, run_id: Uuid) -> bool {
        self.active.contains_key(&run_id)
    }
}

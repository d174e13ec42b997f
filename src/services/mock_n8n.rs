use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::n8n::{EngineError, ExecutionSource, N8nExecution};

/// Replays a fixed script of fetch results. `None` entries simulate an
/// unreachable engine; once the script runs out the last entry repeats.
#[derive(Default)]
pub struct MockExecutionSource {
    script: Mutex<VecDeque<Option<serde_json::Value>>>,
    last: Mutex<Option<Option<serde_json::Value>>>,
    pub fetches: AtomicUsize,
}

impl MockExecutionSource {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Option<serde_json::Value>>,
    {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self::new([None])
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionSource for MockExecutionSource {
    async fn fetch_execution(&self, _execution_id: &str) -> Result<N8nExecution, EngineError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            match script.pop_front() {
                Some(entry) => {
                    *last = Some(entry.clone());
                    entry
                }
                None => last.clone().flatten(),
            }
        };
        match next {
            Some(body) => Ok(serde_json::from_value(body)?),
            None => Err(EngineError::Status {
                status: 503,
                body: "engine unavailable".to_string(),
            }),
        }
    }
}

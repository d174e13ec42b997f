use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::aggregate::{summarize, terminal_outcome};
use super::catalog::{lookup, StageDefinition};
use crate::db::run_repository::RunRepository;
use crate::models::content_run::{RunStatus, RunUpdate};
use crate::models::run_stage::{StageMetadata, StageStatus, StageUpsert};
use crate::services::live_channel::RunPublisher;
use crate::services::n8n::{ExecutionSource, N8nExecution, NodeRun};

const PERSISTENCE_MAX_ATTEMPTS: usize = 3;
#[cfg(test)]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(5);
#[cfg(not(test))]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PollerError {
    #[error(
        "poller persistence operation `{operation}` failed for run {run_id} after {attempts} attempts: {source}"
    )]
    Persistence {
        run_id: Uuid,
        operation: &'static str,
        attempts: usize,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
    pub failure_limit: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 360,
            failure_limit: 5,
        }
    }
}

/// Why a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The execution finished and the run was moved to this status.
    Finished(RunStatus),
    /// The run was found in this status (stopped, cancelled or already
    /// terminal) before a fetch.
    Halted(RunStatus),
    Cancelled,
    RunMissing,
    FetchFailuresExceeded,
    AttemptsExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    Done(PollOutcome),
}

/// Tracks one n8n execution on behalf of one run. A poller holds no per-run
/// state of its own; the registry spawns `run` once per run.
pub struct ExecutionPoller {
    repo: Arc<dyn RunRepository>,
    source: Arc<dyn ExecutionSource>,
    publisher: Arc<dyn RunPublisher>,
    settings: PollSettings,
}

impl ExecutionPoller {
    pub fn new(
        repo: Arc<dyn RunRepository>,
        source: Arc<dyn ExecutionSource>,
        publisher: Arc<dyn RunPublisher>,
        settings: PollSettings,
    ) -> Self {
        Self {
            repo,
            source,
            publisher,
            settings,
        }
    }

    /// Poll until the execution finishes, the run is halted, `cancel` flips
    /// to `true` (or its sender is dropped) or the attempt budget runs out.
    /// Cycles never overlap: a tick that fires while a cycle is in flight is
    /// skipped.
    pub async fn run(
        &self,
        run_id: Uuid,
        execution_id: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> PollOutcome {
        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures = 0u32;

        info!(%run_id, execution_id, "starting execution poller");

        for attempt in 1..=self.settings.max_attempts {
            if *cancel.borrow() {
                return PollOutcome::Cancelled;
            }
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        debug!(%run_id, "poller cancelled");
                        return PollOutcome::Cancelled;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            debug!(%run_id, attempt, "poll cycle");
            if let CycleOutcome::Done(outcome) =
                self.poll_cycle(run_id, execution_id, &mut failures).await
            {
                info!(%run_id, ?outcome, "execution poller finished");
                return outcome;
            }
        }

        warn!(
            %run_id,
            max_attempts = self.settings.max_attempts,
            "poll attempt budget exhausted; leaving run as is"
        );
        PollOutcome::AttemptsExhausted
    }

    /// One cycle: check the persisted status, fetch the execution and apply
    /// it. `failures` counts consecutive fetch failures across cycles.
    pub async fn poll_cycle(
        &self,
        run_id: Uuid,
        execution_id: &str,
        failures: &mut u32,
    ) -> CycleOutcome {
        let repo = &self.repo;
        let status = match retry_with_backoff(run_id, "get_run_status", || {
            repo.get_run_status(run_id)
        })
        .await
        {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(%run_id, "run disappeared; stopping poller");
                return CycleOutcome::Done(PollOutcome::RunMissing);
            }
            Err(err) => {
                error!(%run_id, ?err, "could not read run status; skipping cycle");
                return CycleOutcome::Continue;
            }
        };

        if let Some(status) = RunStatus::parse(&status).filter(|s| s.is_terminal()) {
            if status.halts_polling() {
                info!(%run_id, %status, "run halted by user; stopping poller");
            }
            return CycleOutcome::Done(PollOutcome::Halted(status));
        }

        let execution = match self.source.fetch_execution(execution_id).await {
            Ok(execution) => {
                *failures = 0;
                execution
            }
            Err(err) => {
                *failures += 1;
                warn!(
                    %run_id,
                    execution_id,
                    failures = *failures,
                    ?err,
                    "failed to fetch n8n execution"
                );
                if *failures >= self.settings.failure_limit {
                    self.fail_unreachable(run_id).await;
                    return CycleOutcome::Done(PollOutcome::FetchFailuresExceeded);
                }
                return CycleOutcome::Continue;
            }
        };

        match self.apply_execution(run_id, &execution).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(%run_id, ?err, "failed to persist poll results; skipping cycle");
                CycleOutcome::Continue
            }
        }
    }

    /// Write every recognised node as a stage, then the run once.
    pub async fn apply_execution(
        &self,
        run_id: Uuid,
        execution: &N8nExecution,
    ) -> Result<CycleOutcome, PollerError> {
        let recognised: Vec<(&'static StageDefinition, NodeRun)> = execution
            .node_runs()
            .into_iter()
            .filter_map(|(name, node)| lookup(name).map(|def| (def, node)))
            .collect();

        let repo = &self.repo;
        for (def, node) in &recognised {
            let upsert = stage_upsert_from(def, node);
            let row = retry_with_backoff(run_id, "upsert_stage", || {
                repo.upsert_stage(run_id, &upsert)
            })
            .await?;
            self.publisher.publish_stage_update(run_id, row);
        }

        let progress = summarize(recognised.iter().map(|(def, _)| *def));
        let Some(run) = retry_with_backoff(run_id, "record_progress", || {
            repo.record_progress(run_id, progress.completed_stages, &progress.current_stage)
        })
        .await?
        else {
            return Ok(CycleOutcome::Done(PollOutcome::RunMissing));
        };

        let mut update = RunUpdate {
            current_stage: Some(run.current_stage.clone()),
            completed_stages: Some(run.completed_stages),
            ..Default::default()
        };

        let Some(outcome) = terminal_outcome(execution.finished, execution.status.as_deref())
        else {
            self.publisher.publish_run_update(run_id, update);
            return Ok(CycleOutcome::Continue);
        };

        let completed_at = OffsetDateTime::now_utc();
        let finished = retry_with_backoff(run_id, "finish_run", || {
            repo.finish_run(run_id, outcome, completed_at)
        })
        .await?;

        if !finished {
            // Someone else (a stop, or a concurrent writer) got there first.
            self.publisher.publish_run_update(run_id, update);
            let current = run.run_status().unwrap_or(outcome);
            return Ok(CycleOutcome::Done(PollOutcome::Halted(current)));
        }

        update.status = Some(outcome.as_str().to_string());
        update.completed_at = Some(completed_at);
        self.publisher.publish_run_update(run_id, update);

        retry_with_backoff(run_id, "set_request_status", || {
            repo.set_request_status_for_run(run_id, outcome.as_str())
        })
        .await?;

        info!(%run_id, status = %outcome, "execution finished");
        Ok(CycleOutcome::Done(PollOutcome::Finished(outcome)))
    }

    async fn fail_unreachable(&self, run_id: Uuid) {
        let repo = &self.repo;
        let completed_at = OffsetDateTime::now_utc();
        match retry_with_backoff(run_id, "finish_run", || {
            repo.finish_run(run_id, RunStatus::Failed, completed_at)
        })
        .await
        {
            Ok(true) => {
                error!(%run_id, "n8n unreachable; run marked failed");
                self.publisher
                    .publish_run_update(run_id, RunUpdate::status(RunStatus::Failed));
            }
            Ok(false) => debug!(%run_id, "run already terminal; not marking failed"),
            Err(err) => error!(%run_id, ?err, "could not mark unreachable run failed"),
        }
    }
}

fn timestamp_from_millis(ms: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}

/// Stage row for one recognised node. A missing `executionTime` counts as
/// zero; a missing `startTime` leaves both timestamps unset.
pub fn stage_upsert_from(def: &StageDefinition, node: &NodeRun) -> StageUpsert {
    let duration_ms = node.execution_time_ms.unwrap_or(0);
    let started_at = node.start_time_ms.and_then(timestamp_from_millis);
    let completed_at = node
        .start_time_ms
        .and_then(|start| timestamp_from_millis(start.saturating_add(duration_ms)));

    StageUpsert {
        stage_name: def.display_name.to_string(),
        stage_order: def.order,
        status: StageStatus::Completed,
        output_text: node
            .output
            .as_ref()
            .and_then(|out| serde_json::to_string_pretty(out).ok()),
        output_metadata: node
            .output
            .as_ref()
            .and_then(StageMetadata::from_output)
            .map(|meta| meta.to_value()),
        error_message: None,
        started_at,
        completed_at,
        duration_ms: Some(duration_ms),
    }
}

pub(crate) async fn retry_with_backoff<T, Fut, F>(
    run_id: Uuid,
    operation: &'static str,
    mut op: F,
) -> Result<T, PollerError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0usize;
    let mut backoff = PERSISTENCE_INITIAL_BACKOFF;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < PERSISTENCE_MAX_ATTEMPTS => {
                warn!(
                    %run_id,
                    operation,
                    attempt,
                    ?err,
                    "poller persistence operation failed; retrying"
                );
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                return Err(PollerError::Persistence {
                    run_id,
                    operation,
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}

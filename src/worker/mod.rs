use tracing::{error, info};

use crate::state::AppState;

/// Re-attach pollers to runs that were still being tracked when the
/// process last stopped. Paused runs are included: pausing does not stop
/// the external execution, so its progress keeps being recorded.
pub async fn resume_active_pollers(state: &AppState) -> usize {
    let runs = match state.run_repo.list_pollable_runs().await {
        Ok(runs) => runs,
        Err(err) => {
            error!(?err, "could not list runs to resume polling");
            return 0;
        }
    };

    let mut started = 0;
    for run in runs {
        if let Some(execution_id) = run.n8n_execution_id.as_deref() {
            if state.pollers.start(run.id, execution_id) {
                started += 1;
            }
        }
    }
    info!(started, "resumed execution pollers");
    started
}

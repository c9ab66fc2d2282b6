//! Background scheduling of sync tasks
//!
//! One interval loop per task. A failed run is logged, kept as the
//! service's last error, and retried on the next tick.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::services::tasks::SyncTask;
use crate::AppState;

/// Spawn a loop for every task; all stop when `cancel` fires
pub fn spawn_all(state: AppState, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    SyncTask::ALL
        .into_iter()
        .map(|task| {
            let period = Duration::from_secs(task.interval_secs(&state.config));
            tokio::spawn(run_periodic(task, period, state.clone(), cancel.clone()))
        })
        .collect()
}

async fn run_periodic(task: SyncTask, period: Duration, state: AppState, cancel: CancellationToken) {
    info!(task = %task, period_secs = period.as_secs(), "Scheduling task");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(task = %task, "Task loop stopped");
                break;
            }
            _ = interval.tick() => {
                run_once(task, &state).await;
            }
        }
    }
}

/// Run `task` now, recording a failure as the last error
pub async fn run_once(task: SyncTask, state: &AppState) {
    match state.run_task(task).await {
        Ok(report) => debug!(task = %task, ?report, "Task finished"),
        Err(e) => {
            error!(task = %task, error = %e, "Task failed");
            state.record_error(format!("{}: {}", task, e)).await;
        }
    }
}

//! Named sync tasks
//!
//! The scheduler and the `run` subcommand/HTTP endpoint address passes by
//! name.

use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;
use xpm_common::config::TomlConfig;

use crate::error::TaskError;
use crate::remote::Remotes;
use crate::services::push_queue::{self, PushQueueReport};
use crate::services::reconciler::{self, PassReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTask {
    CheckKintoPushQueue,
    CheckExperimentIsLive,
    CheckExperimentIsComplete,
    UpdateExperimentStatus,
}

impl SyncTask {
    pub const ALL: [SyncTask; 4] = [
        SyncTask::CheckKintoPushQueue,
        SyncTask::CheckExperimentIsLive,
        SyncTask::CheckExperimentIsComplete,
        SyncTask::UpdateExperimentStatus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SyncTask::CheckKintoPushQueue => "check_kinto_push_queue",
            SyncTask::CheckExperimentIsLive => "check_experiment_is_live",
            SyncTask::CheckExperimentIsComplete => "check_experiment_is_complete",
            SyncTask::UpdateExperimentStatus => "update_experiment_status",
        }
    }

    /// Seconds between scheduled runs
    pub fn interval_secs(&self, config: &TomlConfig) -> u64 {
        let schedule = &config.schedule;
        match self {
            SyncTask::CheckKintoPushQueue => schedule.push_queue_secs,
            SyncTask::CheckExperimentIsLive => schedule.live_check_secs,
            SyncTask::CheckExperimentIsComplete => schedule.complete_check_secs,
            SyncTask::UpdateExperimentStatus => schedule.normandy_status_secs,
        }
    }
}

impl fmt::Display for SyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SyncTask {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncTask::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| TaskError::UnknownTask(s.to_string()))
    }
}

/// Outcome of one task run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskReport {
    PushQueue(PushQueueReport),
    Pass(PassReport),
}

pub async fn run_task(
    task: SyncTask,
    pool: &SqlitePool,
    remotes: &Remotes,
    config: &TomlConfig,
) -> Result<TaskReport, TaskError> {
    let report = match task {
        SyncTask::CheckKintoPushQueue => TaskReport::PushQueue(
            push_queue::check_kinto_push_queue(pool, remotes.records.as_ref(), config).await?,
        ),
        SyncTask::CheckExperimentIsLive => TaskReport::Pass(
            reconciler::check_experiment_is_live(pool, remotes.records.as_ref(), &config.kinto).await?,
        ),
        SyncTask::CheckExperimentIsComplete => TaskReport::Pass(
            reconciler::check_experiment_is_complete(pool, remotes.records.as_ref(), &config.kinto)
                .await?,
        ),
        SyncTask::UpdateExperimentStatus => TaskReport::Pass(
            reconciler::update_experiment_status(pool, remotes.recipes.as_ref(), &config.normandy)
                .await?,
        ),
    };
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for task in SyncTask::ALL {
            assert_eq!(task.name().parse::<SyncTask>().unwrap(), task);
        }
        assert!(matches!(
            "send_review_email".parse::<SyncTask>(),
            Err(TaskError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_intervals_follow_config() {
        let config = TomlConfig::default();
        assert_eq!(SyncTask::CheckKintoPushQueue.interval_secs(&config), 60);
        assert_eq!(SyncTask::UpdateExperimentStatus.interval_secs(&config), 300);
    }
}

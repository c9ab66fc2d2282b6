//! Status transitions with change log
//!
//! Every status change goes through [`transition`]: the transition table is
//! checked, the row is updated only if it still holds the expected status,
//! and exactly one change log row is written in the same transaction.

use sqlx::SqlitePool;
use tracing::{debug, info};
use xpm_common::models::{ChangeLogEntry, Experiment};
use xpm_common::{Error, ExperimentStatus, Result};

use crate::db::experiments::{self, ExperimentUpdate};
use crate::db::changelog;

/// Move `experiment` to `to`, attributing the change to `changed_by`.
///
/// Fields in `update` are written in the same transaction. Fails with
/// `InvalidTransition` when the table forbids the move and with
/// `StaleStatus` when the stored status changed since `experiment` was read.
pub async fn transition(
    pool: &SqlitePool,
    experiment: &Experiment,
    to: ExperimentStatus,
    changed_by: &str,
    update: &ExperimentUpdate,
    message: Option<&str>,
) -> Result<ChangeLogEntry> {
    let from = experiment.status;
    from.check_transition(to)?;

    let mut tx = pool.begin().await?;

    let applied = experiments::update_status(&mut *tx, experiment.id, from, to, update).await?;
    if !applied {
        let current = experiments::current_status(&mut *tx, experiment.id).await?;
        drop(tx);
        return match current {
            Some(current) => {
                debug!(
                    experiment = %experiment.slug,
                    expected = %from,
                    current = %current,
                    "Stale status, transition refused"
                );
                Err(Error::StaleStatus {
                    expected: from,
                    current,
                })
            }
            None => Err(Error::NotFound(format!("experiment id {}", experiment.id))),
        };
    }

    let entry = changelog::append(&mut *tx, experiment.id, changed_by, Some(from), to, message).await?;
    tx.commit().await?;

    info!(
        experiment = %experiment.slug,
        from = %from,
        to = %to,
        changed_by,
        "Experiment status changed"
    );

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpm_common::db::init_memory_database;
    use xpm_common::models::NewExperiment;

    async fn draft(pool: &SqlitePool) -> Experiment {
        experiments::create_experiment(
            pool,
            &NewExperiment {
                slug: "t".to_string(),
                name: "T".to_string(),
                owner_email: "owner@example.com".to_string(),
                ..Default::default()
            },
            "owner@example.com",
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_allowed_transition_writes_one_row() {
        let pool = init_memory_database().await.unwrap();
        let experiment = draft(&pool).await;

        let entry = transition(
            &pool,
            &experiment,
            ExperimentStatus::Review,
            "owner@example.com",
            &ExperimentUpdate::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(entry.old_status, Some(ExperimentStatus::Draft));
        assert_eq!(entry.new_status, ExperimentStatus::Review);
        // creation row + this one
        assert_eq!(changelog::count_for_experiment(&pool, experiment.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_forbidden_transition_leaves_no_trace() {
        let pool = init_memory_database().await.unwrap();
        let experiment = draft(&pool).await;

        let result = transition(
            &pool,
            &experiment,
            ExperimentStatus::Live,
            "owner@example.com",
            &ExperimentUpdate::default(),
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: ExperimentStatus::Draft,
                to: ExperimentStatus::Live
            })
        ));
        assert_eq!(changelog::count_for_experiment(&pool, experiment.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_copy_is_refused() {
        let pool = init_memory_database().await.unwrap();
        let experiment = draft(&pool).await;
        let stale = experiment.clone();

        transition(
            &pool,
            &experiment,
            ExperimentStatus::Archived,
            "owner@example.com",
            &ExperimentUpdate::default(),
            None,
        )
        .await
        .unwrap();

        let result = transition(
            &pool,
            &stale,
            ExperimentStatus::Review,
            "owner@example.com",
            &ExperimentUpdate::default(),
            None,
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::StaleStatus {
                expected: ExperimentStatus::Draft,
                current: ExperimentStatus::Archived,
            })
        ));
        assert_eq!(changelog::count_for_experiment(&pool, experiment.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_copy_of_legal_move_reports_stale_status() {
        let pool = init_memory_database().await.unwrap();
        let experiment = draft(&pool).await;
        let stale = experiment.clone();

        transition(
            &pool,
            &experiment,
            ExperimentStatus::Review,
            "owner@example.com",
            &ExperimentUpdate::default(),
            None,
        )
        .await
        .unwrap();

        // review -> archived is allowed; the stored row just moved on
        let result = transition(
            &pool,
            &stale,
            ExperimentStatus::Archived,
            "owner@example.com",
            &ExperimentUpdate::default(),
            None,
        )
        .await;
        match result {
            Err(Error::StaleStatus { expected, current }) => {
                assert_eq!(expected, ExperimentStatus::Draft);
                assert_eq!(current, ExperimentStatus::Review);
            }
            other => panic!("expected StaleStatus, got {:?}", other),
        }
    }
}

//! Status reconciliation against remote systems
//!
//! Each pass loads the experiments it is responsible for, asks a
//! [`Reconcilable`] source whether each one is published remotely, and
//! applies [`next_status`]. A failure for one experiment is logged and
//! counted; the pass continues with the rest.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use xpm_common::config::{KintoConfig, NormandyConfig};
use xpm_common::models::Experiment;
use xpm_common::{Error, ExperimentStatus, ExperimentType, RemoteSystem};

use crate::db::experiments::{self, ExperimentUpdate};
use crate::error::TaskError;
use crate::remote::{RecordSummary, RecipeSource, RecordStore};
use crate::services::transitions;

/// What a remote system says about one experiment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObservation {
    /// Delivered to clients right now
    pub published: bool,
    /// Who made it so, when the remote system knows
    pub actor: Option<String>,
}

/// A remote view experiments can be reconciled against
#[async_trait]
pub trait Reconcilable: Send + Sync {
    fn system(&self) -> RemoteSystem;

    /// Identity recorded when the observation names no actor
    fn default_actor(&self) -> &str;

    /// Whether the remote system can say anything about `experiment`
    fn is_tracked(&self, _experiment: &Experiment) -> bool {
        true
    }

    async fn observe(&self, experiment: &Experiment) -> Result<RemoteObservation, TaskError>;
}

/// Target status implied by an observation, if any
pub fn next_status(current: ExperimentStatus, published: bool) -> Option<ExperimentStatus> {
    match (current, published) {
        (ExperimentStatus::Accepted, true) => Some(ExperimentStatus::Live),
        (ExperimentStatus::Live, false) => Some(ExperimentStatus::Complete),
        _ => None,
    }
}

/// Published record ids, fetched once per pass
pub struct RecordListSnapshot {
    ids: HashSet<String>,
    actor: String,
}

impl RecordListSnapshot {
    pub fn new(records: Vec<RecordSummary>, actor: impl Into<String>) -> Self {
        Self {
            ids: records.into_iter().map(|r| r.id).collect(),
            actor: actor.into(),
        }
    }

    pub async fn fetch(records: &dyn RecordStore, config: &KintoConfig) -> Result<Self, TaskError> {
        let main = records.get_main_records().await?;
        debug!(count = main.len(), "Fetched published records");
        Ok(Self::new(main, config.default_changelog_user.clone()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

#[async_trait]
impl Reconcilable for RecordListSnapshot {
    fn system(&self) -> RemoteSystem {
        RemoteSystem::Kinto
    }

    fn default_actor(&self) -> &str {
        &self.actor
    }

    async fn observe(&self, experiment: &Experiment) -> Result<RemoteObservation, TaskError> {
        let published = experiment
            .normandy_slug
            .as_deref()
            .map(|slug| self.contains(slug))
            .unwrap_or(false);

        Ok(RemoteObservation {
            published,
            actor: None,
        })
    }
}

/// Recipe enabled state, fetched per experiment
pub struct RecipeStatus<'a> {
    recipes: &'a dyn RecipeSource,
    default_actor: &'a str,
}

impl<'a> RecipeStatus<'a> {
    pub fn new(recipes: &'a dyn RecipeSource, config: &'a NormandyConfig) -> Self {
        Self {
            recipes,
            default_actor: &config.default_changelog_user,
        }
    }
}

#[async_trait]
impl Reconcilable for RecipeStatus<'_> {
    fn system(&self) -> RemoteSystem {
        RemoteSystem::Normandy
    }

    fn default_actor(&self) -> &str {
        self.default_actor
    }

    fn is_tracked(&self, experiment: &Experiment) -> bool {
        experiment.normandy_id.is_some()
    }

    async fn observe(&self, experiment: &Experiment) -> Result<RemoteObservation, TaskError> {
        let recipe_id = experiment.normandy_id.ok_or_else(|| {
            Error::InvalidInput(format!("experiment '{}' has no recipe id", experiment.slug))
        })?;

        let revision = self.recipes.get_recipe(recipe_id).await?;
        Ok(RemoteObservation {
            published: revision.enabled,
            actor: revision.approver_email().map(str::to_string),
        })
    }
}

/// One status change made by a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedTransition {
    pub experiment: String,
    pub from: ExperimentStatus,
    pub to: ExperimentStatus,
    pub changed_by: String,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub pass: String,
    pub examined: usize,
    pub transitioned: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub transitions: Vec<AppliedTransition>,
}

impl PassReport {
    pub fn new(pass: &str) -> Self {
        Self {
            pass: pass.to_string(),
            ..Default::default()
        }
    }
}

/// Reconcile `candidates` against `source`
pub async fn reconcile(
    pool: &SqlitePool,
    pass: &str,
    source: &dyn Reconcilable,
    candidates: Vec<Experiment>,
) -> PassReport {
    let mut report = PassReport::new(pass);
    let system = source.system();

    for experiment in candidates {
        report.examined += 1;

        if !source.is_tracked(&experiment) {
            debug!(pass, experiment = %experiment.slug, "Not tracked remotely, skipping");
            report.skipped += 1;
            continue;
        }

        let observation = match source.observe(&experiment).await {
            Ok(observation) => observation,
            Err(e) => {
                warn!(pass, experiment = %experiment.slug, error = %e, "Remote lookup failed");
                report.failed += 1;
                continue;
            }
        };

        let Some(to) = next_status(experiment.status, observation.published) else {
            report.unchanged += 1;
            continue;
        };

        let actor = observation
            .actor
            .unwrap_or_else(|| source.default_actor().to_string());
        let message = format!("Status updated from {:?} state", system);

        match transitions::transition(
            pool,
            &experiment,
            to,
            &actor,
            &ExperimentUpdate::default(),
            Some(&message),
        )
        .await
        {
            Ok(_) => {
                report.transitioned += 1;
                report.transitions.push(AppliedTransition {
                    experiment: experiment.slug.clone(),
                    from: experiment.status,
                    to,
                    changed_by: actor,
                });
            }
            Err(Error::StaleStatus { current, .. }) => {
                debug!(pass, experiment = %experiment.slug, current = %current, "Status moved concurrently");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(pass, experiment = %experiment.slug, error = %e, "Status update failed");
                report.failed += 1;
            }
        }
    }

    info!(
        pass,
        examined = report.examined,
        transitioned = report.transitioned,
        skipped = report.skipped,
        failed = report.failed,
        "Reconciliation pass finished"
    );
    report
}

/// Accepted rapid experiments whose record is published become live
pub async fn check_experiment_is_live(
    pool: &SqlitePool,
    records: &dyn RecordStore,
    config: &KintoConfig,
) -> Result<PassReport, TaskError> {
    const PASS: &str = "check_experiment_is_live";

    let candidates =
        experiments::list_by_type_and_status(pool, &[ExperimentType::Rapid], &[ExperimentStatus::Accepted])
            .await?;
    if candidates.is_empty() {
        return Ok(PassReport::new(PASS));
    }

    let snapshot = RecordListSnapshot::fetch(records, config).await?;
    Ok(reconcile(pool, PASS, &snapshot, candidates).await)
}

/// Live rapid experiments whose record was unpublished become complete
pub async fn check_experiment_is_complete(
    pool: &SqlitePool,
    records: &dyn RecordStore,
    config: &KintoConfig,
) -> Result<PassReport, TaskError> {
    const PASS: &str = "check_experiment_is_complete";

    let candidates =
        experiments::list_by_type_and_status(pool, &[ExperimentType::Rapid], &[ExperimentStatus::Live])
            .await?;
    if candidates.is_empty() {
        return Ok(PassReport::new(PASS));
    }

    let snapshot = RecordListSnapshot::fetch(records, config).await?;
    Ok(reconcile(pool, PASS, &snapshot, candidates).await)
}

/// Recipe-backed experiments follow their recipe's enabled flag
pub async fn update_experiment_status(
    pool: &SqlitePool,
    recipes: &dyn RecipeSource,
    config: &NormandyConfig,
) -> Result<PassReport, TaskError> {
    const PASS: &str = "update_experiment_status";

    let types: Vec<ExperimentType> = ExperimentType::ALL
        .into_iter()
        .filter(|t| t.remote_system() == RemoteSystem::Normandy)
        .collect();
    let candidates = experiments::list_by_type_and_status(
        pool,
        &types,
        &[ExperimentStatus::Accepted, ExperimentStatus::Live],
    )
    .await?;

    let source = RecipeStatus::new(recipes, config);
    Ok(reconcile(pool, PASS, &source, candidates).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_status() {
        use ExperimentStatus::*;

        assert_eq!(next_status(Accepted, true), Some(Live));
        assert_eq!(next_status(Live, false), Some(Complete));
        assert_eq!(next_status(Accepted, false), None);
        assert_eq!(next_status(Live, true), None);
        for status in [Draft, Review, Ship, Complete, Rejected, Archived] {
            assert_eq!(next_status(status, true), None);
            assert_eq!(next_status(status, false), None);
        }
    }

    #[test]
    fn test_snapshot_contains() {
        let snapshot = RecordListSnapshot::new(
            vec![RecordSummary {
                id: "a".to_string(),
            }],
            "bot@example.com",
        );
        assert!(snapshot.contains("a"));
        assert!(!snapshot.contains("b"));
        assert_eq!(snapshot.default_actor(), "bot@example.com");
    }
}

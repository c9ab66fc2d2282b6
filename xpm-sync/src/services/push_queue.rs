//! Rapid experiment push queue
//!
//! Rapid experiments waiting in `review` are pushed to the record-push
//! service one at a time: a new one is admitted only when no earlier push
//! is still waiting for a reviewer. Accepted experiments whose push never
//! reached the service are pushed again on the next pass.

use chrono::Local;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{info, warn};
use xpm_common::config::TomlConfig;
use xpm_common::models::{BucketRange, Experiment};
use xpm_common::slug::generate_normandy_slug;
use xpm_common::{Error, ExperimentStatus, ExperimentType, Result as CommonResult};

use crate::db::buckets;
use crate::db::experiments::{self, ExperimentUpdate};
use crate::error::TaskError;
use crate::remote::RecordStore;
use crate::services::{allocator, recipe, transitions};

/// What the admission step of a push queue check did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushQueueOutcome {
    /// Nothing admissible is waiting
    Empty,
    /// A previous push is still under review
    PendingReview { queued: usize },
    /// One experiment was accepted and pushed
    Pushed {
        experiment: String,
        normandy_slug: String,
        bucket_start: i64,
        bucket_count: i64,
    },
}

/// Result of one push queue check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushQueueReport {
    #[serde(flatten)]
    pub outcome: PushQueueOutcome,
    /// Accepted experiments pushed again because no record reached the service
    pub repushed: Vec<String>,
    /// Accepted experiments whose repeated push failed again
    pub repush_failed: Vec<String>,
    /// Queued experiments passed over because they cannot be accepted as they are
    pub ineligible: Vec<String>,
}

impl PushQueueReport {
    fn new(outcome: PushQueueOutcome) -> Self {
        Self {
            outcome,
            repushed: Vec::new(),
            repush_failed: Vec::new(),
            ineligible: Vec::new(),
        }
    }
}

/// Re-push stranded experiments, then admit at most one queued rapid
/// experiment and push it.
///
/// Queued experiments that cannot be accepted (no bug, channel or version,
/// or an unusable duration) are skipped so they do not hold up the ones
/// behind them. If the push of the admitted experiment fails it stays
/// `accepted`, the error is returned, and the next pass pushes it again.
pub async fn check_kinto_push_queue(
    pool: &SqlitePool,
    records: &dyn RecordStore,
    config: &TomlConfig,
) -> Result<PushQueueReport, TaskError> {
    let mut report = PushQueueReport::new(PushQueueOutcome::Empty);
    repush_stranded(pool, records, config, &mut report).await?;

    let queued =
        experiments::list_by_type_and_status(pool, &[ExperimentType::Rapid], &[ExperimentStatus::Review])
            .await?;

    if queued.is_empty() {
        info!("No rapid experiments queued");
        return Ok(report);
    }

    if records.has_pending_review().await? {
        info!(queued = queued.len(), "Push pending review, waiting");
        report.outcome = PushQueueOutcome::PendingReview {
            queued: queued.len(),
        };
        return Ok(report);
    }

    let mut admitted = None;
    for candidate in &queued {
        match admission_slug(candidate) {
            Ok(slug) => {
                admitted = Some((candidate, slug));
                break;
            }
            Err(e) => {
                warn!(experiment = %candidate.slug, error = %e, "Queued experiment cannot be accepted, skipping");
                report.ineligible.push(candidate.slug.clone());
            }
        }
    }
    let Some((next, normandy_slug)) = admitted else {
        info!(skipped = report.ineligible.len(), "No admissible rapid experiments queued");
        return Ok(report);
    };

    let update = ExperimentUpdate {
        normandy_slug: Some(normandy_slug.clone()),
        proposed_start_date: Some(Local::now().date_naive()),
    };

    transitions::transition(
        pool,
        next,
        ExperimentStatus::Accepted,
        &config.kinto.default_changelog_user,
        &update,
        Some("Selected from push queue"),
    )
    .await?;
    info!(experiment = %next.slug, normandy_slug = %normandy_slug, "Queued experiment accepted");

    let accepted = {
        let mut conn = pool.acquire().await?;
        experiments::get_by_id(&mut conn, next.id).await?
    };

    let range = match push_experiment_to_kinto(pool, records, config, &accepted).await {
        Ok(range) => range,
        Err(e) => {
            warn!(experiment = %accepted.slug, error = %e, "Push failed");
            return Err(e);
        }
    };

    report.outcome = PushQueueOutcome::Pushed {
        experiment: accepted.slug,
        normandy_slug,
        bucket_start: range.start,
        bucket_count: range.count,
    };
    Ok(report)
}

/// Slug the experiment would be accepted under, once everything its record
/// needs is known to be usable
fn admission_slug(experiment: &Experiment) -> CommonResult<String> {
    let slug = generate_normandy_slug(experiment)?;
    recipe::end_date(Local::now().date_naive(), experiment.proposed_duration)?;
    Ok(slug)
}

/// Push accepted rapid experiments that appear in neither the workspace nor
/// the published records. A failure is logged and left for the next pass.
async fn repush_stranded(
    pool: &SqlitePool,
    records: &dyn RecordStore,
    config: &TomlConfig,
    report: &mut PushQueueReport,
) -> Result<(), TaskError> {
    let accepted =
        experiments::list_by_type_and_status(pool, &[ExperimentType::Rapid], &[ExperimentStatus::Accepted])
            .await?;
    let candidates: Vec<&Experiment> = accepted.iter().filter(|e| e.normandy_slug.is_some()).collect();
    if candidates.is_empty() {
        return Ok(());
    }

    let known: HashSet<String> = records
        .get_workspace_records()
        .await?
        .into_iter()
        .chain(records.get_main_records().await?)
        .map(|r| r.id)
        .collect();

    for experiment in candidates {
        if experiment
            .normandy_slug
            .as_ref()
            .is_some_and(|slug| known.contains(slug))
        {
            continue;
        }

        info!(experiment = %experiment.slug, "Accepted experiment has no record, pushing again");
        match push_experiment_to_kinto(pool, records, config, experiment).await {
            Ok(_) => report.repushed.push(experiment.slug.clone()),
            Err(e) => {
                warn!(experiment = %experiment.slug, error = %e, "Repeated push failed");
                report.repush_failed.push(experiment.slug.clone());
            }
        }
    }
    Ok(())
}

/// Allocate buckets for an accepted rapid experiment, push its recipe
/// record and request review.
///
/// An experiment that already holds a range in its namespace keeps it, so
/// a retried push does not consume more buckets.
pub async fn push_experiment_to_kinto(
    pool: &SqlitePool,
    records: &dyn RecordStore,
    config: &TomlConfig,
    experiment: &Experiment,
) -> Result<BucketRange, TaskError> {
    let namespace = experiment.normandy_slug.as_deref().ok_or_else(|| {
        Error::InvalidInput(format!("experiment '{}' has no normandy slug", experiment.slug))
    })?;

    let range = match buckets::range_for_experiment(pool, experiment.id, namespace).await? {
        Some(existing) => existing,
        None => {
            allocator::request_namespace_buckets(pool, namespace, experiment.id, config.bucket_preset.count)
                .await?
        }
    };

    let record = recipe::rapid_recipe(experiment, &range, &config.bucket_preset)?.to_value()?;

    info!(experiment = %experiment.slug, "Pushing to Kinto");
    records.create_record(&record).await?;
    records.request_review().await?;
    info!(experiment = %experiment.slug, "Pushed to Kinto");

    Ok(range)
}

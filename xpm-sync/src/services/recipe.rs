//! Rapid experiment recipe record
//!
//! The record pushed to the record-push service for a rapid experiment.
//! Field names follow the consuming client's camelCase schema.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use xpm_common::config::BucketPresetConfig;
use xpm_common::models::{BucketRange, Experiment};
use xpm_common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RapidRecipe {
    /// Record id; the experiment's normandy slug
    pub id: String,
    pub filter_expression: String,
    pub arguments: RecipeArguments,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeArguments {
    pub slug: String,
    pub user_facing_name: String,
    pub user_facing_description: String,
    pub is_enrollment_paused: bool,
    pub bucket_config: BucketConfig,
    pub features: Vec<String>,
    pub branches: Vec<Branch>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub proposed_duration: Option<i64>,
    pub proposed_enrollment: Option<i64>,
    pub reference_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    pub randomization_unit: String,
    pub namespace: String,
    pub start: i64,
    pub count: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    pub slug: String,
    pub ratio: i64,
}

fn filter_expression(experiment: &Experiment) -> String {
    let mut clauses = Vec::new();
    if let Some(channel) = experiment.firefox_channel.as_deref() {
        clauses.push(format!("browserSettings.update.channel == \"{}\"", channel.to_lowercase()));
    }
    if let Some(min) = experiment.firefox_min_version.as_deref() {
        clauses.push(format!("env.version|versionCompare('{}') >= 0", min));
    }
    if let Some(max) = experiment.firefox_max_version.as_deref() {
        clauses.push(format!("env.version|versionCompare('{}') < 0", max));
    }
    clauses.join(" && ")
}

/// Last day of an experiment starting on `start` and running `duration`
/// days. Fails instead of overflowing the calendar.
pub fn end_date(start: NaiveDate, duration: Option<i64>) -> Result<Option<NaiveDate>> {
    let Some(days) = duration else {
        return Ok(None);
    };
    Duration::try_days(days)
        .and_then(|delta| start.checked_add_signed(delta))
        .map(Some)
        .ok_or_else(|| Error::InvalidInput(format!("proposed duration of {} days is out of range", days)))
}

/// Build the record for `experiment` using its allocated `range`.
///
/// The experiment must already carry a normandy slug (set when it was
/// accepted from the push queue).
pub fn rapid_recipe(
    experiment: &Experiment,
    range: &BucketRange,
    preset: &BucketPresetConfig,
) -> Result<RapidRecipe> {
    let slug = experiment.normandy_slug.clone().ok_or_else(|| {
        Error::InvalidInput(format!("experiment '{}' has no normandy slug", experiment.slug))
    })?;

    let end_date = match experiment.proposed_start_date {
        Some(start) => end_date(start, experiment.proposed_duration)?,
        None => None,
    };

    let arguments = RecipeArguments {
        slug: slug.clone(),
        user_facing_name: experiment.name.clone(),
        user_facing_description: experiment.public_description.clone().unwrap_or_default(),
        is_enrollment_paused: false,
        bucket_config: BucketConfig {
            randomization_unit: preset.randomization_unit.clone(),
            namespace: range.namespace.clone(),
            start: range.start,
            count: range.count,
            total: preset.total,
        },
        features: Vec::new(),
        branches: experiment
            .variants
            .iter()
            .map(|v| Branch {
                slug: v.slug.clone(),
                ratio: v.ratio,
            })
            .collect(),
        start_date: experiment.proposed_start_date,
        end_date,
        proposed_duration: experiment.proposed_duration,
        proposed_enrollment: experiment.proposed_enrollment,
        reference_branch: experiment.control().map(|v| v.slug.clone()),
    };

    Ok(RapidRecipe {
        id: slug,
        filter_expression: filter_expression(experiment),
        arguments,
    })
}

impl RapidRecipe {
    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| Error::Internal(format!("recipe serialization: {}", e)))
    }
}

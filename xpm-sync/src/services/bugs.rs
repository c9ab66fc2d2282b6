//! Bug tracker integration
//!
//! Files a tracking bug for an experiment and posts the variant summary as
//! a comment. Task entry points notify the requesting user of the outcome.

use sqlx::SqlitePool;
use tracing::{info, warn};
use xpm_common::config::TomlConfig;
use xpm_common::models::{Experiment, Variant};
use xpm_common::Error;

use crate::db::{experiments, notifications};
use crate::error::TaskError;
use crate::remote::{BugTracker, NewBug, RemoteError};

/// Bugzilla error code for an unknown user
pub const INVALID_USER_ERROR_CODE: i64 = 51;

/// Whiteboard label marking a bug filed for review
pub const REVIEW_WHITEBOARD_LABEL: &str = "Review";

/// Bug id from a `...show_bug.cgi?id=N` URL
pub fn get_bugzilla_id(url: &str) -> Option<i64> {
    let (_, rest) = url.split_once("id=")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn format_pref_variant(variant: &Variant) -> String {
    format!(
        "- {} {}: {}\n  Value: {}\n  Ratio: {}",
        if variant.is_control { "Control" } else { "Treatment" },
        variant.name,
        variant.description,
        variant.value.as_deref().unwrap_or(""),
        variant.ratio
    )
}

fn format_addon_variant(variant: &Variant) -> String {
    format!(
        "- {} {}: {}\n  Add-on: {}\n  Ratio: {}",
        if variant.is_control { "Control" } else { "Treatment" },
        variant.name,
        variant.description,
        variant.addon_release_url.as_deref().unwrap_or(""),
        variant.ratio
    )
}

/// Comment body describing the experiment's variants.
///
/// Empty for experiment types that have no template.
pub fn format_bug_body(experiment: &Experiment) -> String {
    if experiment.is_addon_experiment() {
        let variants: Vec<String> = experiment.variants.iter().map(format_addon_variant).collect();
        format!(
            "Experiment Type: Add-on Study\n\nVariants:\n{}",
            variants.join("\n")
        )
    } else if experiment.is_pref_experiment() {
        let variants: Vec<String> = experiment.variants.iter().map(format_pref_variant).collect();
        format!(
            "Experiment Type: Pref Flip Study\nPref Name: {}\nPref Type: {}\nPref Branch: {}\n\nVariants:\n{}",
            experiment.pref_name.as_deref().unwrap_or(""),
            experiment.pref_type.as_deref().unwrap_or(""),
            experiment.pref_branch.as_deref().unwrap_or(""),
            variants.join("\n")
        )
    } else {
        String::new()
    }
}

fn experiment_url(config: &TomlConfig, experiment: &Experiment) -> String {
    format!("{}/{}/", config.experiment_url_base.trim_end_matches('/'), experiment.slug)
}

fn overview(config: &TomlConfig, experiment: &Experiment) -> String {
    format!(
        "{}\n\nOwner: {}\nExperimenter: {}\nPublic description: {}",
        experiment,
        experiment.owner_email,
        experiment_url(config, experiment),
        experiment.public_description.as_deref().unwrap_or("")
    )
}

/// Bug creation payload for `experiment`
pub fn new_bug(config: &TomlConfig, experiment: &Experiment) -> NewBug {
    NewBug {
        product: config.bugzilla.product.clone(),
        component: config.bugzilla.component.clone(),
        version: "unspecified".to_string(),
        summary: format!("[Experiment]: {}", experiment),
        description: overview(config, experiment),
        assigned_to: Some(experiment.owner_email.clone()),
        cc: config.bugzilla.cc_list.clone(),
        bug_type: "task".to_string(),
        priority: "P3".to_string(),
        see_also: experiment
            .data_science_bugzilla_url
            .as_deref()
            .and_then(get_bugzilla_id)
            .into_iter()
            .collect(),
        blocks: experiment
            .feature_bugzilla_url
            .as_deref()
            .and_then(get_bugzilla_id)
            .into_iter()
            .collect(),
        url: experiment_url(config, experiment),
        whiteboard: REVIEW_WHITEBOARD_LABEL.to_string(),
    }
}

/// File a tracking bug and return its id.
///
/// The owner may not have a bug tracker account; in that case the bug is
/// filed again without an assignee.
pub async fn create_experiment_bug(
    bugs: &dyn BugTracker,
    config: &TomlConfig,
    experiment: &Experiment,
) -> Result<i64, RemoteError> {
    let mut bug = new_bug(config, experiment);

    let mut response = bugs.create_bug(&bug).await?;
    if response.code == Some(INVALID_USER_ERROR_CODE) {
        info!(experiment = %experiment.slug, owner = %experiment.owner_email, "Owner unknown to bug tracker, filing unassigned");
        bug.assigned_to = None;
        response = bugs.create_bug(&bug).await?;
    }

    response.into_id()
}

/// Post the variant summary on the experiment's bug; returns the comment id
pub async fn add_experiment_comment(bugs: &dyn BugTracker, experiment: &Experiment) -> Result<i64, TaskError> {
    let bug_id = experiment.bugzilla_id.ok_or_else(|| {
        Error::InvalidInput(format!("experiment '{}' has no bug", experiment.slug))
    })?;

    let response = bugs.add_comment(bug_id, &format_bug_body(experiment)).await?;
    Ok(response.into_id()?)
}

/// Create the experiment's bug, store its id and notify `user_email`
pub async fn create_experiment_bug_task(
    pool: &SqlitePool,
    bugs: &dyn BugTracker,
    config: &TomlConfig,
    user_email: &str,
    slug: &str,
) -> Result<i64, TaskError> {
    let experiment = experiments::get_by_slug(pool, slug)
        .await?
        .ok_or_else(|| Error::NotFound(format!("experiment '{}'", slug)))?;

    match create_experiment_bug(bugs, config, &experiment).await {
        Ok(bug_id) => {
            experiments::set_bugzilla_id(pool, experiment.id, bug_id).await?;
            let url = format!(
                "{}/show_bug.cgi?id={}",
                config.bugzilla.host.trim_end_matches('/'),
                bug_id
            );
            notifications::create_notification(
                pool,
                user_email,
                &format!("{} created bug {}", experiment, url),
            )
            .await?;
            info!(experiment = %experiment.slug, bug_id, "Created tracking bug");
            Ok(bug_id)
        }
        Err(e) => {
            warn!(experiment = %experiment.slug, error = %e, "Bug creation failed");
            notifications::create_notification(
                pool,
                user_email,
                &format!("Creating a bug for {} failed", experiment),
            )
            .await?;
            Err(e.into())
        }
    }
}

/// Comment the variant summary on the experiment's bug and notify
/// `user_email`. Returns `None` when the experiment is internal-only.
pub async fn add_experiment_comment_task(
    pool: &SqlitePool,
    bugs: &dyn BugTracker,
    user_email: &str,
    slug: &str,
) -> Result<Option<i64>, TaskError> {
    let experiment = experiments::get_by_slug(pool, slug)
        .await?
        .ok_or_else(|| Error::NotFound(format!("experiment '{}'", slug)))?;

    if experiment.risk_internal_only {
        info!(experiment = %experiment.slug, "Internal-only experiment, comment skipped");
        return Ok(None);
    }

    match add_experiment_comment(bugs, &experiment).await {
        Ok(comment_id) => {
            notifications::create_notification(
                pool,
                user_email,
                &format!("{} bug updated with variant details", experiment),
            )
            .await?;
            Ok(Some(comment_id))
        }
        Err(e) => {
            warn!(experiment = %experiment.slug, error = %e, "Bug comment failed");
            notifications::create_notification(
                pool,
                user_email,
                &format!("Updating the bug for {} failed", experiment),
            )
            .await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_bugzilla_id() {
        assert_eq!(get_bugzilla_id("https://bugzilla.mozilla.org/show_bug.cgi?id=12345"), Some(12345));
        assert_eq!(get_bugzilla_id("https://bugzilla.mozilla.org/show_bug.cgi?id=7#c2"), Some(7));
        assert_eq!(get_bugzilla_id("https://example.com/no-id"), None);
    }
}

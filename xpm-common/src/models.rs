//! Domain models
//!
//! Rows are mapped into these structs by the sync service's `db` module.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::status::ExperimentStatus;
use crate::{Error, Result};

/// Kind of experiment, which decides the remote system that delivers it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentType {
    Pref,
    Addon,
    Generic,
    Rapid,
}

/// External system polled when reconciling an experiment's status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteSystem {
    /// Remote-config recipe service
    Normandy,
    /// Record-push service
    Kinto,
}

impl ExperimentType {
    pub const ALL: [ExperimentType; 4] = [
        ExperimentType::Pref,
        ExperimentType::Addon,
        ExperimentType::Generic,
        ExperimentType::Rapid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentType::Pref => "pref",
            ExperimentType::Addon => "addon",
            ExperimentType::Generic => "generic",
            ExperimentType::Rapid => "rapid",
        }
    }

    pub fn remote_system(&self) -> RemoteSystem {
        match self {
            ExperimentType::Rapid => RemoteSystem::Kinto,
            ExperimentType::Pref | ExperimentType::Addon | ExperimentType::Generic => {
                RemoteSystem::Normandy
            }
        }
    }
}

impl fmt::Display for ExperimentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ExperimentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown experiment type: {}", s)))
    }
}

/// One A/B experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: i64,
    pub slug: String,
    pub name: String,
    #[serde(rename = "type")]
    pub experiment_type: ExperimentType,
    pub status: ExperimentStatus,
    pub owner_email: String,
    pub public_description: Option<String>,
    pub firefox_channel: Option<String>,
    pub firefox_min_version: Option<String>,
    pub firefox_max_version: Option<String>,
    pub proposed_start_date: Option<NaiveDate>,
    pub proposed_duration: Option<i64>,
    pub proposed_enrollment: Option<i64>,
    pub pref_name: Option<String>,
    pub pref_type: Option<String>,
    pub pref_branch: Option<String>,
    pub normandy_slug: Option<String>,
    pub normandy_id: Option<i64>,
    pub bugzilla_id: Option<i64>,
    pub data_science_bugzilla_url: Option<String>,
    pub feature_bugzilla_url: Option<String>,
    pub risk_internal_only: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl Experiment {
    pub fn is_rapid(&self) -> bool {
        self.experiment_type == ExperimentType::Rapid
    }

    pub fn is_pref_experiment(&self) -> bool {
        self.experiment_type == ExperimentType::Pref
    }

    pub fn is_addon_experiment(&self) -> bool {
        self.experiment_type == ExperimentType::Addon
    }

    /// Bug tracker page for this experiment, if a ticket exists
    pub fn bugzilla_url(&self, bugzilla_host: &str) -> Option<String> {
        self.bugzilla_id
            .map(|id| format!("{}/show_bug.cgi?id={}", bugzilla_host.trim_end_matches('/'), id))
    }

    /// Control variant, falling back to the first variant
    pub fn control(&self) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.is_control)
            .or_else(|| self.variants.first())
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Experiment: {}", self.experiment_type, self.name)
    }
}

/// A treatment arm of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub slug: String,
    pub description: String,
    /// Relative weight of this arm
    pub ratio: i64,
    pub is_control: bool,
    /// Preference value for pref-flip experiments
    pub value: Option<String>,
    /// Add-on package for add-on experiments
    pub addon_release_url: Option<String>,
}

/// Upper bound for proposed duration and enrollment periods
pub const MAX_PROPOSED_DAYS: i64 = 1000;

/// Input for creating a draft experiment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewExperiment {
    pub slug: String,
    pub name: String,
    #[serde(rename = "type")]
    pub experiment_type: Option<ExperimentType>,
    pub owner_email: String,
    pub public_description: Option<String>,
    pub firefox_channel: Option<String>,
    pub firefox_min_version: Option<String>,
    pub firefox_max_version: Option<String>,
    pub proposed_duration: Option<i64>,
    pub proposed_enrollment: Option<i64>,
    pub pref_name: Option<String>,
    pub pref_type: Option<String>,
    pub pref_branch: Option<String>,
    pub normandy_id: Option<i64>,
    pub bugzilla_id: Option<i64>,
    pub data_science_bugzilla_url: Option<String>,
    pub feature_bugzilla_url: Option<String>,
    #[serde(default)]
    pub risk_internal_only: bool,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl NewExperiment {
    /// Validate fields that the store cannot check on its own
    pub fn validate(&self) -> Result<()> {
        if self.slug.trim().is_empty() {
            return Err(Error::InvalidInput("slug is required".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("name is required".to_string()));
        }
        if self.owner_email.trim().is_empty() {
            return Err(Error::InvalidInput("owner_email is required".to_string()));
        }
        for (field, days) in [
            ("proposed_duration", self.proposed_duration),
            ("proposed_enrollment", self.proposed_enrollment),
        ] {
            if let Some(days) = days.filter(|d| !(0..=MAX_PROPOSED_DAYS).contains(d)) {
                return Err(Error::InvalidInput(format!(
                    "{} must be between 0 and {} days, got {}",
                    field, MAX_PROPOSED_DAYS, days
                )));
            }
        }
        if let Some(variant) = self.variants.iter().find(|v| v.ratio <= 0) {
            return Err(Error::InvalidInput(format!(
                "variant '{}' must have a positive ratio",
                variant.slug
            )));
        }
        if self.variants.iter().filter(|v| v.is_control).count() > 1 {
            return Err(Error::InvalidInput(
                "at most one variant may be the control".to_string(),
            ));
        }
        Ok(())
    }
}

/// Named pool of sequential buckets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketNamespace {
    pub id: i64,
    pub name: String,
    /// Allocation cursor: the next free bucket index
    pub total: i64,
}

/// Slice `[start, start + count)` of a namespace owned by one experiment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRange {
    pub id: i64,
    pub experiment_id: i64,
    pub namespace: String,
    pub start: i64,
    pub count: i64,
}

impl BucketRange {
    /// Exclusive upper bound of the range
    pub fn end(&self) -> i64 {
        self.start + self.count
    }

    pub fn overlaps(&self, other: &BucketRange) -> bool {
        self.namespace == other.namespace && self.start < other.end() && other.start < self.end()
    }
}

/// Append-only audit row for one status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub experiment_id: i64,
    pub changed_by: String,
    pub old_status: Option<ExperimentStatus>,
    pub new_status: ExperimentStatus,
    pub changed_on: DateTime<Utc>,
    pub message: Option<String>,
}

/// Message shown to a user about work done on their behalf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_email: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

//! Experiment lifecycle status and the fixed transition table
//!
//! Every status change, manual or automated, is checked against
//! [`ExperimentStatus::allowed_transitions`] before it is applied. The table
//! is declared here and never computed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Lifecycle status of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Review,
    Ship,
    Accepted,
    Live,
    Complete,
    Rejected,
    Archived,
}

impl ExperimentStatus {
    /// All statuses in workflow order
    pub const ALL: [ExperimentStatus; 8] = [
        ExperimentStatus::Draft,
        ExperimentStatus::Review,
        ExperimentStatus::Ship,
        ExperimentStatus::Accepted,
        ExperimentStatus::Live,
        ExperimentStatus::Complete,
        ExperimentStatus::Rejected,
        ExperimentStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Review => "review",
            ExperimentStatus::Ship => "ship",
            ExperimentStatus::Accepted => "accepted",
            ExperimentStatus::Live => "live",
            ExperimentStatus::Complete => "complete",
            ExperimentStatus::Rejected => "rejected",
            ExperimentStatus::Archived => "archived",
        }
    }

    /// Statuses reachable from `self` in one step
    pub fn allowed_transitions(&self) -> &'static [ExperimentStatus] {
        use ExperimentStatus::*;
        match self {
            Draft => &[Review, Archived],
            Review => &[Draft, Ship, Accepted, Rejected, Archived],
            Ship => &[Review, Accepted, Rejected, Archived],
            Accepted => &[Live, Rejected],
            Live => &[Complete],
            Complete | Rejected | Archived => &[],
        }
    }

    pub fn can_transition_to(&self, next: ExperimentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Validate a transition, returning [`Error::InvalidTransition`] when the
    /// pair is not in the table.
    pub fn check_transition(&self, next: ExperimentStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ExperimentStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown experiment status: {}", s)))
    }
}

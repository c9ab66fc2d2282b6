//! Shared fixtures: in-memory remote systems and experiment builders

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use xpm_common::models::{Experiment, NewExperiment, Variant};
use xpm_common::{ExperimentStatus, ExperimentType};
use xpm_sync::db::experiments::{self, ExperimentUpdate};
use xpm_sync::remote::normandy::{ApprovalRequest, Approver};
use xpm_sync::remote::{
    ApprovedRevision, BugTracker, BugzillaResponse, RecordSummary, NewBug, RecipeSource, RecordStore,
    RemoteError, Remotes,
};
use xpm_sync::services::transitions;

pub const OWNER: &str = "owner@example.com";

#[derive(Default)]
pub struct FakeRecords {
    pub pending_review: Mutex<bool>,
    pub main_ids: Mutex<Vec<String>>,
    pub created: Mutex<Vec<Value>>,
    pub review_requests: AtomicUsize,
    pub fail_main: Mutex<bool>,
    pub fail_create: Mutex<bool>,
}

impl FakeRecords {
    pub fn publish(&self, id: &str) {
        self.main_ids.lock().unwrap().push(id.to_string());
    }

    pub fn created_ids(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

fn down(service: &'static str) -> RemoteError {
    RemoteError::Call {
        service,
        message: "connection refused".to_string(),
    }
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn create_record(&self, record: &Value) -> Result<(), RemoteError> {
        if *self.fail_create.lock().unwrap() {
            return Err(down("kinto"));
        }
        self.created.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn request_review(&self) -> Result<(), RemoteError> {
        self.review_requests.fetch_add(1, Ordering::SeqCst);
        *self.pending_review.lock().unwrap() = true;
        Ok(())
    }

    async fn has_pending_review(&self) -> Result<bool, RemoteError> {
        Ok(*self.pending_review.lock().unwrap())
    }

    async fn get_workspace_records(&self) -> Result<Vec<RecordSummary>, RemoteError> {
        if *self.fail_main.lock().unwrap() {
            return Err(down("kinto"));
        }
        Ok(self
            .created_ids()
            .into_iter()
            .map(|id| RecordSummary { id })
            .collect())
    }

    async fn get_main_records(&self) -> Result<Vec<RecordSummary>, RemoteError> {
        if *self.fail_main.lock().unwrap() {
            return Err(down("kinto"));
        }
        Ok(self
            .main_ids
            .lock()
            .unwrap()
            .iter()
            .map(|id| RecordSummary { id: id.clone() })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeRecipes {
    pub recipes: Mutex<HashMap<i64, ApprovedRevision>>,
    pub failing: Mutex<HashSet<i64>>,
}

impl FakeRecipes {
    pub fn set(&self, recipe_id: i64, enabled: bool, approver: Option<&str>) {
        let revision = ApprovedRevision {
            enabled,
            approval_request: approver.map(|email| ApprovalRequest {
                approver: Some(Approver {
                    email: Some(email.to_string()),
                }),
            }),
        };
        self.recipes.lock().unwrap().insert(recipe_id, revision);
    }

    pub fn fail(&self, recipe_id: i64) {
        self.failing.lock().unwrap().insert(recipe_id);
    }
}

#[async_trait]
impl RecipeSource for FakeRecipes {
    async fn get_recipe(&self, recipe_id: i64) -> Result<ApprovedRevision, RemoteError> {
        if self.failing.lock().unwrap().contains(&recipe_id) {
            return Err(down("normandy"));
        }
        self.recipes
            .lock()
            .unwrap()
            .get(&recipe_id)
            .cloned()
            .ok_or_else(|| RemoteError::Decode {
                service: "normandy",
                message: "recipe has no approved_revision".to_string(),
            })
    }
}

#[derive(Default)]
pub struct FakeBugs {
    /// Responses handed out in order; an empty queue answers `{"id": 1}`
    pub responses: Mutex<VecDeque<BugzillaResponse>>,
    pub filed: Mutex<Vec<NewBug>>,
    pub comments: Mutex<Vec<(i64, String)>>,
}

impl FakeBugs {
    pub fn respond(&self, body: Value) {
        let response = serde_json::from_value(body).unwrap();
        self.responses.lock().unwrap().push_back(response);
    }

    fn next(&self) -> BugzillaResponse {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| serde_json::from_value(serde_json::json!({"id": 1})).unwrap())
    }
}

#[async_trait]
impl BugTracker for FakeBugs {
    async fn create_bug(&self, bug: &NewBug) -> Result<BugzillaResponse, RemoteError> {
        self.filed.lock().unwrap().push(bug.clone());
        Ok(self.next())
    }

    async fn add_comment(&self, bug_id: i64, comment: &str) -> Result<BugzillaResponse, RemoteError> {
        self.comments.lock().unwrap().push((bug_id, comment.to_string()));
        Ok(self.next())
    }
}

pub struct Fakes {
    pub records: Arc<FakeRecords>,
    pub recipes: Arc<FakeRecipes>,
    pub bugs: Arc<FakeBugs>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            records: Arc::new(FakeRecords::default()),
            recipes: Arc::new(FakeRecipes::default()),
            bugs: Arc::new(FakeBugs::default()),
        }
    }

    pub fn remotes(&self) -> Remotes {
        Remotes {
            bugs: self.bugs.clone(),
            recipes: self.recipes.clone(),
            records: self.records.clone(),
        }
    }
}

pub fn variant(slug: &str, is_control: bool) -> Variant {
    Variant {
        name: slug.to_string(),
        slug: slug.to_string(),
        description: format!("{} branch", slug),
        ratio: 1,
        is_control,
        value: Some(format!("\"{}\"", slug)),
        addon_release_url: None,
    }
}

pub fn new_experiment(slug: &str, experiment_type: ExperimentType) -> NewExperiment {
    NewExperiment {
        slug: slug.to_string(),
        name: slug.to_string(),
        experiment_type: Some(experiment_type),
        owner_email: OWNER.to_string(),
        firefox_channel: Some("Release".to_string()),
        firefox_min_version: Some("55.0".to_string()),
        proposed_duration: Some(28),
        proposed_enrollment: Some(7),
        variants: vec![variant("control", true), variant("treatment", false)],
        ..Default::default()
    }
}

/// Path from draft to each reachable status
fn path_to(status: ExperimentStatus) -> &'static [ExperimentStatus] {
    use ExperimentStatus::*;
    match status {
        Draft => &[],
        Review => &[Review],
        Ship => &[Review, Ship],
        Accepted => &[Review, Accepted],
        Live => &[Review, Accepted, Live],
        Complete => &[Review, Accepted, Live, Complete],
        Rejected => &[Review, Rejected],
        Archived => &[Archived],
    }
}

/// Create an experiment and walk it to `status`, one logged transition per
/// step
pub async fn create_with_status(
    pool: &SqlitePool,
    input: NewExperiment,
    status: ExperimentStatus,
) -> Experiment {
    let mut experiment = experiments::create_experiment(pool, &input, OWNER).await.unwrap();
    for &next in path_to(status) {
        transitions::transition(pool, &experiment, next, OWNER, &ExperimentUpdate::default(), None)
            .await
            .unwrap();
        experiment = reload(pool, experiment.id).await;
    }
    experiment
}

pub async fn set_normandy_slug(pool: &SqlitePool, experiment_id: i64, normandy_slug: &str) {
    sqlx::query("UPDATE experiments SET normandy_slug = ? WHERE id = ?")
        .bind(normandy_slug)
        .bind(experiment_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn reload(pool: &SqlitePool, experiment_id: i64) -> Experiment {
    let mut conn = pool.acquire().await.unwrap();
    experiments::get_by_id(&mut conn, experiment_id).await.unwrap()
}

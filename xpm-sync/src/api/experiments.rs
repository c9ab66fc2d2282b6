//! Experiment endpoints
//!
//! - `GET  /api/v1/experiments?status=&type=`
//! - `POST /api/v1/experiments`
//! - `GET  /api/v1/experiments/:slug`
//! - `POST /api/v1/experiments/:slug/status`
//! - `GET  /api/v1/experiments/:slug/changelog`
//! - `GET  /api/v1/experiments/:slug/recipe`
//! - `POST /api/v1/experiments/:slug/bug`
//! - `POST /api/v1/experiments/:slug/bug/comment`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use xpm_common::models::{ChangeLogEntry, Experiment, NewExperiment};
use xpm_common::{ExperimentStatus, ExperimentType};

use crate::db::{buckets, changelog, experiments};
use crate::db::experiments::ExperimentUpdate;
use crate::services::recipe::{self, RapidRecipe};
use crate::services::{bugs, transitions};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub experiment_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: ExperimentStatus,
    pub changed_by: String,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub user: String,
}

#[derive(Debug, Serialize)]
pub struct BugResponse {
    pub bugzilla_id: i64,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    /// `None` when the experiment is internal-only and no comment was posted
    pub comment_id: Option<i64>,
}

async fn load(state: &AppState, slug: &str) -> ApiResult<Experiment> {
    experiments::get_by_slug(&state.db, slug)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("experiment '{}'", slug)))
}

/// GET /api/v1/experiments
pub async fn list_experiments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Experiment>>> {
    let statuses = match query.status.as_deref() {
        Some(s) => vec![s.parse::<ExperimentStatus>()?],
        None => Vec::new(),
    };
    let types = match query.experiment_type.as_deref() {
        Some(t) => vec![t.parse::<ExperimentType>()?],
        None => Vec::new(),
    };

    let list = experiments::list_by_type_and_status(&state.db, &types, &statuses).await?;
    Ok(Json(list))
}

/// POST /api/v1/experiments
///
/// Creates a draft experiment owned and logged by `owner_email`.
pub async fn create_experiment(
    State(state): State<AppState>,
    Json(input): Json<NewExperiment>,
) -> ApiResult<(StatusCode, Json<Experiment>)> {
    let experiment = experiments::create_experiment(&state.db, &input, &input.owner_email).await?;
    info!(experiment = %experiment.slug, "Experiment created");
    Ok((StatusCode::CREATED, Json(experiment)))
}

/// GET /api/v1/experiments/:slug
pub async fn get_experiment(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Experiment>> {
    Ok(Json(load(&state, &slug).await?))
}

/// POST /api/v1/experiments/:slug/status
///
/// **Errors:**
/// - 404: unknown experiment
/// - 409: the transition table does not allow the move
pub async fn change_status(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(request): Json<StatusChangeRequest>,
) -> ApiResult<Json<ChangeLogEntry>> {
    let experiment = load(&state, &slug).await?;
    let entry = transitions::transition(
        &state.db,
        &experiment,
        request.status,
        &request.changed_by,
        &ExperimentUpdate::default(),
        request.message.as_deref(),
    )
    .await?;
    Ok(Json(entry))
}

/// GET /api/v1/experiments/:slug/changelog
pub async fn get_changelog(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Vec<ChangeLogEntry>>> {
    let experiment = load(&state, &slug).await?;
    Ok(Json(changelog::list_for_experiment(&state.db, experiment.id).await?))
}

/// GET /api/v1/experiments/:slug/recipe
///
/// The record as it was (or would be) pushed. Only available once the
/// experiment holds a bucket range.
pub async fn get_recipe(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<RapidRecipe>> {
    let experiment = load(&state, &slug).await?;
    if !experiment.is_rapid() {
        return Err(ApiError::BadRequest(format!("experiment '{}' is not rapid", slug)));
    }
    let namespace = experiment
        .normandy_slug
        .as_deref()
        .ok_or_else(|| ApiError::NotFound(format!("experiment '{}' has not been pushed", slug)))?;
    let range = buckets::range_for_experiment(&state.db, experiment.id, namespace)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("experiment '{}' holds no buckets", slug)))?;

    Ok(Json(recipe::rapid_recipe(&experiment, &range, &state.config.bucket_preset)?))
}

/// POST /api/v1/experiments/:slug/bug
pub async fn create_bug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(request): Json<UserRequest>,
) -> ApiResult<Json<BugResponse>> {
    let bugzilla_id = bugs::create_experiment_bug_task(
        &state.db,
        state.remotes.bugs.as_ref(),
        &state.config,
        &request.user,
        &slug,
    )
    .await?;
    Ok(Json(BugResponse { bugzilla_id }))
}

/// POST /api/v1/experiments/:slug/bug/comment
pub async fn add_bug_comment(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(request): Json<UserRequest>,
) -> ApiResult<Json<CommentResponse>> {
    let comment_id =
        bugs::add_experiment_comment_task(&state.db, state.remotes.bugs.as_ref(), &request.user, &slug)
            .await?;
    Ok(Json(CommentResponse { comment_id }))
}

pub fn experiment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/experiments", get(list_experiments).post(create_experiment))
        .route("/api/v1/experiments/:slug", get(get_experiment))
        .route("/api/v1/experiments/:slug/status", post(change_status))
        .route("/api/v1/experiments/:slug/changelog", get(get_changelog))
        .route("/api/v1/experiments/:slug/recipe", get(get_recipe))
        .route("/api/v1/experiments/:slug/bug", post(create_bug))
        .route("/api/v1/experiments/:slug/bug/comment", post(add_bug_comment))
}

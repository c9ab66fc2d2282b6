//! On-demand task runs
//!
//! `POST /api/v1/tasks/:task` runs one named pass immediately and returns
//! its report.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};

use crate::services::tasks::{SyncTask, TaskReport};
use crate::{ApiResult, AppState};

pub async fn run_named_task(
    State(state): State<AppState>,
    Path(task): Path<String>,
) -> ApiResult<Json<TaskReport>> {
    let task: SyncTask = task.parse()?;

    match state.run_task(task).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            state.record_error(format!("{}: {}", task, e)).await;
            Err(e.into())
        }
    }
}

pub fn task_routes() -> Router<AppState> {
    Router::new().route("/api/v1/tasks/:task", post(run_named_task))
}

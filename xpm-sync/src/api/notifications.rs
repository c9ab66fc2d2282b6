//! User notifications
//!
//! `GET /api/v1/users/:email/notifications` lists what background work
//! reported back to a user, oldest first.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use xpm_common::models::Notification;

use crate::db::notifications;
use crate::{ApiResult, AppState};

pub async fn list_notifications(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(notifications::list_for_user(&state.db, &email).await?))
}

pub fn notification_routes() -> Router<AppState> {
    Router::new().route("/api/v1/users/:email/notifications", get(list_notifications))
}

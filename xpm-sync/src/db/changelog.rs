//! Change log persistence
//!
//! The table is append-only (enforced by triggers); this module only ever
//! inserts and reads.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use xpm_common::models::ChangeLogEntry;
use xpm_common::{ExperimentStatus, Result};

use crate::db::users;

fn entry_from_row(row: &SqliteRow) -> Result<ChangeLogEntry> {
    let old_status: Option<String> = row.try_get("old_status")?;
    let new_status: String = row.try_get("new_status")?;

    Ok(ChangeLogEntry {
        id: row.try_get("id")?,
        experiment_id: row.try_get("experiment_id")?,
        changed_by: row.try_get("changed_by")?,
        old_status: old_status.map(|s| s.parse()).transpose()?,
        new_status: new_status.parse()?,
        changed_on: row.try_get("changed_on")?,
        message: row.try_get("message")?,
    })
}

/// Record one status change attributed to `changed_by` (an email)
pub async fn append(
    conn: &mut SqliteConnection,
    experiment_id: i64,
    changed_by: &str,
    old_status: Option<ExperimentStatus>,
    new_status: ExperimentStatus,
    message: Option<&str>,
) -> Result<ChangeLogEntry> {
    let user_id = users::get_or_create_user(&mut *conn, changed_by).await?;
    let changed_on = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO changelog (experiment_id, changed_by, old_status, new_status, changed_on, message)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(experiment_id)
    .bind(user_id)
    .bind(old_status.map(|s| s.as_str()))
    .bind(new_status.as_str())
    .bind(changed_on)
    .bind(message)
    .execute(&mut *conn)
    .await?;

    Ok(ChangeLogEntry {
        id: result.last_insert_rowid(),
        experiment_id,
        changed_by: changed_by.trim().to_string(),
        old_status,
        new_status,
        changed_on,
        message: message.map(str::to_string),
    })
}

/// Full history of one experiment, oldest first
pub async fn list_for_experiment(pool: &SqlitePool, experiment_id: i64) -> Result<Vec<ChangeLogEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.experiment_id, u.email AS changed_by, c.old_status, c.new_status,
               c.changed_on, c.message
        FROM changelog c
        JOIN users u ON u.id = c.changed_by
        WHERE c.experiment_id = ?
        ORDER BY c.id
        "#,
    )
    .bind(experiment_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

pub async fn count_for_experiment(pool: &SqlitePool, experiment_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM changelog WHERE experiment_id = ?")
        .bind(experiment_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

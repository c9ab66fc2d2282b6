//! User notifications

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use xpm_common::models::Notification;
use xpm_common::Result;

use crate::db::users;

pub async fn create_notification(pool: &SqlitePool, user_email: &str, message: &str) -> Result<Notification> {
    let mut conn = pool.acquire().await?;
    let user_id = users::get_or_create_user(&mut conn, user_email).await?;
    let created_at = Utc::now();

    let result = sqlx::query("INSERT INTO notifications (user_id, message, created_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(message)
        .bind(created_at)
        .execute(&mut *conn)
        .await?;

    Ok(Notification {
        id: result.last_insert_rowid(),
        user_email: user_email.trim().to_string(),
        message: message.to_string(),
        created_at,
    })
}

pub async fn list_for_user(pool: &SqlitePool, user_email: &str) -> Result<Vec<Notification>> {
    let rows = sqlx::query(
        r#"
        SELECT n.id, u.email, n.message, n.created_at
        FROM notifications n
        JOIN users u ON u.id = n.user_id
        WHERE u.email = ?
        ORDER BY n.id
        "#,
    )
    .bind(user_email.trim())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<Notification> {
            Ok(Notification {
                id: row.try_get("id")?,
                user_email: row.try_get("email")?,
                message: row.try_get("message")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

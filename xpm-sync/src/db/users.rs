//! User lookup
//!
//! Users are identified by email and created on first reference, so change
//! log rows can name automation identities and remote approvers.

use sqlx::SqliteConnection;
use xpm_common::{Error, Result};

/// Return the id of the user with `email`, creating the user if needed
pub async fn get_or_create_user(conn: &mut SqliteConnection, email: &str) -> Result<i64> {
    let email = email.trim();
    if email.is_empty() {
        return Err(Error::InvalidInput("user email is required".to_string()));
    }

    sqlx::query("INSERT INTO users (email) VALUES (?) ON CONFLICT(email) DO NOTHING")
        .bind(email)
        .execute(&mut *conn)
        .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(&mut *conn)
        .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpm_common::db::init_memory_database;

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let first = get_or_create_user(&mut conn, "dev@example.com").await.unwrap();
        let second = get_or_create_user(&mut conn, " dev@example.com ").await.unwrap();
        assert_eq!(first, second);

        let other = get_or_create_user(&mut conn, "qa@example.com").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_empty_email_rejected() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert!(matches!(
            get_or_create_user(&mut conn, "  ").await,
            Err(Error::InvalidInput(_))
        ));
    }
}

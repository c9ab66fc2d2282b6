//! Database initialization
//!
//! Opens (or creates) the SQLite database and applies the schema. Every
//! statement is idempotent, so initialization runs on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every connection; concurrent writers wait this
/// long for the write lock instead of failing immediately.
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        // WAL allows concurrent readers alongside the single writer
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database, used by tests and dry runs
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    // The database lives only as long as its one connection
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables, indexes and triggers
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_users_table(pool).await?;
    create_experiments_table(pool).await?;
    create_variants_table(pool).await?;
    create_bucket_namespaces_table(pool).await?;
    create_bucket_ranges_table(pool).await?;
    create_changelog_table(pool).await?;
    create_notifications_table(pool).await?;
    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_experiments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS experiments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('pref', 'addon', 'generic', 'rapid')),
            status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN
                ('draft', 'review', 'ship', 'accepted', 'live', 'complete', 'rejected', 'archived')),
            owner_email TEXT NOT NULL,
            public_description TEXT,
            firefox_channel TEXT,
            firefox_min_version TEXT,
            firefox_max_version TEXT,
            proposed_start_date DATE,
            proposed_duration INTEGER,
            proposed_enrollment INTEGER,
            pref_name TEXT,
            pref_type TEXT,
            pref_branch TEXT,
            normandy_slug TEXT,
            normandy_id INTEGER,
            bugzilla_id INTEGER,
            data_science_bugzilla_url TEXT,
            feature_bugzilla_url TEXT,
            risk_internal_only INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_experiments_type_status ON experiments (type, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_variants_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS variants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            ratio INTEGER NOT NULL CHECK (ratio > 0),
            is_control INTEGER NOT NULL DEFAULT 0,
            value TEXT,
            addon_release_url TEXT,
            UNIQUE (experiment_id, slug)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_bucket_namespaces_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bucket_namespaces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            total INTEGER NOT NULL DEFAULT 0 CHECK (total >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_bucket_ranges_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bucket_ranges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            experiment_id INTEGER NOT NULL REFERENCES experiments(id),
            namespace_id INTEGER NOT NULL REFERENCES bucket_namespaces(id),
            start INTEGER NOT NULL CHECK (start >= 0),
            count INTEGER NOT NULL CHECK (count > 0),
            UNIQUE (namespace_id, start)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ranges are immutable once issued
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS bucket_ranges_immutable
        BEFORE UPDATE ON bucket_ranges
        BEGIN
            SELECT RAISE(ABORT, 'bucket ranges are immutable');
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_changelog_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS changelog (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            experiment_id INTEGER NOT NULL REFERENCES experiments(id),
            changed_by INTEGER NOT NULL REFERENCES users(id),
            old_status TEXT,
            new_status TEXT NOT NULL,
            changed_on TIMESTAMP NOT NULL,
            message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_changelog_experiment ON changelog (experiment_id, id)",
    )
    .execute(pool)
    .await?;

    // Append-only audit trail
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS changelog_no_update
        BEFORE UPDATE ON changelog
        BEGIN
            SELECT RAISE(ABORT, 'changelog is append-only');
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS changelog_no_delete
        BEFORE DELETE ON changelog
        BEGIN
            SELECT RAISE(ABORT, 'changelog is append-only');
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_notifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            message TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

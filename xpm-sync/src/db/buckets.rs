//! Bucket namespace and range persistence
//!
//! The namespace row's `total` column is the allocation cursor. Advancing it
//! and inserting the range happen in one transaction whose first statement
//! is a write, so SQLite hands the write lock to one allocator at a time and
//! the others wait out the busy timeout.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use xpm_common::models::{BucketNamespace, BucketRange};
use xpm_common::Result;

fn range_from_row(row: &SqliteRow) -> Result<BucketRange> {
    Ok(BucketRange {
        id: row.try_get("id")?,
        experiment_id: row.try_get("experiment_id")?,
        namespace: row.try_get("namespace")?,
        start: row.try_get("start")?,
        count: row.try_get("count")?,
    })
}

/// Reserve `[cursor, cursor + count)` in `namespace` for `experiment_id`
/// and advance the cursor. Creates the namespace on first use.
pub async fn allocate_range(
    pool: &SqlitePool,
    namespace: &str,
    experiment_id: i64,
    count: i64,
) -> Result<BucketRange> {
    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO bucket_namespaces (name, total) VALUES (?, 0) ON CONFLICT(name) DO NOTHING")
        .bind(namespace)
        .execute(&mut *tx)
        .await?;

    let (namespace_id, total): (i64, i64) = sqlx::query_as(
        "UPDATE bucket_namespaces SET total = total + ? WHERE name = ? RETURNING id, total",
    )
    .bind(count)
    .bind(namespace)
    .fetch_one(&mut *tx)
    .await?;

    let start = total - count;

    let result = sqlx::query(
        "INSERT INTO bucket_ranges (experiment_id, namespace_id, start, count) VALUES (?, ?, ?, ?)",
    )
    .bind(experiment_id)
    .bind(namespace_id)
    .bind(start)
    .bind(count)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(BucketRange {
        id: result.last_insert_rowid(),
        experiment_id,
        namespace: namespace.to_string(),
        start,
        count,
    })
}

pub async fn get_namespace(pool: &SqlitePool, name: &str) -> Result<Option<BucketNamespace>> {
    let row: Option<(i64, String, i64)> =
        sqlx::query_as("SELECT id, name, total FROM bucket_namespaces WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(id, name, total)| BucketNamespace { id, name, total }))
}

/// All ranges issued from `namespace`, in allocation order
pub async fn ranges_for_namespace(pool: &SqlitePool, namespace: &str) -> Result<Vec<BucketRange>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id, r.experiment_id, n.name AS namespace, r.start, r.count
        FROM bucket_ranges r
        JOIN bucket_namespaces n ON n.id = r.namespace_id
        WHERE n.name = ?
        ORDER BY r.start
        "#,
    )
    .bind(namespace)
    .fetch_all(pool)
    .await?;

    rows.iter().map(range_from_row).collect()
}

/// First range an experiment holds in `namespace`, if any
pub async fn range_for_experiment(
    pool: &SqlitePool,
    experiment_id: i64,
    namespace: &str,
) -> Result<Option<BucketRange>> {
    let row = sqlx::query(
        r#"
        SELECT r.id, r.experiment_id, n.name AS namespace, r.start, r.count
        FROM bucket_ranges r
        JOIN bucket_namespaces n ON n.id = r.namespace_id
        WHERE r.experiment_id = ? AND n.name = ?
        ORDER BY r.id
        LIMIT 1
        "#,
    )
    .bind(experiment_id)
    .bind(namespace)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(range_from_row).transpose()
}

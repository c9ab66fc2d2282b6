//! Bucket namespace allocator
//!
//! Hands out disjoint, consecutive bucket ranges from a named namespace.
//! Ranges are never released or reused.

use sqlx::SqlitePool;
use tracing::{error, info};
use xpm_common::models::BucketRange;
use xpm_common::{Error, Result};

use crate::db::buckets;

/// Reserve `count` buckets in `namespace` for `experiment_id`.
///
/// The namespace is created on first use. Returns `[cursor, cursor + count)`
/// where `cursor` is the namespace total before this call.
pub async fn request_namespace_buckets(
    pool: &SqlitePool,
    namespace: &str,
    experiment_id: i64,
    count: i64,
) -> Result<BucketRange> {
    if count <= 0 {
        return Err(Error::InvalidInput(format!(
            "bucket count must be positive, got {}",
            count
        )));
    }
    if namespace.trim().is_empty() {
        return Err(Error::InvalidInput("namespace name is required".to_string()));
    }

    match buckets::allocate_range(pool, namespace, experiment_id, count).await {
        Ok(range) => {
            info!(
                namespace,
                experiment_id,
                start = range.start,
                count = range.count,
                "Allocated bucket range"
            );
            Ok(range)
        }
        Err(Error::Database(e)) => {
            error!(namespace, experiment_id, error = %e, "Bucket allocation failed");
            Err(Error::Allocation(e.to_string()))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xpm_common::db::init_memory_database;
    use xpm_common::models::NewExperiment;

    async fn setup() -> (SqlitePool, i64) {
        let pool = init_memory_database().await.unwrap();
        let experiment = crate::db::experiments::create_experiment(
            &pool,
            &NewExperiment {
                slug: "alloc".to_string(),
                name: "Alloc".to_string(),
                owner_email: "owner@example.com".to_string(),
                ..Default::default()
            },
            "owner@example.com",
        )
        .await
        .unwrap();
        (pool, experiment.id)
    }

    #[tokio::test]
    async fn test_first_allocation_starts_at_zero() {
        let (pool, id) = setup().await;

        let first = request_namespace_buckets(&pool, "ns", id, 100).await.unwrap();
        assert_eq!((first.start, first.count), (0, 100));

        let second = request_namespace_buckets(&pool, "ns", id, 50).await.unwrap();
        assert_eq!((second.start, second.count), (100, 50));

        let namespace = buckets::get_namespace(&pool, "ns").await.unwrap().unwrap();
        assert_eq!(namespace.total, 150);
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let (pool, id) = setup().await;

        request_namespace_buckets(&pool, "a", id, 10).await.unwrap();
        let b = request_namespace_buckets(&pool, "b", id, 10).await.unwrap();
        assert_eq!(b.start, 0);
    }

    #[tokio::test]
    async fn test_non_positive_count_rejected() {
        let (pool, id) = setup().await;

        assert!(matches!(
            request_namespace_buckets(&pool, "ns", id, 0).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            request_namespace_buckets(&pool, "ns", id, -5).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(buckets::get_namespace(&pool, "ns").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_experiment_is_allocation_error() {
        let (pool, _) = setup().await;

        let result = request_namespace_buckets(&pool, "ns", 9999, 10).await;
        assert!(matches!(result, Err(Error::Allocation(_))));

        // Rolled back: the cursor did not move
        let namespace = buckets::get_namespace(&pool, "ns").await.unwrap();
        assert!(namespace.is_none());
    }
}

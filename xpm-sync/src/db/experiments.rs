//! Experiment queries

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use xpm_common::models::{Experiment, NewExperiment, Variant};
use xpm_common::{Error, ExperimentStatus, ExperimentType, Result};

use crate::db::{changelog, users};

const EXPERIMENT_COLUMNS: &str = r#"
    id, slug, name, type, status, owner_email, public_description,
    firefox_channel, firefox_min_version, firefox_max_version,
    proposed_start_date, proposed_duration, proposed_enrollment,
    pref_name, pref_type, pref_branch,
    normandy_slug, normandy_id, bugzilla_id,
    data_science_bugzilla_url, feature_bugzilla_url,
    risk_internal_only, created_at
"#;

/// Fields that may change together with a status transition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentUpdate {
    pub normandy_slug: Option<String>,
    pub proposed_start_date: Option<NaiveDate>,
}

fn experiment_from_row(row: &SqliteRow) -> Result<Experiment> {
    let type_str: String = row.try_get("type")?;
    let status_str: String = row.try_get("status")?;

    Ok(Experiment {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        experiment_type: type_str.parse()?,
        status: status_str.parse()?,
        owner_email: row.try_get("owner_email")?,
        public_description: row.try_get("public_description")?,
        firefox_channel: row.try_get("firefox_channel")?,
        firefox_min_version: row.try_get("firefox_min_version")?,
        firefox_max_version: row.try_get("firefox_max_version")?,
        proposed_start_date: row.try_get("proposed_start_date")?,
        proposed_duration: row.try_get("proposed_duration")?,
        proposed_enrollment: row.try_get("proposed_enrollment")?,
        pref_name: row.try_get("pref_name")?,
        pref_type: row.try_get("pref_type")?,
        pref_branch: row.try_get("pref_branch")?,
        normandy_slug: row.try_get("normandy_slug")?,
        normandy_id: row.try_get("normandy_id")?,
        bugzilla_id: row.try_get("bugzilla_id")?,
        data_science_bugzilla_url: row.try_get("data_science_bugzilla_url")?,
        feature_bugzilla_url: row.try_get("feature_bugzilla_url")?,
        risk_internal_only: row.try_get("risk_internal_only")?,
        created_at: row.try_get("created_at")?,
        variants: Vec::new(),
    })
}

async fn load_variants(conn: &mut SqliteConnection, experiment_id: i64) -> Result<Vec<Variant>> {
    let rows = sqlx::query(
        r#"
        SELECT name, slug, description, ratio, is_control, value, addon_release_url
        FROM variants
        WHERE experiment_id = ?
        ORDER BY is_control DESC, id
        "#,
    )
    .bind(experiment_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<Variant> {
            Ok(Variant {
                name: row.try_get("name")?,
                slug: row.try_get("slug")?,
                description: row.try_get("description")?,
                ratio: row.try_get("ratio")?,
                is_control: row.try_get("is_control")?,
                value: row.try_get("value")?,
                addon_release_url: row.try_get("addon_release_url")?,
            })
        })
        .collect()
}

async fn with_variants(conn: &mut SqliteConnection, row: &SqliteRow) -> Result<Experiment> {
    let mut experiment = experiment_from_row(row)?;
    experiment.variants = load_variants(conn, experiment.id).await?;
    Ok(experiment)
}

/// Create a draft experiment with its variants and the initial change log row
pub async fn create_experiment(
    pool: &SqlitePool,
    input: &NewExperiment,
    created_by: &str,
) -> Result<Experiment> {
    input.validate()?;

    let mut tx = pool.begin().await?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM experiments WHERE slug = ?)")
        .bind(&input.slug)
        .fetch_one(&mut *tx)
        .await?;
    if exists {
        return Err(Error::InvalidInput(format!(
            "experiment '{}' already exists",
            input.slug
        )));
    }

    let experiment_type = input.experiment_type.unwrap_or(ExperimentType::Pref);

    let result = sqlx::query(
        r#"
        INSERT INTO experiments (
            slug, name, type, status, owner_email, public_description,
            firefox_channel, firefox_min_version, firefox_max_version,
            proposed_duration, proposed_enrollment,
            pref_name, pref_type, pref_branch,
            normandy_id, bugzilla_id,
            data_science_bugzilla_url, feature_bugzilla_url,
            risk_internal_only, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.slug)
    .bind(&input.name)
    .bind(experiment_type.as_str())
    .bind(ExperimentStatus::Draft.as_str())
    .bind(&input.owner_email)
    .bind(&input.public_description)
    .bind(&input.firefox_channel)
    .bind(&input.firefox_min_version)
    .bind(&input.firefox_max_version)
    .bind(input.proposed_duration)
    .bind(input.proposed_enrollment)
    .bind(&input.pref_name)
    .bind(&input.pref_type)
    .bind(&input.pref_branch)
    .bind(input.normandy_id)
    .bind(input.bugzilla_id)
    .bind(&input.data_science_bugzilla_url)
    .bind(&input.feature_bugzilla_url)
    .bind(input.risk_internal_only)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    let experiment_id = result.last_insert_rowid();

    for variant in &input.variants {
        sqlx::query(
            r#"
            INSERT INTO variants (
                experiment_id, name, slug, description, ratio, is_control, value, addon_release_url
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(experiment_id)
        .bind(&variant.name)
        .bind(&variant.slug)
        .bind(&variant.description)
        .bind(variant.ratio)
        .bind(variant.is_control)
        .bind(&variant.value)
        .bind(&variant.addon_release_url)
        .execute(&mut *tx)
        .await?;
    }

    users::get_or_create_user(&mut *tx, &input.owner_email).await?;
    changelog::append(
        &mut *tx,
        experiment_id,
        created_by,
        None,
        ExperimentStatus::Draft,
        Some("Experiment created"),
    )
    .await?;

    let experiment = get_by_id(&mut *tx, experiment_id).await?;
    tx.commit().await?;

    Ok(experiment)
}

/// Load one experiment by id, failing with `NotFound` when it is absent
pub async fn get_by_id(conn: &mut SqliteConnection, experiment_id: i64) -> Result<Experiment> {
    let sql = format!("SELECT {} FROM experiments WHERE id = ?", EXPERIMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(experiment_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("experiment id {}", experiment_id)))?;

    with_variants(conn, &row).await
}

pub async fn get_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Experiment>> {
    let mut conn = pool.acquire().await?;
    let sql = format!("SELECT {} FROM experiments WHERE slug = ?", EXPERIMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(with_variants(&mut conn, &row).await?)),
        None => Ok(None),
    }
}

/// Experiments matching any of `types` and any of `statuses`, oldest first.
/// An empty slice means "no filter" for that column.
pub async fn list_by_type_and_status(
    pool: &SqlitePool,
    types: &[ExperimentType],
    statuses: &[ExperimentStatus],
) -> Result<Vec<Experiment>> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM experiments WHERE 1 = 1", EXPERIMENT_COLUMNS));

    if !types.is_empty() {
        builder.push(" AND type IN (");
        let mut separated = builder.separated(", ");
        for t in types {
            separated.push_bind(t.as_str());
        }
        separated.push_unseparated(")");
    }

    if !statuses.is_empty() {
        builder.push(" AND status IN (");
        let mut separated = builder.separated(", ");
        for s in statuses {
            separated.push_bind(s.as_str());
        }
        separated.push_unseparated(")");
    }

    builder.push(" ORDER BY id");

    let mut conn = pool.acquire().await?;
    let rows = builder.build().fetch_all(&mut *conn).await?;

    let mut experiments = Vec::with_capacity(rows.len());
    for row in &rows {
        experiments.push(with_variants(&mut conn, row).await?);
    }
    Ok(experiments)
}

/// Apply a status change guarded by the expected current status.
///
/// Returns `false` when the row's status no longer equals `from`, which
/// means another unit of work already moved it.
pub async fn update_status(
    conn: &mut SqliteConnection,
    experiment_id: i64,
    from: ExperimentStatus,
    to: ExperimentStatus,
    update: &ExperimentUpdate,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE experiments
        SET status = ?,
            normandy_slug = COALESCE(?, normandy_slug),
            proposed_start_date = COALESCE(?, proposed_start_date)
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(to.as_str())
    .bind(&update.normandy_slug)
    .bind(update.proposed_start_date)
    .bind(experiment_id)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Current status of an experiment, if it exists
pub async fn current_status(
    conn: &mut SqliteConnection,
    experiment_id: i64,
) -> Result<Option<ExperimentStatus>> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM experiments WHERE id = ?")
        .bind(experiment_id)
        .fetch_optional(&mut *conn)
        .await?;

    status.map(|s| s.parse()).transpose()
}

pub async fn set_bugzilla_id(pool: &SqlitePool, experiment_id: i64, bugzilla_id: i64) -> Result<()> {
    let result = sqlx::query("UPDATE experiments SET bugzilla_id = ? WHERE id = ?")
        .bind(bugzilla_id)
        .bind(experiment_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("experiment id {}", experiment_id)));
    }
    Ok(())
}

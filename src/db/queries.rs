use std::str::FromStr;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::image::{ImageJob, JobStatus, NewImageJob};
use crate::models::log::ActivityLog;

fn map_job(row: &PgRow) -> Result<ImageJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: Box::new(e),
    })?;

    Ok(ImageJob {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        display_name: row.try_get("display_name")?,
        original_key: row.try_get("original_key")?,
        processed_key: row.try_get("processed_key")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new job record with status `processing`.
pub async fn create_job(pool: &PgPool, new: &NewImageJob) -> Result<ImageJob, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO image_jobs (id, owner_id, display_name, original_key, processed_key, status)
        VALUES ($1, $2, $3, $4, $5, 'processing')
        RETURNING id, owner_id, display_name, original_key, processed_key, status,
                  created_at, updated_at
        "#,
    )
    .bind(new.id)
    .bind(&new.owner_id)
    .bind(&new.display_name)
    .bind(&new.original_key)
    .bind(&new.processed_key)
    .fetch_one(pool)
    .await?;

    map_job(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, image_id: Uuid) -> Result<Option<ImageJob>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, owner_id, display_name, original_key, processed_key, status,
               created_at, updated_at
        FROM image_jobs
        WHERE id = $1
        "#,
    )
    .bind(image_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_job).transpose()
}

/// Get a job by ID, scoped to its owner.
pub async fn get_job_for_owner(
    pool: &PgPool,
    image_id: Uuid,
    owner_id: &str,
) -> Result<Option<ImageJob>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, owner_id, display_name, original_key, processed_key, status,
               created_at, updated_at
        FROM image_jobs
        WHERE id = $1 AND owner_id = $2
        "#,
    )
    .bind(image_id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_job).transpose()
}

/// List a user's jobs, newest first.
pub async fn list_jobs(pool: &PgPool, owner_id: &str) -> Result<Vec<ImageJob>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, owner_id, display_name, original_key, processed_key, status,
               created_at, updated_at
        FROM image_jobs
        WHERE owner_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_job).collect()
}

/// Update a job's status, bumping `updated_at`.
///
/// `completed` rows are never overwritten, which makes duplicate
/// completion writes from redelivered messages no-ops, and nothing ever
/// moves a record back to `processing` after creation.
pub async fn update_job_status(
    pool: &PgPool,
    image_id: Uuid,
    status: JobStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE image_jobs
        SET status = $1, updated_at = NOW()
        WHERE id = $2 AND status <> 'completed'
        "#,
    )
    .bind(status.to_string())
    .bind(image_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Append an activity log entry. Entries are immutable once written.
pub async fn insert_log(
    pool: &PgPool,
    owner_id: &str,
    description: &str,
    image_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO activity_logs (owner_id, image_id, description)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(owner_id)
    .bind(image_id)
    .bind(description)
    .execute(pool)
    .await?;

    Ok(())
}

/// List a user's activity log, newest first.
pub async fn list_logs(pool: &PgPool, owner_id: &str) -> Result<Vec<ActivityLog>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, owner_id, image_id, description, created_at
        FROM activity_logs
        WHERE owner_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(ActivityLog {
                id: r.try_get("id")?,
                owner_id: r.try_get("owner_id")?,
                image_id: r.try_get("image_id")?,
                description: r.try_get("description")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .collect()
}

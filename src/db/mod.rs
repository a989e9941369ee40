use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::image::{ImageJob, JobStatus, NewImageJob};
use crate::pipeline::{BoxError, JobStore};

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

impl JobStore for PgPool {
    async fn insert_job(&self, new: &NewImageJob) -> Result<ImageJob, BoxError> {
        Ok(queries::create_job(self, new).await?)
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<(), BoxError> {
        Ok(queries::update_job_status(self, id, status).await?)
    }

    async fn append_log(
        &self,
        owner_id: &str,
        description: &str,
        image_id: Option<Uuid>,
    ) -> Result<(), BoxError> {
        Ok(queries::insert_log(self, owner_id, description, image_id).await?)
    }
}

pub mod queries;

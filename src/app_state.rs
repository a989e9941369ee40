use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{queue::JobQueue, storage::StorageClient};

/// Shared application state passed to all route handlers. Built once at
/// process start; handlers never construct their own clients.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: PgPool,
    pub storage: Arc<StorageClient>,
    pub queue: Arc<JobQueue>,
}

impl AppState {
    pub fn new(config: AppConfig, db: PgPool, storage: StorageClient, queue: JobQueue) -> Self {
        Self {
            config: Arc::new(config),
            db,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
        }
    }
}

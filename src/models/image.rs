use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of an image job, shared between the submitting
/// process and the worker.
///
/// `processing` is set exactly once, at creation. `completed` is terminal.
/// `failed` is provisional: a redelivered message that later succeeds
/// overwrites it with `completed`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

/// One submitted image and its processing lifecycle.
///
/// `original_key` and `processed_key` are assigned at submission and never
/// rewritten; the worker writes the processed object under the key the
/// record already carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJob {
    pub id: Uuid,
    pub owner_id: String,
    pub display_name: String,
    pub original_key: String,
    pub processed_key: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a new job record. Status always starts at
/// `processing`; timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewImageJob {
    pub id: Uuid,
    pub owner_id: String,
    pub display_name: String,
    pub original_key: String,
    pub processed_key: String,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only activity log entry. Never updated or deleted once written;
/// exists purely for audit and activity display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub id: i64,
    pub owner_id: String,
    pub image_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

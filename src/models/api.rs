use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::image::JobStatus;

/// Metadata fields accompanying a multipart image upload.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    #[garde(inner(length(min = 1, max = 200)))]
    pub image_name: Option<String>,
}

/// Response after submitting an image for processing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub image_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Response for polling a job's status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatusResponse {
    pub image_id: Uuid,
    pub image_name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row in the image listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageListItem {
    pub image_id: Uuid,
    pub image_name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// Request for a presigned PUT URL (direct client upload).
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadRequest {
    #[garde(length(min = 1, max = 200))]
    pub image_name: String,

    #[garde(length(min = 1, max = 100))]
    pub mime_type: String,
}

/// Response carrying a presigned PUT URL for a direct upload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignUploadResponse {
    pub key: String,
    pub url: String,
    pub expires_in_secs: u64,
}

/// Response carrying a presigned GET URL for viewing a processed image.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewUrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

/// One row in the activity log listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogListItem {
    pub id: i64,
    pub description: String,
    pub image_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Error envelope shared by all endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: bool,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }
}

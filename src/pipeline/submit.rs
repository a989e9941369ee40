use uuid::Uuid;

use crate::models::image::{ImageJob, NewImageJob};
use crate::pipeline::{BlobStore, BoxError, JobStore, MessageQueue};
use crate::services::queue::JobMessage;

/// Mime types accepted for upload.
pub const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// A validated-but-unsubmitted upload.
#[derive(Debug)]
pub struct NewSubmission<'a> {
    pub owner_id: &'a str,
    pub display_name: &'a str,
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

/// The Job Submitter: turns one validated byte payload into exactly one
/// durable job record plus exactly one queue message, in that order.
pub struct Submitter<S, R, Q> {
    blobs: S,
    records: R,
    queue: Q,
    max_upload_bytes: usize,
}

impl<S, R, Q> Submitter<S, R, Q>
where
    S: BlobStore,
    R: JobStore,
    Q: MessageQueue,
{
    pub fn new(blobs: S, records: R, queue: Q, max_upload_bytes: usize) -> Self {
        Self {
            blobs,
            records,
            queue,
            max_upload_bytes,
        }
    }

    pub async fn submit(&self, submission: NewSubmission<'_>) -> Result<ImageJob, SubmitError> {
        self.validate(&submission)?;

        let image_id = Uuid::new_v4();
        let ext = extension_for_mime(submission.mime_type);
        let original_key = format!("{}/original/{}.{}", submission.owner_id, image_id, ext);
        let processed_key = format!("{}/processed/{}.png", submission.owner_id, image_id);

        // Original bytes first; a failure here leaves no record behind.
        self.blobs
            .put_object(&original_key, submission.bytes, submission.mime_type)
            .await
            .map_err(SubmitError::Infrastructure)?;

        // The record write must land before the message is enqueued, so no
        // message ever references a record that does not exist.
        let job = self
            .records
            .insert_job(&NewImageJob {
                id: image_id,
                owner_id: submission.owner_id.to_string(),
                display_name: submission.display_name.to_string(),
                original_key: original_key.clone(),
                processed_key: processed_key.clone(),
            })
            .await
            .map_err(SubmitError::Infrastructure)?;

        let message = JobMessage {
            image_id,
            user_id: submission.owner_id.to_string(),
            image_name: submission.display_name.to_string(),
            original_key,
            processed_key,
            mime_type: submission.mime_type.to_string(),
        };

        // Not rolled back on failure: the record stays `processing` with no
        // message in flight, pending manual reconciliation.
        self.queue
            .send(&message)
            .await
            .map_err(SubmitError::Infrastructure)?;

        self.records
            .append_log(
                submission.owner_id,
                &format!("Image queued for processing: {}", submission.display_name),
                Some(image_id),
            )
            .await
            .map_err(SubmitError::Infrastructure)?;

        metrics::counter!("images_submitted_total").increment(1);
        tracing::info!(
            image_id = %image_id,
            owner_id = %submission.owner_id,
            size = submission.bytes.len(),
            "image submitted for processing"
        );

        Ok(job)
    }

    /// Synchronous validation. Rejections happen before any write, so a
    /// rejected submission creates no partial state.
    fn validate(&self, submission: &NewSubmission<'_>) -> Result<(), SubmitError> {
        if !ALLOWED_MIME_TYPES.contains(&submission.mime_type) {
            return Err(SubmitError::UnsupportedMediaType(
                submission.mime_type.to_string(),
            ));
        }

        if submission.bytes.is_empty() {
            return Err(SubmitError::EmptyPayload);
        }

        if submission.bytes.len() > self.max_upload_bytes {
            return Err(SubmitError::PayloadTooLarge {
                limit: self.max_upload_bytes,
            });
        }

        let format =
            image::guess_format(submission.bytes).map_err(|_| SubmitError::MimeMismatch)?;
        if !mime_matches(format.to_mime_type(), submission.mime_type) {
            return Err(SubmitError::MimeMismatch);
        }

        Ok(())
    }
}

/// File extension for an accepted mime type, used in object-store keys.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn mime_matches(sniffed: &str, declared: &str) -> bool {
    sniffed == declared || (sniffed == "image/jpeg" && declared == "image/jpg")
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Image payload is empty")]
    EmptyPayload,

    #[error("Image exceeds the {limit}-byte size cap")]
    PayloadTooLarge { limit: usize },

    #[error("Image bytes do not match the declared mime type")]
    MimeMismatch,

    /// Object-store, record-store, or queue failure. Retryable by the caller.
    #[error("Submission infrastructure error: {0}")]
    Infrastructure(#[source] BoxError),
}

impl SubmitError {
    /// Validation errors are rejected before any persistence and are never
    /// retried; everything else is a retryable infrastructure failure.
    pub fn is_validation(&self) -> bool {
        !matches!(self, SubmitError::Infrastructure(_))
    }
}

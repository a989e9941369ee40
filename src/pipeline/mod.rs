//! The asynchronous job pipeline: submission on one side, the worker loop
//! on the other, meeting at the durable queue.
//!
//! The submitter and worker are generic over the seam traits below so the
//! production clients (PostgreSQL, S3, Redis Streams, the matting service)
//! can be swapped for in-memory fakes in tests. Dependencies are
//! constructed once at process start and passed in; nothing here owns a
//! global client.

#![allow(async_fn_in_trait)]

use uuid::Uuid;

use crate::models::image::{ImageJob, JobStatus, NewImageJob};
use crate::services::queue::{Delivery, JobMessage};

pub mod submit;
pub mod worker;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Opaque byte blobs keyed by string. Writes to the same key are
/// last-write-wins, which keeps repeated processing of a redelivered
/// message idempotent.
pub trait BlobStore {
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: &str)
        -> Result<(), BoxError>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, BoxError>;
}

/// Durable job records plus the append-only activity log.
pub trait JobStore {
    /// Insert a record with status `processing`.
    async fn insert_job(&self, new: &NewImageJob) -> Result<ImageJob, BoxError>;

    /// Write a status, bumping `updated_at`. A `completed` record is never
    /// overwritten.
    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<(), BoxError>;

    async fn append_log(
        &self,
        owner_id: &str,
        description: &str,
        image_id: Option<Uuid>,
    ) -> Result<(), BoxError>;
}

/// The durable queue: at-least-once delivery, visibility-window
/// redelivery, and dead-letter escalation after a bounded number of
/// attempts.
pub trait MessageQueue {
    async fn send(&self, message: &JobMessage) -> Result<(), BoxError>;

    /// Long-poll for at most one message. `Ok(None)` means the poll came
    /// back empty, which is not an error.
    async fn receive(&self) -> Result<Option<Delivery>, BoxError>;

    /// Delete a delivered message. Only called after a fully successful
    /// processing pass.
    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), BoxError>;
}

/// The inference boundary: a stateless function over bytes.
pub trait BackgroundRemover {
    async fn remove_background(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>, BoxError>;
}

impl<T: BlobStore> BlobStore for &T {
    async fn put_object(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), BoxError> {
        (**self).put_object(key, bytes, content_type).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, BoxError> {
        (**self).get_object(key).await
    }
}

impl<T: JobStore> JobStore for &T {
    async fn insert_job(&self, new: &NewImageJob) -> Result<ImageJob, BoxError> {
        (**self).insert_job(new).await
    }

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<(), BoxError> {
        (**self).set_status(id, status).await
    }

    async fn append_log(
        &self,
        owner_id: &str,
        description: &str,
        image_id: Option<Uuid>,
    ) -> Result<(), BoxError> {
        (**self).append_log(owner_id, description, image_id).await
    }
}

impl<T: MessageQueue> MessageQueue for &T {
    async fn send(&self, message: &JobMessage) -> Result<(), BoxError> {
        (**self).send(message).await
    }

    async fn receive(&self) -> Result<Option<Delivery>, BoxError> {
        (**self).receive().await
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), BoxError> {
        (**self).acknowledge(receipt_handle).await
    }
}

impl<T: BackgroundRemover> BackgroundRemover for &T {
    async fn remove_background(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>, BoxError> {
        (**self).remove_background(image, mime_type).await
    }
}

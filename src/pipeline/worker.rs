use std::time::Duration;

use tokio::sync::watch;

use crate::models::image::JobStatus;
use crate::pipeline::{BackgroundRemover, BlobStore, BoxError, JobStore, MessageQueue};
use crate::services::queue::{Delivery, JobMessage};

/// Back-off after a queue receive error before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delivery attempts the queue allows before dead-lettering. The worker
    /// uses this only to log that a failing message was on its final
    /// attempt; the escalation itself belongs to the queue.
    pub max_deliveries: u32,

    /// Upper bound on fetched originals, mirroring the cap enforced at
    /// upload.
    pub max_object_bytes: usize,
}

/// The worker loop: a single, strictly sequential consumer of the durable
/// queue. It processes at most one message at a time; running more worker
/// processes is the only scale-out mechanism, with the queue's visibility
/// window as the sole mutual exclusion.
pub struct Worker<Q, S, R, E> {
    queue: Q,
    blobs: S,
    records: R,
    engine: E,
    config: WorkerConfig,
}

impl<Q, S, R, E> Worker<Q, S, R, E>
where
    Q: MessageQueue,
    S: BlobStore,
    R: JobStore,
    E: BackgroundRemover,
{
    pub fn new(queue: Q, blobs: S, records: R, engine: E, config: WorkerConfig) -> Self {
        Self {
            queue,
            blobs,
            records,
            engine,
            config,
        }
    }

    /// Run until the stop signal flips to `true`.
    ///
    /// The signal is honored between iterations: an in-flight pass finishes
    /// or fails naturally rather than being aborted mid-write, with the
    /// queue's visibility timeout as the backstop for abandoned messages.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.poll_once() => {
                    if let Err(e) = polled {
                        tracing::error!(error = %e, "queue receive failed, backing off");
                        tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                    }
                }
            }
        }

        tracing::info!("worker loop stopped");
    }

    /// One bounded iteration: receive at most one message and handle it.
    ///
    /// Returns `Ok(true)` if a message was handled (successfully or not),
    /// `Ok(false)` if the long poll came back empty.
    pub async fn poll_once(&self) -> Result<bool, BoxError> {
        let Some(delivery) = self.queue.receive().await? else {
            return Ok(false);
        };

        self.handle(delivery).await;
        Ok(true)
    }

    async fn handle(&self, delivery: Delivery) {
        let message = &delivery.message;
        tracing::info!(
            image_id = %message.image_id,
            delivery_count = delivery.delivery_count,
            original_key = %message.original_key,
            "processing job"
        );
        let start = std::time::Instant::now();

        match self.process(message).await {
            Ok(()) => {
                metrics::histogram!("image_processing_seconds")
                    .record(start.elapsed().as_secs_f64());
                metrics::counter!("images_completed_total").increment(1);

                // Acknowledge only after the record reads `completed`. If the
                // ack itself fails, the redelivered pass finds the record
                // already completed and its status write is a no-op.
                if let Err(e) = self.queue.acknowledge(&delivery.receipt_handle).await {
                    tracing::error!(image_id = %message.image_id, error = %e, "failed to acknowledge message");
                } else {
                    tracing::info!(image_id = %message.image_id, "job completed");
                }
            }
            Err(e) => {
                metrics::counter!("images_failed_total").increment(1);
                tracing::error!(
                    image_id = %message.image_id,
                    delivery_count = delivery.delivery_count,
                    error = %e,
                    "job processing failed"
                );

                // Optimistic failure marker: provisional until the message
                // either succeeds on a redelivery or exhausts its budget.
                if let Err(db_err) = self
                    .records
                    .set_status(message.image_id, JobStatus::Failed)
                    .await
                {
                    tracing::error!(image_id = %message.image_id, error = %db_err, "failed to record failed status");
                }

                if delivery.delivery_count >= self.config.max_deliveries {
                    tracing::warn!(
                        image_id = %message.image_id,
                        deliveries = delivery.delivery_count,
                        "final delivery attempt exhausted; message will be dead-lettered"
                    );
                }
                // No acknowledge: the message becomes visible again once the
                // visibility window elapses.
            }
        }
    }

    /// One full processing pass. Any error leaves the message
    /// unacknowledged.
    async fn process(&self, message: &JobMessage) -> Result<(), BoxError> {
        let original = self.blobs.get_object(&message.original_key).await?;
        if original.len() > self.config.max_object_bytes {
            return Err(format!(
                "original object {} exceeds the {}-byte processing cap",
                message.original_key, self.config.max_object_bytes
            )
            .into());
        }

        let processed = self
            .engine
            .remove_background(&original, &message.mime_type)
            .await?;

        // Processed bytes land before the status flips; a poller that reads
        // `completed` can always fetch the result.
        self.blobs
            .put_object(&message.processed_key, &processed, "image/png")
            .await?;

        self.records
            .set_status(message.image_id, JobStatus::Completed)
            .await?;

        self.records
            .append_log(
                &message.user_id,
                &format!("Image processing completed: {}", message.image_name),
                Some(message.image_id),
            )
            .await?;

        Ok(())
    }
}

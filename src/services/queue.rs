use std::time::Duration;

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::{BoxError, MessageQueue};

/// Job payload carried by the durable queue (JSON, camelCase on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub image_id: Uuid,
    pub user_id: String,
    pub image_name: String,
    pub original_key: String,
    pub processed_key: String,
    pub mime_type: String,
}

/// One received message plus the queue-assigned delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: JobMessage,
    /// Stream entry id; needed to acknowledge.
    pub receipt_handle: String,
    /// How many times the queue has handed this message to a consumer,
    /// this delivery included. Starts at 1.
    pub delivery_count: u32,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    pub stream: String,
    pub group: String,
    /// Consumer name within the group, unique per worker process.
    pub consumer: String,
    pub dlq_stream: String,
    /// Long-poll wait for new messages.
    pub wait_time: Duration,
    /// Idle window after which an unacknowledged message becomes eligible
    /// for redelivery.
    pub visibility_timeout: Duration,
    /// Delivery attempts before a message is routed to the DLQ.
    pub max_deliveries: u32,
}

impl QueueConfig {
    /// Build from application config with the given consumer name.
    pub fn from_app(config: &crate::config::AppConfig, consumer: &str) -> Self {
        Self {
            redis_url: config.redis_url.clone(),
            stream: config.queue_stream.clone(),
            group: config.queue_group.clone(),
            consumer: consumer.to_string(),
            dlq_stream: config.queue_dlq_stream.clone(),
            wait_time: Duration::from_secs(config.queue_wait_secs),
            visibility_timeout: Duration::from_secs(config.queue_visibility_secs),
            max_deliveries: config.queue_max_deliveries,
        }
    }
}

/// Redis-Streams-backed durable job queue.
///
/// A consumer group gives each message to at most one consumer while it
/// sits in the pending-entries list; an entry idle past the visibility
/// timeout is reclaimed for redelivery, and one that has exhausted its
/// delivery budget is copied to the dead-letter stream instead of being
/// handed out again.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(config.redis_url.as_str()).map_err(QueueError::Redis)?;
        Ok(Self { client, config })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Create the consumer group (and stream) if they do not exist yet.
    pub async fn init(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => tracing::info!(group = %self.config.group, "created consumer group"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                tracing::debug!(group = %self.config.group, "consumer group already exists");
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a job message. Returns the stream entry id.
    pub async fn enqueue(&self, message: &JobMessage) -> Result<String, QueueError> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(message).map_err(QueueError::Serialize)?;

        let entry_id: String = redis::cmd("XADD")
            .arg(&self.config.stream)
            .arg("*")
            .arg("payload")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        tracing::debug!(image_id = %message.image_id, entry_id = %entry_id, "enqueued job message");
        Ok(entry_id)
    }

    /// Receive at most one message.
    ///
    /// Messages whose visibility window has lapsed are redelivered first,
    /// with their delivery count incremented by the queue; otherwise this
    /// blocks up to the configured wait interval for a new message. An
    /// empty result is not an error.
    pub async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn().await?;

        if let Some(delivery) = self.claim_expired(&mut conn).await? {
            return Ok(Some(delivery));
        }

        self.read_new(&mut conn).await
    }

    /// Acknowledge (delete) a delivered message.
    pub async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        self.ack_entry(&mut conn, receipt_handle).await
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Number of messages currently in the job stream.
    pub async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = redis::cmd("XLEN")
            .arg(&self.config.stream)
            .query_async(&mut conn)
            .await?;
        Ok(depth)
    }

    /// Number of messages parked in the dead-letter stream.
    pub async fn dlq_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = redis::cmd("XLEN")
            .arg(&self.config.dlq_stream)
            .query_async(&mut conn)
            .await?;
        Ok(depth)
    }

    /// Reclaim a pending entry idle past the visibility timeout, or route
    /// it to the DLQ if it has already burned through its deliveries.
    async fn claim_expired(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<Option<Delivery>, QueueError> {
        let visibility_ms = self.config.visibility_timeout.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg("IDLE")
            .arg(visibility_ms)
            .arg("-")
            .arg("+")
            .arg(10usize)
            .query_async(conn)
            .await?;

        for entry in pending.ids {
            let delivered = entry.times_delivered as u32;

            if delivered >= self.config.max_deliveries {
                self.dead_letter(conn, &entry.id, delivered).await?;
                continue;
            }

            let claimed: StreamClaimReply = redis::cmd("XCLAIM")
                .arg(&self.config.stream)
                .arg(&self.config.group)
                .arg(&self.config.consumer)
                .arg(visibility_ms)
                .arg(&entry.id)
                .query_async(conn)
                .await?;

            for claimed_entry in claimed.ids {
                if let Some(message) = parse_entry(&claimed_entry) {
                    return Ok(Some(Delivery {
                        message,
                        receipt_handle: claimed_entry.id.clone(),
                        delivery_count: delivered + 1,
                    }));
                }
                // Malformed payload: leave it unacknowledged so it rides
                // the normal redelivery/DLQ path.
            }
        }

        Ok(None)
    }

    /// Block up to the wait interval for a fresh message.
    async fn read_new(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<Option<Delivery>, QueueError> {
        let wait_ms = self.config.wait_time.as_millis() as u64;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg("COUNT")
            .arg(1usize)
            .arg("BLOCK")
            .arg(wait_ms)
            .arg("STREAMS")
            .arg(&self.config.stream)
            .arg(">")
            .query_async(conn)
            .await?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        for key in reply.keys {
            for entry in key.ids {
                if let Some(message) = parse_entry(&entry) {
                    return Ok(Some(Delivery {
                        message,
                        receipt_handle: entry.id.clone(),
                        delivery_count: 1,
                    }));
                }
            }
        }

        Ok(None)
    }

    /// Copy an exhausted entry to the dead-letter stream and delete the
    /// original. The job record is not touched here.
    async fn dead_letter(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        entry_id: &str,
        deliveries: u32,
    ) -> Result<(), QueueError> {
        let range: redis::streams::StreamRangeReply = redis::cmd("XRANGE")
            .arg(&self.config.stream)
            .arg(entry_id)
            .arg(entry_id)
            .query_async(conn)
            .await?;

        let payload: String = range
            .ids
            .first()
            .and_then(|entry| entry.get("payload"))
            .unwrap_or_default();

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream)
            .arg("*")
            .arg("payload")
            .arg(&payload)
            .arg("original_id")
            .arg(entry_id)
            .arg("deliveries")
            .arg(deliveries)
            .query_async::<String>(conn)
            .await?;

        self.ack_entry(conn, entry_id).await?;

        tracing::warn!(
            entry_id,
            deliveries,
            "message exhausted its deliveries, moved to dead-letter stream"
        );
        Ok(())
    }

    async fn ack_entry(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        entry_id: &str,
    ) -> Result<(), QueueError> {
        redis::cmd("XACK")
            .arg(&self.config.stream)
            .arg(&self.config.group)
            .arg(entry_id)
            .query_async::<()>(conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream)
            .arg(entry_id)
            .query_async::<()>(conn)
            .await?;

        Ok(())
    }
}

fn parse_entry(entry: &StreamId) -> Option<JobMessage> {
    let payload: String = entry.get("payload")?;
    match serde_json::from_str(&payload) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(entry_id = %entry.id, error = %e, "unparseable message payload, leaving for redelivery");
            None
        }
    }
}

impl MessageQueue for JobQueue {
    async fn send(&self, message: &JobMessage) -> Result<(), BoxError> {
        self.enqueue(message).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, BoxError> {
        Ok(JobQueue::receive(self).await?)
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), BoxError> {
        Ok(JobQueue::acknowledge(self, receipt_handle).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Object store bucket name
    pub s3_bucket: String,

    /// Object store endpoint URL (S3-compatible)
    pub s3_endpoint: String,

    /// Object store access key ID
    pub s3_access_key: String,

    /// Object store secret access key
    pub s3_secret_key: String,

    /// Background-removal inference endpoint URL
    pub matting_endpoint: String,

    /// Bearer token for the inference endpoint
    pub matting_api_token: String,

    /// HMAC secret for verifying bearer tokens (HS256)
    pub jwt_secret: String,

    /// Upper bound on uploaded (and fetched) image size, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Redis stream holding job messages
    #[serde(default = "default_queue_stream")]
    pub queue_stream: String,

    /// Consumer group name for workers
    #[serde(default = "default_queue_group")]
    pub queue_group: String,

    /// Dead-letter stream for messages that exhausted their deliveries
    #[serde(default = "default_queue_dlq_stream")]
    pub queue_dlq_stream: String,

    /// Long-poll wait when receiving, in seconds
    #[serde(default = "default_queue_wait_secs")]
    pub queue_wait_secs: u64,

    /// Visibility window before an unacknowledged message becomes eligible
    /// for redelivery, in seconds. Must exceed worst-case inference latency.
    #[serde(default = "default_queue_visibility_secs")]
    pub queue_visibility_secs: u64,

    /// Delivery attempts before a message is dead-lettered
    #[serde(default = "default_queue_max_deliveries")]
    pub queue_max_deliveries: u32,

    /// TTL for presigned view/download URLs, in seconds
    #[serde(default = "default_presign_view_ttl_secs")]
    pub presign_view_ttl_secs: u32,

    /// TTL for presigned direct-upload PUT URLs, in seconds
    #[serde(default = "default_presign_upload_ttl_secs")]
    pub presign_upload_ttl_secs: u32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_queue_stream() -> String {
    "photomatte:jobs".to_string()
}

fn default_queue_group() -> String {
    "photomatte:workers".to_string()
}

fn default_queue_dlq_stream() -> String {
    "photomatte:dlq".to_string()
}

fn default_queue_wait_secs() -> u64 {
    20
}

fn default_queue_visibility_secs() -> u64 {
    300
}

fn default_queue_max_deliveries() -> u32 {
    3
}

fn default_presign_view_ttl_secs() -> u32 {
    3600
}

fn default_presign_upload_ttl_secs() -> u32 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

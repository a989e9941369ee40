use photomatte::{
    config::AppConfig,
    db,
    pipeline::worker::{Worker, WorkerConfig},
    services::{
        matting::MattingClient,
        queue::{JobQueue, QueueConfig},
        storage::StorageClient,
    },
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting photomatte worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage = StorageClient::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize storage client");

    let consumer = format!("worker-{}", std::process::id());
    let queue = JobQueue::new(QueueConfig::from_app(&config, &consumer))
        .expect("Failed to initialize job queue");
    queue
        .init()
        .await
        .expect("Failed to initialize queue consumer group");

    let matting = MattingClient::new(&config.matting_endpoint, &config.matting_api_token);

    // Stop signal: flips on ctrl-c, honored between iterations. An
    // in-flight pass finishes or fails naturally; the queue's visibility
    // timeout covers anything abandoned.
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        let _ = stop_tx.send(true);
    });

    let worker = Worker::new(
        queue,
        storage,
        db_pool,
        matting,
        WorkerConfig {
            max_deliveries: config.queue_max_deliveries,
            max_object_bytes: config.max_upload_bytes,
        },
    );

    tracing::info!("Worker ready, starting job processing loop");
    worker.run(stop_rx).await;

    tracing::info!("Worker shutdown complete");
}

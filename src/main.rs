use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use photomatte::app_state::AppState;
use photomatte::config::AppConfig;
use photomatte::db;
use photomatte::routes;
use photomatte::services::queue::{JobQueue, QueueConfig};
use photomatte::services::storage::StorageClient;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing photomatte server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("images_submitted_total", "Total images submitted for processing");
    metrics::describe_counter!("images_completed_total", "Total images processed successfully");
    metrics::describe_counter!(
        "images_failed_total",
        "Total processing passes that failed (retries included)"
    );
    metrics::describe_histogram!(
        "image_processing_seconds",
        "Time to process one background-removal job"
    );
    metrics::describe_gauge!("queue_depth", "Messages currently in the job stream");
    metrics::describe_gauge!("dlq_depth", "Messages parked in the dead-letter stream");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize object storage client
    tracing::info!("Initializing object storage client");
    let storage = StorageClient::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize storage client");

    // Initialize job queue
    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(QueueConfig::from_app(&config, "api"))
        .expect("Failed to initialize job queue");
    queue
        .init()
        .await
        .expect("Failed to initialize queue consumer group");

    let body_limit = config.max_upload_bytes + 1024;
    let bind_addr = config.bind_addr.clone();

    // Create shared application state
    let state = AppState::new(config, db_pool, storage, queue);

    // Periodically export queue depths
    let gauge_queue = state.queue.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            if let Ok(depth) = gauge_queue.depth().await {
                metrics::gauge!("queue_depth").set(depth as f64);
            }
            if let Ok(depth) = gauge_queue.dlq_depth().await {
                metrics::gauge!("dlq_depth").set(depth as f64);
            }
        }
    });

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/images",
            post(routes::upload::submit_image).get(routes::images::list_images),
        )
        .route(
            "/api/v1/images/presign-upload",
            post(routes::upload::presign_upload),
        )
        .route(
            "/api/v1/images/{image_id}",
            get(routes::images::get_image_status),
        )
        .route(
            "/api/v1/images/{image_id}/view",
            get(routes::images::view_image),
        )
        .route(
            "/api/v1/images/{image_id}/download",
            get(routes::images::download_image),
        )
        .route("/api/v1/logs", get(routes::logs::list_logs))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit));

    tracing::info!("Starting photomatte on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

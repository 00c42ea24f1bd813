use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crop_advisor::{
    app_state::AppState,
    config::{AppConfig, StorageBackend},
    routes,
    services::{
        diagnosis::DiagnosisContext,
        gemini::GeminiClient,
        queue::{JobDispatcher, JobQueue},
        status::{RedisStatusStore, StatusCache},
        storage, worker,
    },
};

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

    tracing::info!("Initializing crop-advisor server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    let gateway = GeminiClient::new(&config.gemini_api_url, &config.gemini_api_key)
        .expect("Failed to initialize AI gateway client")
        .with_timeouts(config.text_timeout(), config.image_timeout());
    let gateway = Arc::new(gateway);

    tracing::info!(backend = ?config.storage_backend, "Initializing blob storage");
    let blobs = storage::from_config(&config).expect("Failed to initialize blob storage");

    // Redis mode hands jobs to the worker binary; otherwise run them in-process.
    let (status, queue): (StatusCache, Arc<dyn JobDispatcher>) = match &config.redis_url {
        Some(redis_url) => {
            tracing::info!("Connecting to Redis status cache and job queue");
            let store = RedisStatusStore::new(redis_url).expect("Failed to initialize status cache");
            let queue = JobQueue::new(redis_url).expect("Failed to initialize job queue");
            (StatusCache::new(Arc::new(store)), Arc::new(queue) as Arc<dyn JobDispatcher>)
        }
        None => {
            tracing::info!(
                concurrency = config.worker_concurrency,
                "REDIS_URL not set, using in-process status cache and worker pool"
            );
            let status = StatusCache::in_memory();
            let ctx = DiagnosisContext::new(
                gateway.clone(),
                blobs.clone(),
                status.clone(),
                &config.response_language,
            );
            let (queue, _pool) = worker::spawn_pool(ctx, config.worker_concurrency);
            (status, Arc::new(queue) as Arc<dyn JobDispatcher>)
        }
    };

    // Create shared application state
    let state = AppState::new(gateway, blobs, status, queue, &config.response_language)
        .with_limits(config.max_image_bytes, config.max_request_bytes);

    let mut app = routes::router(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );
    if config.storage_backend == StorageBackend::Local {
        app = app.nest_service("/storage", ServeDir::new(&config.storage_dir));
    }

    let app: Router = app
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting crop-advisor on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

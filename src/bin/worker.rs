use crop_advisor::{
    config::AppConfig,
    services::{
        diagnosis::{self, DiagnosisContext},
        gemini::GeminiClient,
        queue::{JobQueue, QueueError},
        status::{RedisStatusStore, StatusCache},
        storage,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
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

    tracing::info!("Starting diagnosis worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let redis_url = config
        .redis_url
        .as_deref()
        .expect("REDIS_URL is required by the worker");
    let poll_interval = Duration::from_millis(config.worker_poll_interval_ms);

    // Metrics are recorded but not exported from this process.
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    // Initialize services
    tracing::info!("Initializing services");
    let gateway = GeminiClient::new(&config.gemini_api_url, &config.gemini_api_key)
        .expect("Failed to initialize AI gateway client")
        .with_timeouts(config.text_timeout(), config.image_timeout());
    let blobs = storage::from_config(&config).expect("Failed to initialize blob storage");
    let store = RedisStatusStore::new(redis_url).expect("Failed to initialize status cache");
    let queue = JobQueue::new(redis_url).expect("Failed to initialize job queue");

    let ctx = DiagnosisContext::new(
        Arc::new(gateway),
        blobs,
        StatusCache::new(Arc::new(store)),
        &config.response_language,
    );

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        match process_next_job(&ctx, &queue).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error claiming job, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
async fn process_next_job(ctx: &DiagnosisContext, queue: &JobQueue) -> Result<bool, QueueError> {
    let Some(claimed) = queue.dequeue().await? else {
        return Ok(false);
    };

    tracing::info!(
        job_id = %claimed.job.job_id,
        images = claimed.job.image_paths.len(),
        "Processing diagnosis job"
    );

    // The job always ends in a terminal status record; it is not retried.
    let status = diagnosis::run(ctx, &claimed.job).await;
    queue.complete(&claimed).await?;

    tracing::info!(job_id = %claimed.job.job_id, %status, "Diagnosis job done");
    Ok(true)
}

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use crate::models::job::DiagnosisJob;

const QUEUE_KEY: &str = "crop_advisor:jobs";
const PROCESSING_KEY: &str = "crop_advisor:processing";

/// Hands diagnosis jobs to whatever runs them.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &DiagnosisJob) -> Result<(), QueueError>;

    /// Check that jobs can still be handed off (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// A job claimed from Redis together with its raw payload, which is needed
/// to remove it from the processing list.
#[derive(Debug)]
pub struct ClaimedJob {
    pub job: DiagnosisJob,
    payload: String,
}

/// Redis-backed job queue consumed by the `worker` binary.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue a diagnosis job.
    pub async fn enqueue(&self, job: &DiagnosisJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Claim the oldest job, moving it onto the processing list.
    pub async fn dequeue(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        let Some(payload) = result else {
            return Ok(None);
        };

        match serde_json::from_str::<DiagnosisJob>(&payload) {
            Ok(job) => Ok(Some(ClaimedJob { job, payload })),
            Err(e) => {
                // An undecodable payload would otherwise sit in the processing list forever.
                conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
                Err(QueueError::Serialize(e))
            }
        }
    }

    /// Remove a finished job from the processing list.
    pub async fn complete(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &claimed.payload)
            .await?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }
}

#[async_trait]
impl JobDispatcher for JobQueue {
    async fn dispatch(&self, job: &DiagnosisJob) -> Result<(), QueueError> {
        self.enqueue(job).await?;
        if let Ok(depth) = self.queue_depth().await {
            metrics::gauge!("diagnosis_queue_depth").set(depth as f64);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// In-process queue feeding the embedded worker pool.
#[derive(Clone)]
pub struct LocalQueue {
    tx: mpsc::Sender<DiagnosisJob>,
}

impl LocalQueue {
    pub fn new(tx: mpsc::Sender<DiagnosisJob>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl JobDispatcher for LocalQueue {
    async fn dispatch(&self, job: &DiagnosisJob) -> Result<(), QueueError> {
        self.tx
            .send(job.clone())
            .await
            .map_err(|_| QueueError::Closed)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        if self.tx.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Worker pool is not accepting jobs")]
    Closed,
}

//! Diagnosis status cache.
//!
//! Every job owns a `diagnosis:{job_id}` record. The `diagnosis_all` slot
//! names the job of the most recent upload, so the unscoped status endpoint
//! always follows the latest submission. Older deployments kept the record
//! itself in that slot; such values are still decoded.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::job::{CachedStatus, DiagnosisStatus, StatusRecord};

/// Slot pointing at the latest upload's job.
pub const LATEST_KEY: &str = "diagnosis_all";

pub const PROCESSING_TTL: Duration = Duration::from_secs(30 * 60);
pub const COMPLETED_TTL: Duration = Duration::from_secs(60 * 60);
pub const FAILED_TTL: Duration = Duration::from_secs(30 * 60);

const REDIS_PREFIX: &str = "crop_advisor:";

const REFRESH_IF_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Key/value backend with per-entry expiry.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Reset the expiry of `key` to `ttl` if it still holds `expected`.
    /// Returns whether the entry was refreshed.
    async fn refresh_if(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Check connectivity (for health checks).
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Redis-backed store; entries expire through `SET ... EX`.
pub struct RedisStatusStore {
    client: redis::Client,
}

impl RedisStatusStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self { client })
    }

    fn key(key: &str) -> String {
        format!("{REDIS_PREFIX}{key}")
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("SET")
            .arg(Self::key(key))
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(Self::key(key)).await?;
        Ok(value)
    }

    async fn refresh_if(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let refreshed: i64 = redis::Script::new(REFRESH_IF_SCRIPT)
            .key(Self::key(key))
            .arg(expected)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(refreshed == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// In-process store for single-binary deployments and tests.
#[derive(Default)]
pub struct MemoryStatusStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn refresh_if(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some((value, expires_at)) if *expires_at > now && value == expected => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Typed view over a [`StatusStore`].
#[derive(Clone)]
pub struct StatusCache {
    store: Arc<dyn StatusStore>,
}

impl StatusCache {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStatusStore::new()))
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    fn job_key(job_id: Uuid) -> String {
        format!("diagnosis:{job_id}")
    }

    /// Overwrite a job's record; the TTL follows the status and counts from
    /// this write. If the latest-upload slot still names the job, its expiry
    /// restarts too.
    pub async fn write(&self, job_id: Uuid, record: &StatusRecord) -> Result<(), StoreError> {
        let ttl = match record.status {
            DiagnosisStatus::Processing => PROCESSING_TTL,
            DiagnosisStatus::Completed => COMPLETED_TTL,
            DiagnosisStatus::Failed => FAILED_TTL,
        };
        let value = serde_json::to_string(record)?;
        self.store.put(&Self::job_key(job_id), &value, ttl).await?;
        self.store
            .refresh_if(LATEST_KEY, &job_id.to_string(), COMPLETED_TTL)
            .await?;
        Ok(())
    }

    pub async fn mark_processing(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.write(job_id, &StatusRecord::processing()).await
    }

    pub async fn mark_completed(&self, job_id: Uuid, html: String) -> Result<(), StoreError> {
        self.write(job_id, &StatusRecord::completed(html)).await
    }

    pub async fn mark_failed(
        &self,
        job_id: Uuid,
        reason: impl std::fmt::Display,
    ) -> Result<(), StoreError> {
        self.write(job_id, &StatusRecord::failed(reason)).await
    }

    /// A job's record, `None` once expired or if the job never existed.
    pub async fn record_for(&self, job_id: Uuid) -> Result<Option<StatusRecord>, StoreError> {
        let raw = self.store.get(&Self::job_key(job_id)).await?;
        Ok(raw.map(|raw| CachedStatus::parse(&raw).into_record()))
    }

    /// Point the latest-upload slot at `job_id`, discarding whatever the
    /// slot showed before.
    pub async fn promote_latest(&self, job_id: Uuid) -> Result<(), StoreError> {
        self.store
            .put(LATEST_KEY, &job_id.to_string(), COMPLETED_TTL)
            .await
    }

    /// Status of the most recent upload. Missing state reads as processing.
    pub async fn latest(&self) -> Result<StatusRecord, StoreError> {
        let Some(raw) = self.store.get(LATEST_KEY).await? else {
            return Ok(StatusRecord::processing());
        };

        match Uuid::parse_str(raw.trim()) {
            Ok(job_id) => Ok(self
                .record_for(job_id)
                .await?
                .unwrap_or_else(StatusRecord::processing)),
            Err(_) => Ok(CachedStatus::parse(&raw).into_record()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_missing_latest_reads_processing() {
        let cache = StatusCache::in_memory();
        assert_eq!(cache.latest().await.unwrap(), StatusRecord::processing());
    }

    #[tokio::test]
    async fn test_latest_follows_promoted_job() {
        let cache = StatusCache::in_memory();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        cache.mark_completed(first, "<p>rust</p>".to_string()).await.unwrap();
        cache.promote_latest(first).await.unwrap();
        assert_eq!(
            cache.latest().await.unwrap(),
            StatusRecord::completed("<p>rust</p>".to_string())
        );

        cache.promote_latest(second).await.unwrap();
        assert_eq!(cache.latest().await.unwrap(), StatusRecord::processing());

        // The first job's own record is untouched.
        assert_eq!(
            cache.record_for(first).await.unwrap().unwrap().status,
            DiagnosisStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_legacy_value_in_latest_slot_decoded() {
        let store = Arc::new(MemoryStatusStore::new());
        store
            .put(LATEST_KEY, "Error: quota", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = StatusCache::new(store);
        let record = cache.latest().await.unwrap();
        assert_eq!(record.status, DiagnosisStatus::Failed);
        assert_eq!(record.diagnosis.as_deref(), Some("Error: quota"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_record_expires_after_thirty_minutes() {
        let cache = StatusCache::in_memory();
        let job = Uuid::new_v4();
        cache.mark_processing(job).await.unwrap();

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert!(cache.record_for(job).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert!(cache.record_for(job).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_record_lives_an_hour() {
        let cache = StatusCache::in_memory();
        let job = Uuid::new_v4();
        cache.mark_completed(job, "<p>ok</p>".to_string()).await.unwrap();

        tokio::time::advance(Duration::from_secs(59 * 60)).await;
        assert!(cache.record_for(job).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert!(cache.record_for(job).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_keeps_latest_slot_alive() {
        let cache = StatusCache::in_memory();
        let job = Uuid::new_v4();
        cache.mark_processing(job).await.unwrap();
        cache.promote_latest(job).await.unwrap();

        tokio::time::advance(Duration::from_secs(50 * 60)).await;
        cache.mark_completed(job, "<p>done</p>".to_string()).await.unwrap();

        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        assert_eq!(
            cache.latest().await.unwrap(),
            StatusRecord::completed("<p>done</p>".to_string())
        );

        tokio::time::advance(Duration::from_secs(46 * 60)).await;
        assert_eq!(cache.latest().await.unwrap(), StatusRecord::processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finishing_old_job_does_not_refresh_newer_upload_slot() {
        let cache = StatusCache::in_memory();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        cache.promote_latest(old).await.unwrap();
        cache.mark_processing(new).await.unwrap();
        cache.promote_latest(new).await.unwrap();

        cache.mark_failed(old, "timeout").await.unwrap();
        assert_eq!(cache.latest().await.unwrap(), StatusRecord::processing());

        let store = MemoryStatusStore::new();
        store.put(LATEST_KEY, "a", Duration::from_secs(60)).await.unwrap();
        assert!(!store.refresh_if(LATEST_KEY, "b", Duration::from_secs(600)).await.unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.get(LATEST_KEY).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_after_processing_record_lapsed_restores_it() {
        let cache = StatusCache::in_memory();
        let job = Uuid::new_v4();
        cache.mark_processing(job).await.unwrap();
        cache.promote_latest(job).await.unwrap();

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        assert!(cache.record_for(job).await.unwrap().is_none());

        // The worker writes processing again when it claims the job.
        cache.mark_processing(job).await.unwrap();
        tokio::time::advance(Duration::from_secs(25 * 60)).await;
        assert_eq!(
            cache.record_for(job).await.unwrap(),
            Some(StatusRecord::processing())
        );

        cache.mark_completed(job, "<p>late</p>".to_string()).await.unwrap();
        tokio::time::advance(Duration::from_secs(59 * 60)).await;
        assert_eq!(
            cache.latest().await.unwrap(),
            StatusRecord::completed("<p>late</p>".to_string())
        );
    }

    #[tokio::test]
    async fn test_put_overwrites_previous_value() {
        let store = MemoryStatusStore::new();
        assert_ok!(store.put("k", "old", Duration::from_secs(60)).await);
        assert_ok!(store.put("k", "new", Duration::from_secs(60)).await);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }
}

use serde::Deserialize;
use std::time::Duration;

/// Where uploaded images and rendered reports are persisted.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local public directory served under `/storage`.
    #[default]
    Local,
    /// Cloudflare R2 (S3-compatible) bucket.
    R2,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Full `generateContent` endpoint URL of the AI provider
    pub gemini_api_url: String,

    /// AI provider API key
    pub gemini_api_key: String,

    /// Timeout for text-only generation calls
    #[serde(default = "default_text_timeout_secs")]
    pub gemini_text_timeout_secs: u64,

    /// Timeout for multimodal calls carrying images
    #[serde(default = "default_image_timeout_secs")]
    pub gemini_image_timeout_secs: u64,

    /// Language the model is asked to answer in
    #[serde(default = "default_response_language")]
    pub response_language: String,

    /// Redis connection string. When absent, status and jobs stay in-process.
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// Root directory of the local public disk
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Externally visible base URL of this server, used to build image URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// R2 bucket name
    #[serde(default)]
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    #[serde(default)]
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    #[serde(default)]
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    #[serde(default)]
    pub r2_secret_key: Option<String>,

    /// Public base URL of the R2 bucket
    #[serde(default)]
    pub r2_public_url: Option<String>,

    /// Per-image upload limit in bytes
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Whole request body limit in bytes
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Concurrent diagnosis jobs in the embedded worker pool
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Sleep between empty queue polls in the worker binary
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_text_timeout_secs() -> u64 {
    60
}

fn default_image_timeout_secs() -> u64 {
    300
}

fn default_response_language() -> String {
    "Bangla".to_string()
}

fn default_storage_dir() -> String {
    "storage/public".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_image_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_max_request_bytes() -> usize {
    40 * 1024 * 1024
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

/// R2 settings, present only when `STORAGE_BACKEND=r2`.
#[derive(Debug, Clone)]
pub struct R2Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub public_url: &'a str,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.check()?;
        Ok(config)
    }

    /// Build from explicit key/value pairs (upper-case env names).
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(pairs)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.storage_backend == StorageBackend::R2 {
            self.r2_settings()?;
        }
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Invalid("WORKER_CONCURRENCY must be at least 1"));
        }
        Ok(())
    }

    pub fn r2_settings(&self) -> Result<R2Settings<'_>, ConfigError> {
        Ok(R2Settings {
            bucket: self.r2_bucket.as_deref().ok_or(ConfigError::Missing("R2_BUCKET"))?,
            endpoint: self
                .r2_endpoint
                .as_deref()
                .ok_or(ConfigError::Missing("R2_ENDPOINT"))?,
            access_key: self
                .r2_access_key
                .as_deref()
                .ok_or(ConfigError::Missing("R2_ACCESS_KEY"))?,
            secret_key: self
                .r2_secret_key
                .as_deref()
                .ok_or(ConfigError::Missing("R2_SECRET_KEY"))?,
            public_url: self
                .r2_public_url
                .as_deref()
                .ok_or(ConfigError::Missing("R2_PUBLIC_URL"))?,
        })
    }

    pub fn text_timeout(&self) -> Duration {
        Duration::from_secs(self.gemini_text_timeout_secs)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.gemini_image_timeout_secs)
    }

    /// Public URL prefix for files on the local disk.
    pub fn local_public_base(&self) -> String {
        format!("{}/storage", self.public_base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid setting: {0}")]
    Invalid(&'static str),
}

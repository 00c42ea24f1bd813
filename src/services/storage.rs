use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::{AppConfig, StorageBackend};

/// Durable storage for uploaded images and rendered reports.
///
/// Paths are relative, `/`-separated keys such as `uploads/<uuid>.png`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// URL under which a stored path is publicly reachable.
    fn public_url(&self, path: &str) -> String;

    async fn health_check(&self) -> Result<(), StorageError>;
}

/// Build the configured store.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    match config.storage_backend {
        StorageBackend::Local => Ok(Arc::new(LocalDisk::new(
            &config.storage_dir,
            &config.local_public_base(),
        ))),
        StorageBackend::R2 => {
            let r2 = config
                .r2_settings()
                .map_err(|e| StorageError::Config(e.to_string()))?;
            Ok(Arc::new(R2Client::new(
                r2.bucket,
                r2.endpoint,
                r2.access_key,
                r2.secret_key,
                r2.public_url,
            )?))
        }
    }
}

/// Public directory on the local filesystem.
pub struct LocalDisk {
    root: PathBuf,
    public_base: String,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>, public_base: &str) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalDisk {
    async fn put(&self, path: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let full_path = self.full_path(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a uniquely named sibling temp file, then rename into place.
        let file_name = full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = full_path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &full_path).await?;

        tracing::debug!(path, size = data.len(), "Stored blob on local disk");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base, path)
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).await?;
        let metadata = fs::metadata(&self.root).await?;
        if metadata.permissions().readonly() {
            return Err(StorageError::Config(format!(
                "{} is read-only",
                self.root.display()
            )));
        }
        Ok(())
    }
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
    public_base: String,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for R2Client {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(path, data, content_type)
            .await?;
        match response.status_code() {
            200..=299 => Ok(()),
            code => Err(StorageError::Status(code)),
        }
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let response = match self.bucket.get_object(path).await {
            Ok(response) => response,
            Err(S3Error::HttpFailWithBody(404, _)) => {
                return Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(StorageError::S3(e)),
        };
        match response.status_code() {
            200..=299 => Ok(response.to_vec()),
            404 => Err(StorageError::NotFound(path.to_string())),
            code => Err(StorageError::Status(code)),
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base, path)
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        match self.bucket.get_object(".health-check").await {
            Ok(response) if response.status_code() < 500 && response.status_code() != 403 => Ok(()),
            Ok(response) => Err(StorageError::Status(response.status_code())),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(()),
            Err(e) => Err(StorageError::S3(e)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("S3 request returned HTTP {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

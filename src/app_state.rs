use std::sync::Arc;

use crate::services::{
    gemini::GeminiClient, queue::JobDispatcher, status::StatusCache, storage::BlobStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GeminiClient>,
    pub blobs: Arc<dyn BlobStore>,
    pub status: StatusCache,
    pub queue: Arc<dyn JobDispatcher>,
    pub language: Arc<str>,
    pub max_image_bytes: usize,
    pub max_request_bytes: usize,
}

impl AppState {
    pub fn new(
        gateway: Arc<GeminiClient>,
        blobs: Arc<dyn BlobStore>,
        status: StatusCache,
        queue: Arc<dyn JobDispatcher>,
        language: &str,
    ) -> Self {
        Self {
            gateway,
            blobs,
            status,
            queue,
            language: Arc::from(language),
            max_image_bytes: 4 * 1024 * 1024,
            max_request_bytes: 40 * 1024 * 1024,
        }
    }

    pub fn with_limits(mut self, max_image_bytes: usize, max_request_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self.max_request_bytes = max_request_bytes;
        self
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An image persisted by the upload endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedImage {
    pub stored_path: String,
    pub public_url: String,
}

/// Response after submitting leaf images for diagnosis.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub uploaded_images: Vec<String>,
    /// Poll `/diagnosis-status/{job_id}` for this upload's result.
    pub job_id: Uuid,
}

use axum::body::Bytes;
use image::ImageFormat;
use uuid::Uuid;

use crate::models::upload::UploadedImage;
use crate::services::storage::{BlobStore, StorageError};

/// A file part received on the upload endpoint, not yet checked.
#[derive(Debug, Clone)]
pub struct IncomingImage {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// An upload that passed every constraint.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub file_name: String,
    pub format: ImageFormat,
    pub data: Bytes,
}

/// Check every file before anything is stored.
///
/// Each file must fit in `max_bytes`, be declared as `image/*` and carry the
/// signature of a recognised image format.
pub fn validate_images(
    files: Vec<IncomingImage>,
    max_bytes: usize,
) -> Result<Vec<ValidatedImage>, UploadError> {
    if files.is_empty() {
        return Err(UploadError::NoImages);
    }

    files
        .into_iter()
        .map(|file| {
            if file.data.len() > max_bytes {
                return Err(UploadError::TooLarge {
                    file: file.file_name,
                    limit_kb: max_bytes / 1024,
                });
            }
            if !file.content_type.starts_with("image/") {
                return Err(UploadError::NotAnImage {
                    file: file.file_name,
                    content_type: file.content_type,
                });
            }
            let format = image::guess_format(&file.data).map_err(|_| {
                UploadError::UnrecognizedFormat {
                    file: file.file_name.clone(),
                }
            })?;
            Ok(ValidatedImage {
                file_name: file.file_name,
                format,
                data: file.data,
            })
        })
        .collect()
}

/// Persist images as `uploads/<uuid>.<ext>` and record their public URLs.
pub async fn store_images(
    store: &dyn BlobStore,
    images: &[ValidatedImage],
) -> Result<Vec<UploadedImage>, StorageError> {
    let mut uploaded = Vec::with_capacity(images.len());
    for image in images {
        let extension = image.format.extensions_str().first().copied().unwrap_or("img");
        let stored_path = format!("uploads/{}.{}", Uuid::new_v4(), extension);
        store
            .put(&stored_path, &image.data, image.format.to_mime_type())
            .await?;

        tracing::debug!(
            original = %image.file_name,
            stored_path = %stored_path,
            size = image.data.len(),
            "Stored uploaded image"
        );

        uploaded.push(UploadedImage {
            public_url: store.public_url(&stored_path),
            stored_path,
        });
    }
    Ok(uploaded)
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("images: at least one image is required")]
    NoImages,

    #[error("images: {file} exceeds the {limit_kb} KB limit")]
    TooLarge { file: String, limit_kb: usize },

    #[error("images: {file} must be an image (got {content_type:?})")]
    NotAnImage { file: String, content_type: String },

    #[error("images: {file} is not a recognised image format")]
    UnrecognizedFormat { file: String },
}

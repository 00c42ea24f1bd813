use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::PathRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{DiagnosisJob, StatusRecord};
use crate::models::upload::UploadResponse;
use crate::routes::error::ApiError;
use crate::services::upload::{self, IncomingImage};

const IMAGE_FIELDS: [&str; 2] = ["images[]", "images"];

/// POST /disease: store leaf images and queue a diagnosis.
///
/// Responds as soon as the job is queued; the result is polled through the
/// status endpoints.
pub async fn upload_images(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if !field.name().is_some_and(|name| IMAGE_FIELDS.contains(&name)) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(multipart_error)?;

        // Browsers send an empty part when no file was picked.
        if file_name.is_empty() && data.is_empty() {
            continue;
        }
        files.push(IncomingImage {
            file_name,
            content_type,
            data,
        });
    }

    let images = upload::validate_images(files, state.max_image_bytes)?;
    let uploaded = upload::store_images(state.blobs.as_ref(), &images).await?;

    let job = DiagnosisJob::new(uploaded.iter().map(|u| u.stored_path.clone()).collect());
    state.status.mark_processing(job.job_id).await?;
    state.status.promote_latest(job.job_id).await?;

    if let Err(e) = state.queue.dispatch(&job).await {
        tracing::error!(job_id = %job.job_id, error = %e, "Failed to queue diagnosis job");
        state.status.mark_failed(job.job_id, &e).await?;
        return Err(ApiError::Unavailable(format!(
            "diagnosis queue unavailable: {e}"
        )));
    }

    tracing::info!(
        job_id = %job.job_id,
        images = uploaded.len(),
        "Diagnosis job queued"
    );

    Ok(Json(UploadResponse {
        uploaded_images: uploaded.into_iter().map(|u| u.public_url).collect(),
        job_id: job.job_id,
    }))
}

/// GET /diagnosis-status: status of the most recent upload.
pub async fn latest_status(
    State(state): State<AppState>,
) -> Result<Json<StatusRecord>, ApiError> {
    Ok(Json(state.status.latest().await?))
}

/// GET /diagnosis-status/{job_id}: status of one upload.
pub async fn job_status(
    State(state): State<AppState>,
    job_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<StatusRecord>, ApiError> {
    let Path(job_id) = job_id.map_err(|_| ApiError::BadRequest("invalid job id".to_string()))?;

    state
        .status
        .record_for(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("unknown or expired job".to_string()))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::TooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

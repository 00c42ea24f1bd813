use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::recommendation::{RecommendationRequest, RecommendationResponse};
use crate::routes::error::ApiError;
use crate::services::recommend;

/// POST /api/recommend-crop: ask the AI provider for three crop suggestions.
pub async fn recommend_crop(
    State(state): State<AppState>,
    payload: Result<Json<RecommendationRequest>, JsonRejection>,
) -> Result<Json<RecommendationResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| match rejection {
        JsonRejection::JsonDataError(e) => ApiError::Validation(e.body_text()),
        other => ApiError::BadRequest(other.body_text()),
    })?;

    request
        .validate()
        .map_err(|report| ApiError::Validation(report.to_string()))?;

    let prompt = recommend::build_prompt(&request, &state.language);

    tracing::info!(
        soil_type = request.soil_type.as_deref().unwrap_or_default(),
        location = request.location.as_deref().unwrap_or("N/A"),
        "Requesting crop recommendation"
    );

    let suggestions = state.gateway.generate_text(&prompt).await.map_err(|e| {
        tracing::error!(error = %e, "Crop recommendation failed");
        ApiError::Upstream(format!("AI service failed: {}", e.upstream_detail()))
    })?;

    Ok(Json(RecommendationResponse { suggestions }))
}

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use types::pixel::{PixelRequest, PixelUpdate};

pub async fn submit_pixel(
    State(state): State<AppState>,
    payload: Result<Json<PixelRequest>, JsonRejection>,
) -> Result<Json<PixelUpdate>, AppError> {
    // Malformed bodies answer 400 like any other invalid pixel.
    let Json(request) = payload.map_err(|rejection| {
        state.metrics.record_invalid();
        tracing::debug!(error = %rejection.body_text(), "Rejected malformed pixel body");
        AppError::BadRequest("Invalid JSON".to_string())
    })?;

    let update = state.ingestor.submit(request).await?;
    Ok(Json(update))
}

use crate::error::AppError;
use crate::state::AppState;
use anyhow::Context;
use axum::{Json, extract::State};
use types::pixel::PixelUpdate;

/// Every painted pixel, oldest first.
pub async fn get_canvas(State(state): State<AppState>) -> Result<Json<Vec<PixelUpdate>>, AppError> {
    let store = state.store.clone();
    let pixels = tokio::task::spawn_blocking(move || store.load_all())
        .await
        .context("canvas load task failed")?
        .context("failed to retrieve canvas state")?;
    Ok(Json(pixels))
}

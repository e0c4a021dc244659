use crate::metrics::MetricsSnapshot;
use crate::state::AppState;
use axum::{Json, extract::State};

pub async fn health() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics_snapshot())
}

use crate::handlers::{canvas, health, pixel, ws};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/pixel", post(pixel::submit_pixel))
        .route("/canvas", get(canvas::get_canvas));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws/queue", get(ws::ws_handler))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use crate::connection::Connection;
use crate::state::AppState;
use axum::{
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
};
use futures::stream::StreamExt;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        Connection::new(state.hub.clone(), state.connection.clone())
            .run(sink, stream)
            .await;
    })
}

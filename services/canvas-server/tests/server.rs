//! HTTP handlers through the router, and end-to-end delivery over a real
//! WebSocket.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use canvas_server::{CanvasServer, ServerConfig};
use futures::StreamExt;
use persistence::{CanvasStore, JournalStore, MemoryStore, StoreConfig};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tower::ServiceExt;

fn start() -> CanvasServer {
    CanvasServer::start(&ServerConfig::default(), Arc::new(MemoryStore::new()))
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn post_pixel(body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/pixel")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let server = start();
    let (status, _, body) = call(&server.router(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn pixel_outcomes_map_to_status_codes() {
    let server = start();
    let app = server.router();

    let (status, _, body) = call(
        &app,
        post_pixel(json!({"x": 10, "y": 20, "color": "#ff0000", "userId": "alice"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let accepted = json_body(&body);
    assert_eq!(accepted["color"], "#FF0000");
    assert_eq!(accepted["userId"], "alice");
    assert!(accepted["timestamp"].as_i64().unwrap() > 0);

    let (status, headers, body) = call(
        &app,
        post_pixel(json!({"x": 11, "y": 20, "color": "#ff0000", "userId": "alice"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(&body)["error"], "RATE_LIMIT_EXCEEDED");
    let retry: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!((1..=5).contains(&retry));

    let (status, _, body) = call(&app, post_pixel("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(&body),
        json!({"error": "BAD_REQUEST", "message": "Invalid JSON"})
    );

    let (status, _, body) = call(
        &app,
        post_pixel(json!({"x": 1000, "y": 0, "color": "#ff0000", "userId": "bob"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["message"], "x coordinate must be between 0 and 999");

    let (status, _, _) = call(
        &app,
        post_pixel(json!({"x": 0, "y": 0, "color": "red", "userId": "bob"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Rejected requests never consumed bob's cooldown.
    let (status, _, _) = call(
        &app,
        post_pixel(json!({"x": 0, "y": 0, "color": "#00ff00", "userId": "bob"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = call(&app, get("/metrics")).await;
    let metrics = json_body(&body);
    assert_eq!(metrics["updates_accepted"], 2);
    assert_eq!(metrics["updates_rate_limited"], 1);
    assert_eq!(metrics["updates_invalid"], 3);
    assert_eq!(metrics["tracked_identities"], 2);
}

#[tokio::test]
async fn canvas_reflects_accepted_pixels() {
    let server = start();
    let app = server.router();

    let (status, _, body) = call(&app, get("/api/canvas")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!([]));

    for (x, user) in [(3, "carol"), (4, "dave")] {
        let (status, _, _) = call(
            &app,
            post_pixel(json!({"x": x, "y": 0, "color": "#0000FF", "userId": user}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, _, body) = call(&app, get("/api/canvas")).await;
    let pixels = json_body(&body);
    let pixels = pixels.as_array().unwrap();
    assert_eq!(pixels.len(), 2);
    assert_eq!(pixels[0]["userId"], "carol");
    assert_eq!(pixels[1]["userId"], "dave");
}

#[tokio::test]
async fn ingestion_is_refused_after_shutdown() {
    let server = start();
    let app = server.router();
    server.shutdown().await;

    let (status, _, body) = call(
        &app,
        post_pixel(json!({"x": 0, "y": 0, "color": "#000000", "userId": "erin"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(&body)["error"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn accepted_pixels_survive_restart_with_journal_store() {
    let tmp = TempDir::new().unwrap();
    {
        let store: Arc<dyn CanvasStore> =
            Arc::new(JournalStore::open(StoreConfig::new(tmp.path())).unwrap());
        let server = CanvasServer::start(&ServerConfig::default(), store);
        let (status, _, _) = call(
            &server.router(),
            post_pixel(json!({"x": 9, "y": 9, "color": "#abcdef", "userId": "frank"}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        server.shutdown().await;
    }

    let store = JournalStore::open(StoreConfig::new(tmp.path())).unwrap();
    let pixels = store.load_all().unwrap();
    assert_eq!(pixels.len(), 1);
    assert_eq!(pixels[0].color.as_str(), "#ABCDEF");
}

async fn serve(server: &CanvasServer) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server.router();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn wait_for_connections(server: &CanvasServer, n: usize) {
    timeout(Duration::from_secs(5), async {
        while server.state().hub.connection_count().await.unwrap() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn websocket_receives_alice_and_bob_in_order() {
    let server = start();
    let addr = serve(&server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/queue"))
        .await
        .unwrap();
    wait_for_connections(&server, 1).await;

    let app = server.router();
    let (status, _, _) = call(
        &app,
        post_pixel(json!({"x": 0, "y": 0, "color": "#FF0000", "userId": "alice"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = call(
        &app,
        post_pixel(json!({"x": 1, "y": 1, "color": "#00FF00", "userId": "bob"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mut updates = Vec::new();
    while updates.len() < 2 {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let WsMessage::Text(text) = frame {
            let batch: Vec<Value> = serde_json::from_str(text.as_str()).unwrap();
            updates.extend(batch);
        }
    }

    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0]["userId"], "alice");
    assert_eq!(updates[0]["color"], "#FF0000");
    assert_eq!(updates[1]["userId"], "bob");
    assert_eq!(updates[1]["x"], 1);
    assert!(updates[0]["timestamp"].as_i64().unwrap() <= updates[1]["timestamp"].as_i64().unwrap());
}

#[tokio::test]
async fn shutdown_closes_websocket_and_client_close_unregisters() {
    let server = start();
    let addr = serve(&server).await;

    let (mut first, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/queue"))
        .await
        .unwrap();
    let (mut second, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/queue"))
        .await
        .unwrap();
    wait_for_connections(&server, 2).await;

    first.close(None).await.unwrap();
    wait_for_connections(&server, 1).await;

    server.shutdown().await;
    let closed = timeout(Duration::from_secs(5), async {
        while let Some(frame) = second.next().await {
            match frame {
                Ok(WsMessage::Close(_)) | Err(_) => return true,
                Ok(_) => {}
            }
        }
        true
    })
    .await
    .unwrap();
    assert!(closed);
}

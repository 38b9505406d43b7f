mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use common::{station, Harness, Setup};
use openradio_proto::media_id;
use openradio_proto::protocol::{MediaEntry, PlaybackState, SessionState};
use openradio_service::http;
use tower::ServiceExt;

async fn call(h: &Harness, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = http::router(h.handle.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_state_endpoint_returns_session() {
    let h = Harness::start(Setup::default()).await;
    let (status, body) = call(&h, Method::GET, "/api/state").await;
    assert_eq!(status, StatusCode::OK);
    let state: SessionState = serde_json::from_slice(&body).unwrap();
    assert_eq!(state.playback.state, PlaybackState::None);

    h.shutdown().await;
}

#[tokio::test]
async fn test_browse_then_play_over_http() {
    let h = Harness::start(Setup {
        favorites: vec![station(5, "Five")],
        ..Setup::default()
    })
    .await;

    let (status, body) = call(&h, Method::GET, &format!("/api/browse/{}", media_id::FAVORITES)).await;
    assert_eq!(status, StatusCode::OK);
    let entries: Vec<MediaEntry> = serde_json::from_slice(&body).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].media_id, "5");

    let (status, _) = call(&h, Method::POST, "/api/play/5").await;
    assert_eq!(status, StatusCode::OK);
    h.wait_for(|s| s.playback.state == PlaybackState::Buffering)
        .await;

    let (status, _) = call(&h, Method::GET, "/api/stop").await;
    assert_eq!(status, StatusCode::OK);
    h.wait_for(|s| s.playback.state == PlaybackState::Stopped)
        .await;

    h.shutdown().await;
}

#[tokio::test]
async fn test_browse_is_read_only() {
    let h = Harness::start(Setup::default()).await;
    let (status, _) = call(&h, Method::POST, "/api/browse/__ROOT__").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    h.shutdown().await;
}

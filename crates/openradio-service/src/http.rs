use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use openradio_proto::protocol::{Command, MediaEntry, SessionState};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::handle::{Browsable, PlaybackControllable, ServiceHandle};

#[derive(Clone)]
struct HttpState {
    handle: ServiceHandle,
}

pub fn start_server(bind_address: String, port: u16, handle: ServiceHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, router(handle)).await {
            error!("HTTP server error: {}", e);
        }
    })
}

pub fn router(handle: ServiceHandle) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/play", get(play).post(play))
        .route("/api/play/:media_id", get(play_media_id).post(play_media_id))
        .route("/api/pause", get(pause).post(pause))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/next", get(next).post(next))
        .route("/api/prev", get(prev).post(prev))
        .route("/api/favorite", get(favorite).post(favorite))
        .route("/api/search/:query", get(search).post(search))
        .route("/api/browse/:parent_id", get(browse))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { handle })
}

async fn get_state(State(state): State<HttpState>) -> Json<SessionState> {
    Json(state.handle.state().await)
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.handle.send_command(cmd).await.is_err() {
        error!("Failed to send command, service is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Play).await
}

async fn play_media_id(State(state): State<HttpState>, Path(media_id): Path<String>) -> StatusCode {
    send(&state, Command::PlayFromMediaId { media_id }).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Pause).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Stop).await
}

async fn next(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::SkipToNext).await
}

async fn prev(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::SkipToPrevious).await
}

async fn favorite(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: toggle favorite");
    if state.handle.toggle_favorite().await.is_err() {
        error!("Failed to send favorite toggle");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn search(State(state): State<HttpState>, Path(query): Path<String>) -> StatusCode {
    send(&state, Command::PlayFromSearch { query }).await
}

async fn browse(
    State(state): State<HttpState>,
    Path(parent_id): Path<String>,
) -> Result<Json<Vec<MediaEntry>>, StatusCode> {
    info!("HTTP API: browse {}", parent_id);
    match state.handle.load_children(&parent_id).await {
        Ok(entries) => Ok(Json(entries)),
        Err(e) => {
            error!("Browse of {} failed: {}", parent_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

mod common;

use axum::http::header;
use axum::routing::get;
use axum::Router;
use common::{Harness, Setup};
use openradio_proto::media_id;
use openradio_proto::protocol::PlaybackState;
use openradio_proto::station::{MediaStream, Station};
use openradio_service::engine::{EngineError, EngineEvent};
use openradio_service::handle::{Browsable, PlaybackControllable};
use openradio_service::metadata;
use tokio::net::TcpListener;

/// Serves a PLS playlist at `/listen.pls` and an empty one at `/empty.pls`.
async fn playlist_server() -> String {
    let app = Router::new()
        .route(
            "/listen.pls",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "audio/x-scpls")],
                    "[playlist]\nNumberOfEntries=2\nFile1=http://relay.test/live\nFile2=http://relay.test/backup\n",
                )
            }),
        )
        .route(
            "/empty.pls",
            get(|| async { ([(header::CONTENT_TYPE, "audio/x-scpls")], "[playlist]\n") }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    // Local server must not go through a proxy from the environment
    std::env::set_var("NO_PROXY", "127.0.0.1");
    std::env::set_var("no_proxy", "127.0.0.1");
    format!("http://{addr}")
}

fn station_at(id: u32, url: String) -> Station {
    Station {
        id,
        name: format!("Playlist {id}"),
        media_stream: MediaStream::with_variant(128, url),
        ..Station::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrecognized_format_replays_first_playlist_entry() {
    let base = playlist_server().await;
    let h = Harness::start(Setup {
        favorites: vec![station_at(1, format!("{base}/listen.pls"))],
        ..Setup::default()
    })
    .await;
    h.handle.load_children(media_id::FAVORITES).await.unwrap();

    h.handle.play_from_media_id("1").await.unwrap();
    h.wait_for(|s| s.playback.state == PlaybackState::Buffering)
        .await;
    h.emit(EngineEvent::Error(EngineError::UnrecognizedFormat(
        "unrecognized file format".into(),
    )))
    .await;

    h.wait_for_engine(|log| log.calls.iter().any(|c| c == "prepare http://relay.test/live"))
        .await;
    let calls = h.engine_calls();
    assert!(calls.contains(&"release".to_string()));
    assert_eq!(calls.iter().filter(|c| *c == "create").count(), 2);
    assert!(!calls.iter().any(|c| c == "prepare http://relay.test/backup"));

    h.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_playlist_without_entries_is_a_player_error() {
    let base = playlist_server().await;
    let h = Harness::start(Setup {
        favorites: vec![station_at(2, format!("{base}/empty.pls"))],
        ..Setup::default()
    })
    .await;
    h.handle.load_children(media_id::FAVORITES).await.unwrap();

    h.handle.play_from_media_id("2").await.unwrap();
    h.wait_for(|s| s.playback.state == PlaybackState::Buffering)
        .await;
    h.emit(EngineEvent::Error(EngineError::UnrecognizedFormat(
        "unrecognized file format".into(),
    )))
    .await;

    let state = h
        .wait_for(|s| s.playback.state == PlaybackState::Error)
        .await;
    assert_eq!(
        state.playback.error.as_deref(),
        Some(metadata::MEDIA_PLAYER_ERROR)
    );
    assert_eq!(h.engine_calls().iter().filter(|c| *c == "create").count(), 1);

    h.shutdown().await;
}

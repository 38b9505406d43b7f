//! Client-side handle onto a running `ServiceCore`.
//!
//! Every call only enqueues a `ServiceEvent`; results come back through the
//! session update channel, except browse requests which are answered directly.

use std::future::Future;
use std::sync::Arc;

use openradio_proto::media_id;
use openradio_proto::protocol::{Command, MediaEntry, SessionState, FAVORITE_ACTION};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::core::ServiceEvent;
use crate::error::{Result, ServiceError};
use crate::session::{SessionStore, SessionUpdate};

/// Browse side of the media session.
pub trait Browsable {
    /// Register the client kind and list the top level of the tree.
    fn get_root(&self, car_mode: bool, restore: bool)
        -> impl Future<Output = Result<Vec<MediaEntry>>> + Send;

    fn load_children(&self, parent_id: &str) -> impl Future<Output = Result<Vec<MediaEntry>>> + Send;
}

/// Transport controls of the media session.
pub trait PlaybackControllable {
    fn send_command(&self, cmd: Command) -> impl Future<Output = Result<()>> + Send;

    fn play(&self) -> impl Future<Output = Result<()>> + Send {
        self.send_command(Command::Play)
    }

    fn play_from_media_id(&self, media_id: &str) -> impl Future<Output = Result<()>> + Send {
        self.send_command(Command::PlayFromMediaId {
            media_id: media_id.to_string(),
        })
    }

    fn play_from_search(&self, query: &str) -> impl Future<Output = Result<()>> + Send {
        self.send_command(Command::PlayFromSearch {
            query: query.to_string(),
        })
    }

    fn pause(&self) -> impl Future<Output = Result<()>> + Send {
        self.send_command(Command::Pause)
    }

    fn stop(&self) -> impl Future<Output = Result<()>> + Send {
        self.send_command(Command::Stop)
    }

    fn skip_to_next(&self) -> impl Future<Output = Result<()>> + Send {
        self.send_command(Command::SkipToNext)
    }

    fn skip_to_previous(&self) -> impl Future<Output = Result<()>> + Send {
        self.send_command(Command::SkipToPrevious)
    }

    fn skip_to_queue_item(&self, queue_id: u64) -> impl Future<Output = Result<()>> + Send {
        self.send_command(Command::SkipToQueueItem { queue_id })
    }

    fn toggle_favorite(&self) -> impl Future<Output = Result<()>> + Send {
        self.send_command(Command::CustomAction {
            action: FAVORITE_ACTION.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct ServiceHandle {
    event_tx: mpsc::Sender<ServiceEvent>,
    updates: broadcast::Sender<SessionUpdate>,
    session: Arc<SessionStore>,
}

impl ServiceHandle {
    pub fn new(
        event_tx: mpsc::Sender<ServiceEvent>,
        updates: broadcast::Sender<SessionUpdate>,
        session: Arc<SessionStore>,
    ) -> Self {
        Self {
            event_tx,
            updates,
            session,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn session(&self) -> Arc<SessionStore> {
        Arc::clone(&self.session)
    }

    pub async fn state(&self) -> SessionState {
        self.session.get_state().await
    }

    pub async fn send_event(&self, event: ServiceEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| ServiceError::ServiceGone)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send_event(ServiceEvent::Shutdown).await
    }
}

impl Browsable for ServiceHandle {
    async fn get_root(&self, car_mode: bool, restore: bool) -> Result<Vec<MediaEntry>> {
        self.send_command(Command::GetRoot { car_mode, restore })
            .await?;
        self.load_children(media_id::ROOT).await
    }

    async fn load_children(&self, parent_id: &str) -> Result<Vec<MediaEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send_event(ServiceEvent::LoadChildren {
            parent_id: parent_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ServiceError::ServiceGone)
    }
}

impl PlaybackControllable for ServiceHandle {
    async fn send_command(&self, cmd: Command) -> Result<()> {
        self.send_event(ServiceEvent::ClientCommand(cmd)).await
    }
}

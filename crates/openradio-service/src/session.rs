//! Published media-session state and the updates fanned out to clients.

use std::sync::Arc;

use openradio_proto::protocol::{MediaEntry, SessionState};
use tokio::sync::RwLock;

/// Everything the core announces to connected clients.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// `SessionState` changed; read the new snapshot from the store.
    StateUpdated,
    Children {
        parent_id: String,
        entries: Vec<MediaEntry>,
    },
    ChildrenChanged {
        parent_id: String,
    },
    /// Non-fatal user-facing message.
    Notice(String),
    /// An operation was refused (no connectivity, bad input).
    Error(String),
    Location(String),
    Idle,
    Log(String),
}

/// Session snapshot shared between the core (sole writer) and the client
/// servers (readers).
pub struct SessionStore {
    state: Arc<RwLock<SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState {
                rev: 1,
                ..SessionState::default()
            })),
        }
    }

    pub async fn get_state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Apply `f` and bump the revision.  Returns the new revision.
    pub async fn update(&self, f: impl FnOnce(&mut SessionState)) -> u64 {
        let mut state = self.state.write().await;
        f(&mut state);
        state.rev += 1;
        state.rev
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openradio_proto::protocol::PlaybackState;

    #[tokio::test]
    async fn test_every_update_bumps_revision() {
        let store = SessionStore::new();
        assert_eq!(store.get_state().await.rev, 1);
        let rev = store
            .update(|s| s.playback.state = PlaybackState::Buffering)
            .await;
        assert_eq!(rev, 2);
        let state = store.get_state().await;
        assert_eq!(state.rev, 2);
        assert_eq!(state.playback.state, PlaybackState::Buffering);
    }
}

use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump when the wire format changes in a breaking
/// way; clients compare it against the `Hello` they receive on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Name of the custom session action that toggles the current station in and
/// out of the favorites.
pub const FAVORITE_ACTION: &str = "openradio.action.TOGGLE_FAVORITE";

/// Messages sent from a client to the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    // ── session transport controls ──
    Play,
    PlayFromMediaId { media_id: String },
    PlayFromSearch { query: String },
    Pause,
    Stop,
    SkipToNext,
    SkipToPrevious,
    SkipToQueueItem { queue_id: u64 },
    CustomAction { action: String },

    // ── browsing ──
    GetRoot {
        #[serde(default)]
        car_mode: bool,
        #[serde(default)]
        restore: bool,
    },
    LoadChildren { parent_id: String },

    // ── service control ──
    RequestLocation,
    UpdateFavorite { media_id: String, is_favorite: bool },
    AddLocal {
        name: String,
        url: String,
        #[serde(default)]
        image_url: String,
        #[serde(default)]
        genre: String,
        #[serde(default)]
        country: String,
        #[serde(default)]
        add_to_favorites: bool,
    },
    EditLocal {
        media_id: String,
        name: String,
        url: String,
        #[serde(default)]
        image_url: String,
        #[serde(default)]
        genre: String,
        #[serde(default)]
        country: String,
        #[serde(default)]
        add_to_favorites: bool,
    },
    RemoveLocal { media_id: String },
    UpdateSortIds {
        media_ids: Vec<String>,
        sort_ids: Vec<i32>,
        category_id: String,
    },
    ToggleLastPlayed,
    StopService,
    Backup,
    Restore,

    // ── platform signals ──
    AudioFocus { change: FocusChange },
    Connectivity { online: bool },
    AudioBecomingNoisy,
    SameDeviceConnected,
    MasterVolume { percent: u8 },

    GetState,
}

/// Audio focus transitions reported by the output device arbiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FocusChange {
    Gain,
    Loss,
    LossTransient,
    LossTransientCanDuck,
}

/// Messages sent from the service to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full state snapshot.
    Hello {
        protocol_version: u32,
        service_rev: u64,
        state: SessionState,
    },
    State {
        data: SessionState,
    },
    /// Reply to `LoadChildren`.
    Children {
        parent_id: String,
        entries: Vec<MediaEntry>,
    },
    ChildrenChanged {
        parent_id: String,
    },
    /// Non-fatal message for the user.
    Notice {
        message: String,
    },
    Location {
        country_code: String,
    },
    /// The service went idle and released its foreground resources.
    Idle,
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    None,
    Stopped,
    Paused,
    Buffering,
    Playing,
    Error,
}

impl PlaybackState {
    /// States in which the now-playing notification is shown.
    pub fn shows_notification(self) -> bool {
        matches!(
            self,
            PlaybackState::Buffering | PlaybackState::Playing | PlaybackState::Paused
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackAction {
    Play,
    PlayFromMediaId,
    PlayFromSearch,
    Pause,
    SkipToPrevious,
    SkipToNext,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FavoriteIcon {
    StarOn,
    StarOff,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomAction {
    pub action: String,
    pub name: String,
    pub icon: FavoriteIcon,
}

/// Playback state as published to the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub position_ms: u64,
    #[serde(default)]
    pub buffered_position_ms: u64,
    #[serde(default)]
    pub actions: Vec<PlaybackAction>,
    #[serde(default)]
    pub custom_action: Option<CustomAction>,
    #[serde(default)]
    pub active_queue_item_id: Option<u64>,
}

impl PlaybackSnapshot {
    pub fn allows(&self, action: PlaybackAction) -> bool {
        self.actions.contains(&action)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EntryKind {
    Browsable,
    Playable,
}

/// Side-channel flags carried by a browse entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EntryExtras {
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_last_played: bool,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub sort_id: Option<i32>,
}

/// One child of a browse tree node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaEntry {
    pub media_id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    pub kind: EntryKind,
    #[serde(default)]
    pub extras: EntryExtras,
}

impl MediaEntry {
    pub fn is_playable(&self) -> bool {
        self.kind == EntryKind::Playable
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueItem {
    pub queue_id: u64,
    pub media_id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

/// Metadata of the station on air.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NowPlaying {
    pub media_id: String,
    pub title: String,
    /// Stream title when the station announces one, the country otherwise.
    pub subtitle: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub website: String,
}

/// Full state of the media session.  `rev` increments on every change so
/// clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionState {
    #[serde(default)]
    pub rev: u64,
    pub playback: PlaybackSnapshot,
    #[serde(default)]
    pub now_playing: Option<NowPlaying>,
    #[serde(default)]
    pub queue_title: String,
    #[serde(default)]
    pub queue: Vec<QueueItem>,
    #[serde(default)]
    pub current_index: Option<usize>,
    #[serde(default)]
    pub notification_visible: bool,
    /// Network keep-alive held while a stream loads or plays.
    #[serde(default)]
    pub wifi_lock_held: bool,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    /// Frame as a 4-byte big-endian length followed by the JSON body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`, returning the message and
    /// the number of bytes consumed.
    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_shape() {
        let msg = Message::Command(Command::PlayFromMediaId {
            media_id: "42".into(),
        });
        let encoded = msg.encode().unwrap();
        let body: serde_json::Value = serde_json::from_slice(&encoded[4..]).unwrap();
        assert_eq!(body["cmd"], "PlayFromMediaId");
        assert_eq!(body["media_id"], "42");

        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::PlayFromMediaId { media_id }) => assert_eq!(media_id, "42"),
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_get_root_flags_default_to_false() {
        let (msg, _) = {
            let body = br#"{"cmd":"GetRoot"}"#;
            let mut framed = (body.len() as u32).to_be_bytes().to_vec();
            framed.extend_from_slice(body);
            Message::decode(&framed).unwrap()
        };
        match msg {
            Message::Command(Command::GetRoot { car_mode, restore }) => {
                assert!(!car_mode);
                assert!(!restore);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_hello_carries_state_revision() {
        let state = SessionState {
            rev: 42,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            service_rev: 42,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                service_rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(service_rev, 42);
                assert_eq!(state.playback.state, PlaybackState::None);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_partial_frame_is_rejected() {
        let encoded = Message::Command(Command::Pause).encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_notification_states() {
        assert!(PlaybackState::Buffering.shows_notification());
        assert!(PlaybackState::Paused.shows_notification());
        assert!(!PlaybackState::Stopped.shows_notification());
        assert!(!PlaybackState::Error.shows_notification());
    }
}

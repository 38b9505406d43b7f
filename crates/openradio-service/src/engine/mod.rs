//! Playback engine seam.
//!
//! The core drives an engine through `PlaybackEngine` (synchronous, cheap
//! calls that only enqueue work) and hears back through `EngineListener`,
//! whose events re-enter the core loop as `ServiceEvent::Engine`.

pub mod mpv;

use tokio::sync::mpsc;

use crate::core::ServiceEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The URL served something the engine cannot decode, typically a
    /// playlist file.
    UnrecognizedFormat(String),
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Buffering,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The prepared URL is loaded and can start.
    Prepared,
    StateChanged(EngineState),
    Error(EngineError),
    Progress {
        position_ms: u64,
        buffered_position_ms: u64,
    },
    /// In-stream (ICY) title changed.
    StreamTitle(Option<String>),
}

pub trait PlaybackEngine: Send + Sync {
    /// Start loading `url`.  Completion is reported with `EngineEvent::Prepared`.
    fn prepare(&mut self, url: &str);
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    /// Drop the current media so the engine can be prepared again.
    fn reset(&mut self);
    /// Tear the engine down.  No events are delivered afterwards.
    fn release(&mut self);
    /// Volume in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);
    fn is_playing(&self) -> bool;
}

/// Creates engines on demand; the core builds one lazily on the first play
/// and again after every release.
pub trait EngineFactory: Send + Sync {
    fn create(&mut self, listener: EngineListener) -> Box<dyn PlaybackEngine>;
}

/// Channel an engine reports through.  Tagged with the engine instance so the
/// core can drop events from an engine it already released.
#[derive(Clone)]
pub struct EngineListener {
    engine_id: u64,
    tx: mpsc::Sender<ServiceEvent>,
}

impl EngineListener {
    pub fn new(engine_id: u64, tx: mpsc::Sender<ServiceEvent>) -> Self {
        Self { engine_id, tx }
    }

    pub fn engine_id(&self) -> u64 {
        self.engine_id
    }

    /// Returns false once the core has shut down.
    pub async fn emit(&self, event: EngineEvent) -> bool {
        self.tx
            .send(ServiceEvent::Engine {
                engine_id: self.engine_id,
                event,
            })
            .await
            .is_ok()
    }
}

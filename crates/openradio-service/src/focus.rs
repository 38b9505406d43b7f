use openradio_proto::protocol::FocusChange;
use tracing::debug;

/// Whether the service may produce sound, and how loud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFocus {
    /// Another source owns the output; playback must pause.
    NoFocusNoDuck,
    /// Another source owns the output but we may keep playing quietly.
    NoFocusCanDuck,
    Focused,
}

impl AudioFocus {
    pub fn after(change: FocusChange) -> Self {
        match change {
            FocusChange::Gain => AudioFocus::Focused,
            FocusChange::LossTransientCanDuck => AudioFocus::NoFocusCanDuck,
            FocusChange::Loss | FocusChange::LossTransient => AudioFocus::NoFocusNoDuck,
        }
    }
}

/// Engine volume for the given focus, master volume percentage and duck factor.
pub fn volume_for(focus: AudioFocus, master_percent: u8, duck_factor: f32) -> f32 {
    let normal = f32::from(master_percent.min(100)) / 100.0;
    match focus {
        AudioFocus::NoFocusCanDuck => normal * duck_factor,
        _ => normal,
    }
}

/// Arbiter for the audio output.
pub trait AudioFocusManager: Send + Sync {
    /// Ask for focus; returns whether it was granted immediately.
    fn request(&mut self) -> bool;
    fn abandon(&mut self);
}

/// Focus manager for hosts where the service is the only audio source.
#[derive(Debug, Default)]
pub struct ExclusiveFocus {
    held: bool,
}

impl AudioFocusManager for ExclusiveFocus {
    fn request(&mut self) -> bool {
        if !self.held {
            debug!("focus: acquired");
        }
        self.held = true;
        true
    }

    fn abandon(&mut self) {
        if self.held {
            debug!("focus: abandoned");
        }
        self.held = false;
    }
}

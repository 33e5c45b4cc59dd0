//! Events that drive the audio state machine

use super::PreparedAudio;

/// Platform audio-focus notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Gained,
    Lost,
    LostTransient,
    LostTransientCanDuck,
}

#[derive(Debug, Clone)]
pub enum AudioEvent {
    // Caller events
    Play { url: String },
    Pause,
    Resume,
    Stop,
    Release,
    ClearError,

    // Engine events, tagged with the playback they belong to
    Prepared { play_id: u64, audio: PreparedAudio },
    EngineFailed { play_id: u64, message: String },
    Completed { play_id: u64 },

    // Platform events
    Focus(FocusChange),
}

impl AudioEvent {
    pub fn play_id(&self) -> Option<u64> {
        match self {
            Self::Prepared { play_id, .. }
            | Self::EngineFailed { play_id, .. }
            | Self::Completed { play_id } => Some(*play_id),
            _ => None,
        }
    }
}

//! Audio state types

use serde::{Deserialize, Serialize};

/// Output level while another source holds transient focus
pub const DUCK_VOLUME: f32 = 0.3;
pub const FULL_VOLUME: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioPhase {
    #[default]
    Idle,
    /// Asset is being fetched and prepared
    Loading,
    Playing,
    Paused,
}

/// Published view of playback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioState {
    pub playing: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub current_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioMachine {
    pub phase: AudioPhase,
    pub error: Option<String>,
    pub current_url: Option<String>,
    /// Generation of the current playback; engine callbacks carry it
    pub play_id: u64,
    pub ducked: bool,
}

impl AudioMachine {
    pub fn snapshot(&self) -> AudioState {
        AudioState {
            playing: self.phase == AudioPhase::Playing,
            loading: self.phase == AudioPhase::Loading,
            error: self.error.clone(),
            current_url: self.current_url.clone(),
        }
    }

    pub fn volume(&self) -> f32 {
        if self.ducked {
            DUCK_VOLUME
        } else {
            FULL_VOLUME
        }
    }

    /// Whether an engine task may be running for `play_id`
    pub fn has_output(&self) -> bool {
        self.phase != AudioPhase::Idle
    }
}

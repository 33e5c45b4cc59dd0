//! Effects produced by audio transitions

use super::PreparedAudio;

#[derive(Debug, Clone, PartialEq)]
pub enum AudioEffect {
    /// Cancel any in-flight preparation or output
    DisposeOutput,

    RequestFocus,
    AbandonFocus,

    /// Fetch and prepare `url`; reports `Prepared` or `EngineFailed`
    Prepare { play_id: u64, url: String },

    /// Start output; reports `Completed` or `EngineFailed`
    StartOutput { play_id: u64, audio: PreparedAudio },

    SetPaused(bool),

    /// Adjust output level without a state change
    SetVolume(f32),

    PublishState,
}

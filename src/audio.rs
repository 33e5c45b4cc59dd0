//! Audio controller state machine
//!
//! Playback, pause/resume and focus changes all flow through one pure
//! transition table. The runtime owns the engine and executes the effects.

mod effect;
pub mod engine;
pub mod event;
pub mod focus;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::AudioEffect;
pub use engine::{OutputControl, PlaybackEngine, PlaybackError, PreparedAudio};
pub use event::{AudioEvent, FocusChange};
pub use focus::AudioFocus;
pub use state::{AudioMachine, AudioPhase, AudioState, DUCK_VOLUME, FULL_VOLUME};
pub use transition::{transition, TransitionError, TransitionResult};

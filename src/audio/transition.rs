//! Pure state transition function for audio playback

use super::{AudioEffect, AudioEvent, AudioMachine, AudioPhase, FocusChange};
use super::FULL_VOLUME;
use thiserror::Error;

#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: AudioMachine,
    pub effects: Vec<AudioEffect>,
}

impl TransitionResult {
    pub fn new(state: AudioMachine) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: AudioEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Stale engine event for superseded playback {0}")]
    StalePlayback(u64),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(
    state: &AudioMachine,
    event: AudioEvent,
) -> Result<TransitionResult, TransitionError> {
    if let Some(play_id) = event.play_id() {
        if play_id != state.play_id {
            return Err(TransitionError::StalePlayback(play_id));
        }
    }

    match (state.phase, event) {
        // ============================================================
        // Caller events
        // ============================================================
        (_, AudioEvent::Play { url }) => {
            let mut next = state.clone();
            next.phase = AudioPhase::Loading;
            next.error = None;
            next.current_url = Some(url.clone());
            next.play_id += 1;
            let play_id = next.play_id;

            let mut result = TransitionResult::new(next);
            if state.has_output() {
                result = result.with_effect(AudioEffect::DisposeOutput);
            }
            Ok(result
                .with_effect(AudioEffect::PublishState)
                .with_effect(AudioEffect::RequestFocus)
                .with_effect(AudioEffect::Prepare { play_id, url }))
        }

        (AudioPhase::Playing, AudioEvent::Pause) => {
            let mut next = state.clone();
            next.phase = AudioPhase::Paused;
            Ok(TransitionResult::new(next)
                .with_effect(AudioEffect::SetPaused(true))
                .with_effect(AudioEffect::PublishState))
        }

        (AudioPhase::Paused, AudioEvent::Resume) => {
            let mut next = state.clone();
            next.phase = AudioPhase::Playing;
            Ok(TransitionResult::new(next)
                .with_effect(AudioEffect::SetPaused(false))
                .with_effect(AudioEffect::PublishState))
        }

        (_, AudioEvent::Stop | AudioEvent::Focus(FocusChange::Lost)) => {
            let mut next = state.clone();
            next.phase = AudioPhase::Idle;
            next.current_url = None;
            next.play_id += 1;
            Ok(TransitionResult::new(next)
                .with_effect(AudioEffect::DisposeOutput)
                .with_effect(AudioEffect::AbandonFocus)
                .with_effect(AudioEffect::PublishState))
        }

        (_, AudioEvent::Release) => {
            let next = AudioMachine {
                play_id: state.play_id + 1,
                ..AudioMachine::default()
            };
            Ok(TransitionResult::new(next)
                .with_effect(AudioEffect::DisposeOutput)
                .with_effect(AudioEffect::AbandonFocus)
                .with_effect(AudioEffect::SetVolume(FULL_VOLUME))
                .with_effect(AudioEffect::PublishState))
        }

        (_, AudioEvent::ClearError) => {
            let mut next = state.clone();
            next.error = None;
            Ok(TransitionResult::new(next).with_effect(AudioEffect::PublishState))
        }

        // ============================================================
        // Engine events
        // ============================================================
        (AudioPhase::Loading, AudioEvent::Prepared { play_id, audio }) => {
            let mut next = state.clone();
            next.phase = AudioPhase::Playing;
            Ok(TransitionResult::new(next)
                .with_effect(AudioEffect::StartOutput { play_id, audio })
                .with_effect(AudioEffect::PublishState))
        }

        (
            AudioPhase::Loading | AudioPhase::Playing | AudioPhase::Paused,
            AudioEvent::EngineFailed { message, .. },
        ) => {
            let mut next = state.clone();
            next.phase = AudioPhase::Idle;
            next.error = Some(message);
            Ok(TransitionResult::new(next)
                .with_effect(AudioEffect::DisposeOutput)
                .with_effect(AudioEffect::AbandonFocus)
                .with_effect(AudioEffect::PublishState))
        }

        (AudioPhase::Playing | AudioPhase::Paused, AudioEvent::Completed { .. }) => {
            let mut next = state.clone();
            next.phase = AudioPhase::Idle;
            Ok(TransitionResult::new(next)
                .with_effect(AudioEffect::DisposeOutput)
                .with_effect(AudioEffect::AbandonFocus)
                .with_effect(AudioEffect::PublishState))
        }

        // ============================================================
        // Focus
        // ============================================================
        (phase, AudioEvent::Focus(FocusChange::LostTransient)) => {
            if phase == AudioPhase::Playing {
                transition(state, AudioEvent::Pause)
            } else {
                Ok(TransitionResult::new(state.clone()))
            }
        }

        (_, AudioEvent::Focus(FocusChange::LostTransientCanDuck)) => {
            let mut next = state.clone();
            next.ducked = true;
            let level = next.volume();
            Ok(TransitionResult::new(next).with_effect(AudioEffect::SetVolume(level)))
        }

        // Level is restored; a transient pause stays paused
        (_, AudioEvent::Focus(FocusChange::Gained)) => {
            let mut next = state.clone();
            next.ducked = false;
            let level = next.volume();
            Ok(TransitionResult::new(next).with_effect(AudioEffect::SetVolume(level)))
        }

        // ============================================================
        // Invalid Transitions
        // ============================================================
        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {phase:?} with event {event:?}"
        ))),
    }
}

//! Property-based tests for the audio machine

use super::*;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Play(u8),
    Pause,
    Resume,
    Stop,
    Release,
    ClearError,
    Prepared { current: bool },
    Failed { current: bool },
    Completed { current: bool },
    Focus(FocusChange),
}

fn bind(step: &Step, state: &AudioMachine) -> AudioEvent {
    let play_id = |current: bool| {
        if current {
            state.play_id
        } else {
            state.play_id.wrapping_sub(1)
        }
    };
    match step {
        Step::Play(n) => AudioEvent::Play {
            url: format!("http://h:8000/static/tts/tts_{n}.mp3"),
        },
        Step::Pause => AudioEvent::Pause,
        Step::Resume => AudioEvent::Resume,
        Step::Stop => AudioEvent::Stop,
        Step::Release => AudioEvent::Release,
        Step::ClearError => AudioEvent::ClearError,
        Step::Prepared { current } => AudioEvent::Prepared {
            play_id: play_id(*current),
            audio: PreparedAudio::new("u", vec![0u8; 4]),
        },
        Step::Failed { current } => AudioEvent::EngineFailed {
            play_id: play_id(*current),
            message: "Playback failed: boom".to_string(),
        },
        Step::Completed { current } => AudioEvent::Completed {
            play_id: play_id(*current),
        },
        Step::Focus(change) => AudioEvent::Focus(*change),
    }
}

fn arb_focus() -> impl Strategy<Value = FocusChange> {
    prop_oneof![
        Just(FocusChange::Gained),
        Just(FocusChange::Lost),
        Just(FocusChange::LostTransient),
        Just(FocusChange::LostTransientCanDuck),
    ]
}

fn arb_step() -> impl Strategy<Value = Step> {
    let current = prop::bool::weighted(0.85);
    prop_oneof![
        3 => any::<u8>().prop_map(Step::Play),
        2 => Just(Step::Pause),
        2 => Just(Step::Resume),
        1 => Just(Step::Stop),
        1 => Just(Step::Release),
        1 => Just(Step::ClearError),
        3 => current.clone().prop_map(|current| Step::Prepared { current }),
        2 => current.clone().prop_map(|current| Step::Failed { current }),
        2 => current.prop_map(|current| Step::Completed { current }),
        2 => arb_focus().prop_map(Step::Focus),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn prop_never_playing_and_loading(steps in proptest::collection::vec(arb_step(), 0..40)) {
        let mut state = AudioMachine::default();
        for step in steps {
            let before = state.clone();
            match transition(&state, bind(&step, &state)) {
                Ok(result) => {
                    state = result.new_state;
                    let snap = state.snapshot();
                    prop_assert!(!(snap.playing && snap.loading), "{:?}", state);
                    prop_assert!(state.play_id >= before.play_id);
                    let starts = result
                        .effects
                        .iter()
                        .filter(|e| matches!(e, AudioEffect::StartOutput { .. } | AudioEffect::Prepare { .. }))
                        .count();
                    prop_assert!(starts <= 1);
                }
                Err(_) => prop_assert_eq!(&state, &before),
            }
        }
    }

    #[test]
    fn prop_stale_engine_events_rejected(steps in proptest::collection::vec(arb_step(), 0..20)) {
        let mut state = AudioMachine::default();
        for step in steps {
            if let Ok(result) = transition(&state, bind(&step, &state)) {
                state = result.new_state;
            }
        }
        for step in [
            Step::Prepared { current: false },
            Step::Failed { current: false },
            Step::Completed { current: false },
        ] {
            let result = transition(&state, bind(&step, &state));
            prop_assert!(matches!(result, Err(TransitionError::StalePlayback(_))));
        }
    }

    #[test]
    fn prop_release_always_resets(steps in proptest::collection::vec(arb_step(), 0..30)) {
        let mut state = AudioMachine::default();
        for step in steps {
            if let Ok(result) = transition(&state, bind(&step, &state)) {
                state = result.new_state;
            }
        }
        let released = transition(&state, AudioEvent::Release).unwrap();
        prop_assert_eq!(released.new_state.snapshot(), AudioState::default());
        prop_assert!(!released.new_state.ducked);
        prop_assert!(released.effects.contains(&AudioEffect::DisposeOutput));
    }

    #[test]
    fn prop_pause_resume_preserve_url_and_error(steps in proptest::collection::vec(arb_step(), 0..30)) {
        let mut state = AudioMachine::default();
        for step in steps {
            if let Ok(result) = transition(&state, bind(&step, &state)) {
                state = result.new_state;
            }
        }
        for event in [AudioEvent::Pause, AudioEvent::Resume] {
            if let Ok(result) = transition(&state, event) {
                prop_assert_eq!(&result.new_state.current_url, &state.current_url);
                prop_assert_eq!(&result.new_state.error, &state.error);
                state = result.new_state;
            }
        }
    }
}

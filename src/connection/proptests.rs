//! Property-based tests for the connection machine
//!
//! Events are generated as templates and bound to the live attempt/timer
//! generation at apply time, so both current and stale callbacks are covered.

use super::*;
use crate::config::Endpoint;
use proptest::prelude::*;
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> ConnContext {
    ConnContext::new(5, Duration::from_millis(10))
}

const VALID_FRAME: &str =
    r#"{"type":"learning_response","explanation":"x","tts_url":"tts_1.mp3"}"#;

#[derive(Debug, Clone)]
enum Step {
    Connect,
    Disconnect,
    ClearError,
    ClearResponse,
    Opened { current: bool },
    Frame { current: bool, valid: bool },
    Failed { current: bool },
    PeerClosing { current: bool, code: Option<u16> },
    Closed { current: bool, code: Option<u16> },
    TimerFired { current: bool },
}

fn bind(step: &Step, state: &ConnState) -> ConnEvent {
    let attempt = |current: bool| {
        if current {
            state.attempt
        } else {
            state.attempt.wrapping_sub(1)
        }
    };
    match step {
        Step::Connect => ConnEvent::Connect {
            endpoint: Endpoint::new("h", 8000).unwrap(),
        },
        Step::Disconnect => ConnEvent::Disconnect,
        Step::ClearError => ConnEvent::ClearError,
        Step::ClearResponse => ConnEvent::ClearResponse,
        Step::Opened { current } => ConnEvent::TransportOpened {
            attempt: attempt(*current),
        },
        Step::Frame { current, valid } => ConnEvent::FrameReceived {
            attempt: attempt(*current),
            text: if *valid { VALID_FRAME } else { "{" }.to_string(),
        },
        Step::Failed { current } => ConnEvent::TransportFailed {
            attempt: attempt(*current),
            reason: "refused".to_string(),
        },
        Step::PeerClosing { current, code } => ConnEvent::PeerClosing {
            attempt: attempt(*current),
            code: *code,
            reason: String::new(),
        },
        Step::Closed { current, code } => ConnEvent::TransportClosed {
            attempt: attempt(*current),
            code: *code,
            reason: String::new(),
        },
        Step::TimerFired { current } => ConnEvent::ReconnectTimerFired {
            timer: if *current {
                state.pending_timer.unwrap_or(state.timer_seq)
            } else {
                state.timer_seq.wrapping_add(7)
            },
        },
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_code() -> impl Strategy<Value = Option<u16>> {
    prop_oneof![Just(None), Just(Some(1000)), Just(Some(1006)), Just(Some(1011))]
}

fn arb_step() -> impl Strategy<Value = Step> {
    // Current-generation callbacks are weighted up so runs reach deep states
    let current = prop::bool::weighted(0.85);
    prop_oneof![
        2 => Just(Step::Connect),
        1 => Just(Step::Disconnect),
        1 => Just(Step::ClearError),
        1 => Just(Step::ClearResponse),
        3 => current.clone().prop_map(|current| Step::Opened { current }),
        2 => (current.clone(), any::<bool>()).prop_map(|(current, valid)| Step::Frame { current, valid }),
        4 => current.clone().prop_map(|current| Step::Failed { current }),
        1 => (current.clone(), arb_code()).prop_map(|(current, code)| Step::PeerClosing { current, code }),
        1 => (current.clone(), arb_code()).prop_map(|(current, code)| Step::Closed { current, code }),
        4 => current.prop_map(|current| Step::TimerFired { current }),
    ]
}

// ============================================================================
// Invariant Checks
// ============================================================================

fn check_state(state: &ConnState, ctx: &ConnContext) -> Result<(), TestCaseError> {
    let snap = state.snapshot();
    prop_assert!(!(snap.connected && snap.connecting), "both flags set: {:?}", state);
    prop_assert!(
        state.reconnect_attempts <= ctx.max_reconnect_attempts,
        "attempts exceeded max: {:?}",
        state
    );
    prop_assert_eq!(
        state.pending_timer.is_some(),
        state.phase == ConnPhase::Reconnecting,
        "timer/phase mismatch: {:?}",
        state
    );
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn prop_transitions_preserve_invariants(steps in proptest::collection::vec(arb_step(), 0..40)) {
        let ctx = test_context();
        let mut state = ConnState::default();

        for step in steps {
            let event = bind(&step, &state);
            let before = state.clone();
            match transition(&state, &ctx, event) {
                Ok(result) => {
                    let scheduled = result
                        .effects
                        .iter()
                        .filter(|e| matches!(e, ConnEffect::ScheduleReconnect { .. }))
                        .count();
                    prop_assert!(scheduled <= 1);
                    if scheduled == 1 {
                        prop_assert!(before.pending_timer.is_none(), "second timer armed");
                    }
                    let opens = result
                        .effects
                        .iter()
                        .filter(|e| matches!(e, ConnEffect::OpenTransport { .. }))
                        .count();
                    prop_assert!(opens <= 1);
                    state = result.new_state;
                    check_state(&state, &ctx)?;
                }
                Err(_) => {
                    // Rejected events leave no trace
                    prop_assert_eq!(&state, &before);
                }
            }
        }
    }

    #[test]
    fn prop_stale_callbacks_are_dropped(steps in proptest::collection::vec(arb_step(), 0..20)) {
        let ctx = test_context();
        let mut state = ConnState::default();
        for step in steps {
            if let Ok(result) = transition(&state, &ctx, bind(&step, &state)) {
                state = result.new_state;
            }
        }

        let stale = [
            Step::Opened { current: false },
            Step::Frame { current: false, valid: true },
            Step::Failed { current: false },
            Step::Closed { current: false, code: Some(1006) },
        ];
        for step in &stale {
            let result = transition(&state, &ctx, bind(step, &state));
            prop_assert!(matches!(result, Err(TransitionError::StaleAttempt(_))));
        }
    }

    #[test]
    fn prop_disconnect_always_quiesces(steps in proptest::collection::vec(arb_step(), 0..30)) {
        let ctx = test_context();
        let mut state = ConnState::default();
        for step in steps {
            if let Ok(result) = transition(&state, &ctx, bind(&step, &state)) {
                state = result.new_state;
            }
        }

        let result = transition(&state, &ctx, ConnEvent::Disconnect).unwrap();
        prop_assert_eq!(result.new_state.snapshot(), ConnectionState::default());
        prop_assert_eq!(result.new_state.pending_timer, None);
        prop_assert_eq!(result.new_state.response, None);
        prop_assert_eq!(
            result.effects.contains(&ConnEffect::CancelReconnect),
            state.pending_timer.is_some()
        );
    }

    #[test]
    fn prop_consecutive_failures_terminate(max in 0u32..8) {
        let ctx = ConnContext::new(max, Duration::from_millis(1));
        let mut state = transition(
            &ConnState::default(),
            &ctx,
            ConnEvent::Connect { endpoint: Endpoint::new("h", 1).unwrap() },
        )
        .unwrap()
        .new_state;

        let mut opens = 1;
        while state.phase != ConnPhase::Idle {
            let failed = bind(&Step::Failed { current: true }, &state);
            state = transition(&state, &ctx, failed).unwrap().new_state;
            if let Some(timer) = state.pending_timer {
                state = transition(&state, &ctx, ConnEvent::ReconnectTimerFired { timer })
                    .unwrap()
                    .new_state;
                opens += 1;
            }
            prop_assert!(opens <= max + 1, "runaway reconnects");
        }

        prop_assert_eq!(opens, max + 1);
        prop_assert_eq!(state.reconnect_attempts, max);
        let expected = format!("Failed to connect after {max} attempts");
        prop_assert_eq!(state.error.as_deref(), Some(expected.as_str()));
    }
}

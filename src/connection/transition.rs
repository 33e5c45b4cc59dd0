//! Pure state transition function for the connection

use super::{ConnContext, ConnEffect, ConnEvent, ConnPhase, ConnState};
use crate::codec;
use crate::config::Endpoint;
use crate::url::websocket_url;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConnState,
    pub effects: Vec<ConnEffect>,
}

impl TransitionResult {
    pub fn new(state: ConnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: ConnEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = ConnEffect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Events the machine declined to act on. None of these are failures of the
/// session; the runtime logs them and carries on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Already connected or connecting")]
    AlreadyActive,
    #[error("Stale event for superseded attempt {0}")]
    StaleAttempt(u64),
    #[error("Stale reconnect timer {0}")]
    StaleTimer(u64),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

#[allow(clippy::too_many_lines)] // One arm per (phase, event) pair
pub fn transition(
    state: &ConnState,
    context: &ConnContext,
    event: ConnEvent,
) -> Result<TransitionResult, TransitionError> {
    if let Some(attempt) = event.attempt() {
        if attempt != state.attempt {
            return Err(TransitionError::StaleAttempt(attempt));
        }
    }

    match (state.phase, event) {
        // ============================================================
        // Caller events
        // ============================================================
        (ConnPhase::Connecting | ConnPhase::Open, ConnEvent::Connect { .. }) => {
            Err(TransitionError::AlreadyActive)
        }

        (_, ConnEvent::Connect { endpoint }) => {
            let cancel = state.pending_timer.map(|_| ConnEffect::CancelReconnect);
            let mut next = state.clone();
            next.pending_timer = None;
            Ok(begin_connect(next, endpoint).with_effects(cancel))
        }

        (_, ConnEvent::Disconnect) => {
            let mut effects = Vec::new();
            if state.pending_timer.is_some() {
                effects.push(ConnEffect::CancelReconnect);
            }
            if state.has_transport() {
                effects.push(ConnEffect::user_close());
            }
            effects.push(ConnEffect::PublishState);
            effects.push(ConnEffect::PublishResponse);

            let next = ConnState {
                endpoint: state.endpoint.clone(),
                // Invalidate every callback from the socket being torn down
                attempt: state.attempt + 1,
                timer_seq: state.timer_seq,
                response_seq: state.response_seq,
                ..ConnState::default()
            };
            Ok(TransitionResult::new(next).with_effects(effects))
        }

        (_, ConnEvent::ClearError) => {
            let mut next = state.clone();
            next.error = None;
            Ok(TransitionResult::new(next).with_effect(ConnEffect::PublishState))
        }

        (_, ConnEvent::ClearResponse) => {
            let mut next = state.clone();
            next.response = None;
            Ok(TransitionResult::new(next).with_effect(ConnEffect::PublishResponse))
        }

        // ============================================================
        // Transport events
        // ============================================================
        (ConnPhase::Connecting, ConnEvent::TransportOpened { .. }) => {
            let mut next = state.clone();
            next.phase = ConnPhase::Open;
            next.error = None;
            next.reconnect_attempts = 0;
            Ok(TransitionResult::new(next).with_effect(ConnEffect::PublishState))
        }

        (ConnPhase::Open, ConnEvent::FrameReceived { text, .. }) => {
            let mut next = state.clone();
            match codec::decode(&text) {
                Ok(response) => {
                    next.response = Some(response);
                    next.response_seq += 1;
                    next.error = None;
                    Ok(TransitionResult::new(next)
                        .with_effect(ConnEffect::PublishResponse)
                        .with_effect(ConnEffect::PublishState))
                }
                Err(e) => {
                    tracing::warn!(cause = e.cause(), error = %e, "Discarding undecodable frame");
                    next.error = Some(e.user_message());
                    Ok(TransitionResult::new(next).with_effect(ConnEffect::PublishState))
                }
            }
        }

        (ConnPhase::Open, ConnEvent::PeerClosing { .. }) => {
            let mut next = state.clone();
            next.phase = ConnPhase::Closing;
            Ok(TransitionResult::new(next).with_effect(ConnEffect::PublishState))
        }

        (
            ConnPhase::Connecting | ConnPhase::Open | ConnPhase::Closing,
            ConnEvent::TransportFailed { reason, .. },
        ) => Ok(handle_failure(state, context, format!("Connection failed: {reason}"))),

        (
            ConnPhase::Connecting | ConnPhase::Open | ConnPhase::Closing,
            ConnEvent::TransportClosed { code, reason, .. },
        ) => {
            if code == Some(super::effect::NORMAL_CLOSURE) {
                let mut next = state.clone();
                next.phase = ConnPhase::Idle;
                Ok(TransitionResult::new(next).with_effect(ConnEffect::PublishState))
            } else {
                let code = code.map_or_else(|| "no status".to_string(), |c| c.to_string());
                Ok(handle_failure(
                    state,
                    context,
                    format!("Connection closed abnormally: {code} {reason}").trim_end().to_string(),
                ))
            }
        }

        // ============================================================
        // Reconnect timer
        // ============================================================
        (ConnPhase::Reconnecting, ConnEvent::ReconnectTimerFired { timer })
            if state.pending_timer == Some(timer) =>
        {
            let Some(endpoint) = state.endpoint.clone() else {
                return Err(TransitionError::InvalidTransition(
                    "reconnect timer fired without an endpoint".to_string(),
                ));
            };
            let mut next = state.clone();
            next.pending_timer = None;
            next.reconnect_attempts = (next.reconnect_attempts + 1).min(context.max_reconnect_attempts);
            tracing::info!(
                reconnect_attempts = next.reconnect_attempts,
                "Attempting reconnection"
            );
            Ok(begin_connect(next, endpoint))
        }

        (_, ConnEvent::ReconnectTimerFired { timer }) => Err(TransitionError::StaleTimer(timer)),

        // ============================================================
        // Invalid Transitions
        // ============================================================
        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {phase:?} with event {event:?}"
        ))),
    }
}

fn begin_connect(mut next: ConnState, endpoint: Endpoint) -> TransitionResult {
    let url = websocket_url(endpoint.host(), endpoint.port());
    next.phase = ConnPhase::Connecting;
    next.error = None;
    next.attempt += 1;
    next.endpoint = Some(endpoint);
    let attempt = next.attempt;
    TransitionResult::new(next)
        .with_effect(ConnEffect::OpenTransport { attempt, url })
        .with_effect(ConnEffect::PublishState)
}

/// Bounded reconnection: arm the timer while attempts remain, otherwise
/// publish the terminal error and wait for a manual connect.
fn handle_failure(state: &ConnState, context: &ConnContext, reason: String) -> TransitionResult {
    let mut next = state.clone();
    next.error = Some(reason);

    if state.reconnect_attempts < context.max_reconnect_attempts {
        next.phase = ConnPhase::Reconnecting;
        next.timer_seq += 1;
        next.pending_timer = Some(next.timer_seq);
        let timer = next.timer_seq;
        TransitionResult::new(next)
            .with_effect(ConnEffect::PublishState)
            .with_effect(ConnEffect::ScheduleReconnect {
                timer,
                delay: context.reconnect_delay,
            })
    } else {
        tracing::error!(
            max_attempts = context.max_reconnect_attempts,
            "Max reconnection attempts reached"
        );
        next.phase = ConnPhase::Idle;
        next.error = Some(format!(
            "Failed to connect after {} attempts",
            context.max_reconnect_attempts
        ));
        TransitionResult::new(next).with_effect(ConnEffect::PublishState)
    }
}

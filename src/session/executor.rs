//! Session runtime executor

use super::{Command, SessionEvent, UiState};
use crate::audio::{
    self, AudioEffect, AudioEvent, AudioFocus, AudioMachine, AudioState,
    OutputControl, PlaybackEngine, FULL_VOLUME,
};
use crate::codec::LearningResponse;
use crate::config::SessionConfig;
use crate::connection::transport::{run_socket, Connector, SocketTimeouts};
use crate::connection::{self, ConnContext, ConnEffect, ConnEvent, ConnState, ConnectionState};
use crate::url::{is_plausible_tts_ref, resolve_asset_url};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Owning ends of the published state channels
pub(super) struct Publishers {
    pub connection: watch::Sender<ConnectionState>,
    pub response: watch::Sender<Option<LearningResponse>>,
    pub audio: watch::Sender<AudioState>,
    pub ui: watch::Sender<UiState>,
}

/// In-flight preparation or output for the current `play_id`
struct ActiveOutput {
    cancel: CancellationToken,
    paused: Option<watch::Sender<bool>>,
}

pub struct SessionRuntime<C, E, F>
where
    C: Connector + 'static,
    E: PlaybackEngine + 'static,
    F: AudioFocus + 'static,
{
    config: SessionConfig,
    conn_context: ConnContext,
    conn: ConnState,
    audio: AudioMachine,
    ui: UiState,
    connector: Arc<C>,
    engine: Arc<E>,
    focus: F,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    publish: Publishers,
    /// Shared by every output; carries the duck level
    volume_tx: watch::Sender<f32>,
    socket_cancel: Option<CancellationToken>,
    reconnect_cancel: Option<CancellationToken>,
    output: Option<ActiveOutput>,
    autoplay_cancel: Option<CancellationToken>,
    retry_cancel: Option<CancellationToken>,
    /// Automatic retries since the last caller or auto-play request
    audio_retries: u32,
}

impl<C, E, F> SessionRuntime<C, E, F>
where
    C: Connector + 'static,
    E: PlaybackEngine + 'static,
    F: AudioFocus + 'static,
{
    pub(super) fn new(
        config: SessionConfig,
        connector: C,
        engine: E,
        focus: F,
        event_rx: mpsc::UnboundedReceiver<SessionEvent>,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
        publish: Publishers,
    ) -> Self {
        let conn_context = ConnContext::new(config.max_reconnect_attempts, config.reconnect_delay);
        let (volume_tx, _) = watch::channel(FULL_VOLUME);
        Self {
            config,
            conn_context,
            conn: ConnState::default(),
            audio: AudioMachine::default(),
            ui: UiState::default(),
            connector: Arc::new(connector),
            engine: Arc::new(engine),
            focus,
            event_rx,
            event_tx,
            publish,
            volume_tx,
            socket_cancel: None,
            reconnect_cancel: None,
            output: None,
            autoplay_cancel: None,
            retry_cancel: None,
            audio_retries: 0,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(endpoint = %self.config.endpoint, "Starting session runtime");

        while let Some(event) = self.event_rx.recv().await {
            if self.process_event(event).is_break() {
                break;
            }
        }

        tracing::info!("Session runtime stopped");
    }

    fn process_event(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::Command(command) => return self.handle_command(command),
            SessionEvent::Connection(event) => self.apply_connection(event),
            SessionEvent::Audio(event) => self.apply_audio(event),
            SessionEvent::AutoPlayDue { response_seq } => self.auto_play(response_seq),
            SessionEvent::AudioRetryDue { play_id } => self.retry_audio(play_id),
        }
        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Connect { endpoint } => {
                self.ui.loading = true;
                self.publish_ui();
                self.apply_connection(ConnEvent::Connect { endpoint });
            }
            Command::Disconnect => {
                cancel(&mut self.autoplay_cancel);
                cancel(&mut self.retry_cancel);
                self.apply_connection(ConnEvent::Disconnect);
                self.apply_audio(AudioEvent::Stop);
                self.ui.loading = false;
                self.publish_ui();
            }
            Command::ClearConnectionError => self.apply_connection(ConnEvent::ClearError),
            Command::ClearLearningResponse => {
                cancel(&mut self.autoplay_cancel);
                self.apply_connection(ConnEvent::ClearResponse);
                self.ui.expanded_question = None;
                self.publish_ui();
            }
            Command::Play { reference } => {
                cancel(&mut self.retry_cancel);
                self.audio_retries = 0;
                self.play_reference(&reference);
            }
            Command::Replay => {
                let Some(reference) = self.conn.response.as_ref().map(|r| r.tts_ref.clone()) else {
                    tracing::warn!("Cannot replay: no current response");
                    return ControlFlow::Continue(());
                };
                cancel(&mut self.retry_cancel);
                self.audio_retries = 0;
                self.apply_audio(AudioEvent::Stop);
                self.apply_audio(AudioEvent::ClearError);
                self.play_reference(&reference);
            }
            Command::Pause => self.apply_audio(AudioEvent::Pause),
            Command::Resume => self.apply_audio(AudioEvent::Resume),
            Command::Stop => {
                cancel(&mut self.retry_cancel);
                self.apply_audio(AudioEvent::Stop);
            }
            Command::ClearAudioError => self.apply_audio(AudioEvent::ClearError),
            Command::ToggleQuestion { index } => {
                self.ui.toggle_question(index);
                self.publish_ui();
            }
            Command::FocusChanged(change) => self.apply_audio(AudioEvent::Focus(change)),
            Command::Shutdown { done } => {
                self.teardown();
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn teardown(&mut self) {
        tracing::info!("Shutting down session");
        cancel(&mut self.autoplay_cancel);
        cancel(&mut self.retry_cancel);
        self.apply_connection(ConnEvent::Disconnect);
        self.apply_audio(AudioEvent::Release);
        // Socket and output tasks were cancelled by the effects above
        cancel(&mut self.reconnect_cancel);
    }

    // ========================================================================
    // Connection
    // ========================================================================

    fn apply_connection(&mut self, event: ConnEvent) {
        let response_seq = self.conn.response_seq;
        let result = match connection::transition(&self.conn, &self.conn_context, event) {
            Ok(result) => result,
            Err(
                e @ (connection::TransitionError::StaleAttempt(_)
                | connection::TransitionError::StaleTimer(_)),
            ) => {
                tracing::debug!(error = %e, "Dropping stale connection event");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, phase = ?self.conn.phase, "Connection event ignored");
                return;
            }
        };

        self.conn = result.new_state;
        for effect in result.effects {
            self.execute_conn_effect(effect);
        }

        if self.conn.response_seq != response_seq {
            self.on_new_response();
        }
    }

    fn execute_conn_effect(&mut self, effect: ConnEffect) {
        match effect {
            ConnEffect::OpenTransport { attempt, url } => {
                cancel(&mut self.socket_cancel);
                let token = CancellationToken::new();
                self.socket_cancel = Some(token.clone());

                let connector = Arc::clone(&self.connector);
                let event_tx = self.event_tx.clone();
                let timeouts = SocketTimeouts {
                    connect: self.config.connect_timeout,
                    read: self.config.read_timeout,
                };
                tokio::spawn(async move {
                    run_socket(&*connector, url, attempt, timeouts, token, |event| {
                        let _ = event_tx.send(SessionEvent::Connection(event));
                    })
                    .await;
                });
            }

            ConnEffect::CloseTransport { code, reason } => {
                tracing::info!(code, reason = %reason, "Closing connection");
                cancel(&mut self.socket_cancel);
            }

            ConnEffect::ScheduleReconnect { timer, delay } => {
                tracing::info!(
                    timer,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reconnect_attempts = self.conn.reconnect_attempts,
                    "Scheduling reconnect"
                );
                cancel(&mut self.reconnect_cancel);
                self.reconnect_cancel = Some(self.schedule(
                    delay,
                    SessionEvent::Connection(ConnEvent::ReconnectTimerFired { timer }),
                ));
            }

            ConnEffect::CancelReconnect => cancel(&mut self.reconnect_cancel),

            ConnEffect::PublishState => {
                self.publish.connection.send_replace(self.conn.snapshot());
            }

            ConnEffect::PublishResponse => {
                self.publish.response.send_replace(self.conn.response.clone());
            }
        }
    }

    fn on_new_response(&mut self) {
        self.ui.loading = false;
        self.publish_ui();

        let Some(response) = &self.conn.response else {
            return;
        };
        if response.tts_ref.is_empty() {
            tracing::warn!("Response carries no TTS reference, skipping auto-play");
            return;
        }

        cancel(&mut self.autoplay_cancel);
        let response_seq = self.conn.response_seq;
        self.autoplay_cancel = Some(self.schedule(
            self.config.autoplay_delay,
            SessionEvent::AutoPlayDue { response_seq },
        ));
    }

    fn auto_play(&mut self, response_seq: u64) {
        self.autoplay_cancel = None;
        if response_seq != self.conn.response_seq {
            tracing::debug!(response_seq, "Dropping stale auto-play");
            return;
        }
        let Some(reference) = self.conn.response.as_ref().map(|r| r.tts_ref.clone()) else {
            tracing::debug!(response_seq, "Response cleared before auto-play");
            return;
        };
        tracing::info!(reference = %reference, "Auto-playing TTS audio");
        cancel(&mut self.retry_cancel);
        self.audio_retries = 0;
        self.play_reference(&reference);
    }

    // ========================================================================
    // Audio
    // ========================================================================

    fn play_reference(&mut self, reference: &str) {
        if !is_plausible_tts_ref(reference) {
            tracing::error!(reference, "Invalid TTS reference");
            return;
        }
        let endpoint = self
            .conn
            .endpoint
            .clone()
            .unwrap_or_else(|| self.config.endpoint.clone());
        let url = resolve_asset_url(reference, endpoint.host(), endpoint.port());
        tracing::info!(reference, url = %url, "Starting TTS playback");
        self.apply_audio(AudioEvent::Play { url });
    }

    fn apply_audio(&mut self, event: AudioEvent) {
        let previous = self.audio.clone();
        let result = match audio::transition(&self.audio, event) {
            Ok(result) => result,
            Err(e @ audio::TransitionError::StalePlayback(_)) => {
                tracing::debug!(error = %e, "Dropping stale audio event");
                return;
            }
            Err(e) => {
                tracing::info!(error = %e, "Audio event ignored");
                return;
            }
        };

        self.audio = result.new_state;
        for effect in result.effects {
            self.execute_audio_effect(effect);
        }

        if previous.error.is_none() && self.audio.error.is_some() && self.audio.current_url.is_some() {
            self.schedule_audio_retry();
        }
    }

    fn execute_audio_effect(&mut self, effect: AudioEffect) {
        match effect {
            AudioEffect::DisposeOutput => {
                if let Some(output) = self.output.take() {
                    output.cancel.cancel();
                }
            }

            AudioEffect::RequestFocus => {
                if !self.focus.request() {
                    tracing::warn!("Audio focus not granted, playing anyway");
                }
            }

            AudioEffect::AbandonFocus => self.focus.abandon(),

            AudioEffect::Prepare { play_id, url } => {
                let token = CancellationToken::new();
                self.output = Some(ActiveOutput {
                    cancel: token.clone(),
                    paused: None,
                });

                let engine = Arc::clone(&self.engine);
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let event = tokio::select! {
                        biased;
                        () = token.cancelled() => return,
                        result = engine.prepare(&url) => match result {
                            Ok(audio) => AudioEvent::Prepared { play_id, audio },
                            Err(e) => {
                                tracing::warn!(play_id, url = %url, error = %e, "Audio preparation failed");
                                AudioEvent::EngineFailed { play_id, message: e.to_string() }
                            }
                        },
                    };
                    let _ = event_tx.send(SessionEvent::Audio(event));
                });
            }

            AudioEffect::StartOutput { play_id, audio } => {
                let token = self
                    .output
                    .as_ref()
                    .map_or_else(CancellationToken::new, |o| o.cancel.clone());
                let (paused_tx, paused) = watch::channel(false);
                self.output = Some(ActiveOutput {
                    cancel: token.clone(),
                    paused: Some(paused_tx),
                });

                let control = OutputControl {
                    paused,
                    volume: self.volume_tx.subscribe(),
                    cancel: token.clone(),
                };
                let engine = Arc::clone(&self.engine);
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = engine.play(audio, control).await;
                    if token.is_cancelled() {
                        return;
                    }
                    let event = match result {
                        Ok(()) => AudioEvent::Completed { play_id },
                        Err(e) => {
                            tracing::warn!(play_id, error = %e, "Audio playback failed");
                            AudioEvent::EngineFailed {
                                play_id,
                                message: format!("Playback failed: {e}"),
                            }
                        }
                    };
                    let _ = event_tx.send(SessionEvent::Audio(event));
                });
            }

            AudioEffect::SetPaused(paused) => {
                if let Some(tx) = self.output.as_ref().and_then(|o| o.paused.as_ref()) {
                    tx.send_replace(paused);
                }
            }

            AudioEffect::SetVolume(level) => {
                tracing::debug!(volume = level, "Setting output level");
                self.volume_tx.send_replace(level);
            }

            AudioEffect::PublishState => {
                self.publish.audio.send_replace(self.audio.snapshot());
            }
        }
    }

    fn schedule_audio_retry(&mut self) {
        if let Some(limit) = self.config.audio_retry_limit {
            if self.audio_retries >= limit {
                tracing::warn!(
                    retries = self.audio_retries,
                    error = ?self.audio.error,
                    "Giving up on audio retry"
                );
                return;
            }
        }
        self.audio_retries += 1;
        tracing::info!(
            retry = self.audio_retries,
            error = ?self.audio.error,
            "Audio error detected, scheduling retry"
        );

        cancel(&mut self.retry_cancel);
        let play_id = self.audio.play_id;
        self.retry_cancel = Some(self.schedule(
            self.config.audio_retry_delay,
            SessionEvent::AudioRetryDue { play_id },
        ));
    }

    fn retry_audio(&mut self, play_id: u64) {
        self.retry_cancel = None;
        if play_id != self.audio.play_id {
            tracing::debug!(play_id, "Dropping stale audio retry");
            return;
        }
        let Some(url) = self.audio.current_url.clone() else {
            tracing::warn!("Cannot retry: no current audio URL");
            return;
        };
        tracing::info!(url = %url, "Retrying audio playback");
        self.apply_audio(AudioEvent::ClearError);
        self.apply_audio(AudioEvent::Play { url });
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn publish_ui(&self) {
        self.publish.ui.send_replace(self.ui.clone());
    }

    /// Deliver `event` after `delay` unless the returned token is cancelled
    fn schedule(&self, delay: Duration, event: SessionEvent) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = event_tx.send(event);
                }
            }
        });
        token
    }
}

fn cancel(slot: &mut Option<CancellationToken>) {
    if let Some(token) = slot.take() {
        token.cancel();
    }
}

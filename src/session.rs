//! Session orchestrator
//!
//! One coordination task owns the connection and audio machines. Every
//! caller operation, transport callback, engine callback and timer firing is
//! an event on a single channel, so published state is only ever written
//! from that task.

mod executor;


use crate::audio::{AudioEvent, AudioFocus, AudioState, FocusChange, PlaybackEngine};
use crate::codec::LearningResponse;
use crate::config::{ConfigError, Endpoint, SessionConfig};
use crate::connection::transport::Connector;
use crate::connection::{ConnEvent, ConnectionState};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Presentation-only state owned by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiState {
    /// A connect was requested and no response has arrived yet
    pub loading: bool,
    pub expanded_question: Option<usize>,
}

impl UiState {
    pub fn toggle_question(&mut self, index: usize) {
        self.expanded_question = if self.expanded_question == Some(index) {
            None
        } else {
            Some(index)
        };
    }
}

/// Caller-originated requests
#[derive(Debug)]
pub enum Command {
    Connect { endpoint: Endpoint },
    Disconnect,
    ClearConnectionError,
    ClearLearningResponse,
    Play { reference: String },
    /// Restart audio for the current response from scratch
    Replay,
    Pause,
    Resume,
    Stop,
    ClearAudioError,
    ToggleQuestion { index: usize },
    FocusChanged(FocusChange),
    Shutdown { done: oneshot::Sender<()> },
}

/// Everything the coordination task reacts to
#[derive(Debug)]
pub enum SessionEvent {
    Command(Command),
    Connection(ConnEvent),
    Audio(AudioEvent),
    AutoPlayDue { response_seq: u64 },
    AudioRetryDue { play_id: u64 },
}

/// Spawn the coordination task and return a handle to it
pub fn spawn_session<C, E, F>(
    config: SessionConfig,
    connector: C,
    engine: E,
    focus: F,
) -> (SessionHandle, JoinHandle<()>)
where
    C: Connector + 'static,
    E: PlaybackEngine + 'static,
    F: AudioFocus + 'static,
{
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (connection_tx, connection) = watch::channel(ConnectionState::default());
    let (response_tx, response) = watch::channel(None);
    let (audio_tx, audio) = watch::channel(AudioState::default());
    let (ui_tx, ui) = watch::channel(UiState::default());

    let handle = SessionHandle {
        event_tx: event_tx.clone(),
        default_endpoint: config.endpoint.clone(),
        connection,
        response,
        audio,
        ui,
    };

    let runtime = executor::SessionRuntime::new(
        config,
        connector,
        engine,
        focus,
        event_rx,
        event_tx,
        executor::Publishers {
            connection: connection_tx,
            response: response_tx,
            audio: audio_tx,
            ui: ui_tx,
        },
    );
    let task = tokio::spawn(runtime.run());
    (handle, task)
}

/// Cheap, cloneable front door to a running session.
///
/// Every operation except [`SessionHandle::shutdown`] returns immediately;
/// outcomes are observed through the published state receivers.
#[derive(Clone)]
pub struct SessionHandle {
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    default_endpoint: Endpoint,
    connection: watch::Receiver<ConnectionState>,
    response: watch::Receiver<Option<LearningResponse>>,
    audio: watch::Receiver<AudioState>,
    ui: watch::Receiver<UiState>,
}

impl SessionHandle {
    fn send(&self, command: Command) {
        if let Err(e) = self.event_tx.send(SessionEvent::Command(command)) {
            tracing::warn!(command = ?e.0, "Session has shut down, dropping command");
        }
    }

    /// Validate the endpoint and start connecting. Missing parts fall back to
    /// the configured default.
    pub fn connect_to_server(&self, host: Option<&str>, port: Option<u16>) -> Result<(), ConfigError> {
        let endpoint = Endpoint::new(
            host.unwrap_or(self.default_endpoint.host()),
            port.unwrap_or(self.default_endpoint.port()),
        )?;
        self.send(Command::Connect { endpoint });
        Ok(())
    }

    pub fn disconnect_from_server(&self) {
        self.send(Command::Disconnect);
    }

    pub fn clear_connection_error(&self) {
        self.send(Command::ClearConnectionError);
    }

    pub fn clear_learning_response(&self) {
        self.send(Command::ClearLearningResponse);
    }

    pub fn play_tts_audio(&self, reference: impl Into<String>) {
        self.send(Command::Play {
            reference: reference.into(),
        });
    }

    pub fn replay_audio(&self) {
        self.send(Command::Replay);
    }

    pub fn pause_audio(&self) {
        self.send(Command::Pause);
    }

    pub fn resume_audio(&self) {
        self.send(Command::Resume);
    }

    pub fn stop_audio(&self) {
        self.send(Command::Stop);
    }

    pub fn clear_audio_error(&self) {
        self.send(Command::ClearAudioError);
    }

    pub fn toggle_question_expansion(&self, index: usize) {
        self.send(Command::ToggleQuestion { index });
    }

    /// Deliver a platform focus notification
    pub fn focus_changed(&self, change: FocusChange) {
        self.send(Command::FocusChanged(change));
    }

    /// Disconnect and release audio, then stop the coordination task.
    /// Teardown runs once no matter how many times this is called.
    pub async fn shutdown(&self) {
        let (done, finished) = oneshot::channel();
        if self
            .event_tx
            .send(SessionEvent::Command(Command::Shutdown { done }))
            .is_err()
        {
            return;
        }
        // Dropped without a reply when another shutdown got there first
        let _ = finished.await;
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn learning_response(&self) -> watch::Receiver<Option<LearningResponse>> {
        self.response.clone()
    }

    pub fn audio_state(&self) -> watch::Receiver<AudioState> {
        self.audio.clone()
    }

    pub fn ui_state(&self) -> watch::Receiver<UiState> {
        self.ui.clone()
    }
}

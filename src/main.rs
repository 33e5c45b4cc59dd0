//! Scholar session - client-side learning session manager
//!
//! Keeps one WebSocket session to the scholar backend, decodes learning
//! responses and plays their synthesized speech. This binary is a headless
//! console driver over the session handle.

mod audio;
mod codec;
mod config;
mod connection;
mod session;
mod url;

use audio::engine::ProcessPlaybackEngine;
use audio::focus::DesktopFocus;
use audio::FocusChange;
use config::{ConfigError, Endpoint, SessionConfig};
use connection::transport::WsConnector;
use session::{spawn_session, SessionHandle};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scholar_session=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = SessionConfig::from_env();
    tracing::info!(
        endpoint = %config.endpoint,
        player = ?config.player_command,
        "Starting scholar session"
    );

    let engine = ProcessPlaybackEngine::new(config.player_command.clone());
    let (session, task) = spawn_session(config, WsConnector, engine, DesktopFocus);
    let logger = spawn_state_logger(&session);

    session.connect_to_server(None, None)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => match line? {
                None => {
                    tracing::debug!("stdin closed, waiting for Ctrl-C");
                    stdin_open = false;
                }
                Some(line) => match ConsoleCommand::parse(&line) {
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Err(e) = command.apply(&session) {
                            eprintln!("{e}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                },
            },
        }
    }

    session.shutdown().await;
    task.await?;
    logger.abort();
    Ok(())
}

/// Log every published state change; print new responses for the operator
fn spawn_state_logger(session: &SessionHandle) -> JoinHandle<()> {
    enum Published {
        Connection(connection::ConnectionState),
        Response(Option<codec::LearningResponse>),
        Audio(audio::AudioState),
        Ui(session::UiState),
    }

    let mut updates = WatchStream::new(session.connection_state())
        .map(Published::Connection)
        .merge(WatchStream::new(session.learning_response()).map(Published::Response))
        .merge(WatchStream::new(session.audio_state()).map(Published::Audio))
        .merge(WatchStream::new(session.ui_state()).map(Published::Ui));

    tokio::spawn(async move {
        while let Some(update) = updates.next().await {
            match update {
                Published::Connection(state) => tracing::info!(
                    connected = state.connected,
                    connecting = state.connecting,
                    error = ?state.error,
                    reconnect_attempts = state.reconnect_attempts,
                    "Connection state"
                ),
                Published::Response(Some(response)) => {
                    println!("\n{}", response.explanation);
                    for (i, question) in response.practice_questions.iter().enumerate() {
                        println!("  [{i}] {question}");
                    }
                    for url in &response.additional_urls {
                        println!("  see: {url}");
                    }
                }
                Published::Response(None) => tracing::debug!("Learning response cleared"),
                Published::Audio(state) => tracing::info!(
                    playing = state.playing,
                    loading = state.loading,
                    error = ?state.error,
                    url = ?state.current_url,
                    "Audio state"
                ),
                Published::Ui(state) => tracing::debug!(
                    loading = state.loading,
                    expanded = ?state.expanded_question,
                    "UI state"
                ),
            }
        }
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("Invalid question index: {0}")]
    InvalidIndex(String),
    #[error("Unknown focus change {0:?}; expected gained, lost, transient or duck")]
    InvalidFocus(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One line of operator input
#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Connect {
        host: Option<String>,
        port: Option<u16>,
    },
    Disconnect,
    Play(String),
    Replay,
    Pause,
    Resume,
    Stop,
    ClearError,
    ClearAudioError,
    Clear,
    Expand(usize),
    /// Simulate a platform focus notification
    Focus(FocusChange),
    Quit,
}

impl ConsoleCommand {
    fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb {
            "connect" => match (words.next(), words.next()) {
                (None, _) => Self::Connect {
                    host: None,
                    port: None,
                },
                (Some(host), None) => Self::Connect {
                    host: Some(host.to_string()),
                    port: None,
                },
                (Some(host), Some(port)) => {
                    let endpoint = Endpoint::parse(host, port)?;
                    Self::Connect {
                        host: Some(endpoint.host().to_string()),
                        port: Some(endpoint.port()),
                    }
                }
            },
            "disconnect" => Self::Disconnect,
            "play" => Self::Play(
                words
                    .next()
                    .ok_or(CommandError::MissingArgument("tts reference"))?
                    .to_string(),
            ),
            "replay" => Self::Replay,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "stop" => Self::Stop,
            "clear-error" => Self::ClearError,
            "clear-audio-error" => Self::ClearAudioError,
            "clear" => Self::Clear,
            "expand" => {
                let index = words
                    .next()
                    .ok_or(CommandError::MissingArgument("question index"))?;
                Self::Expand(
                    index
                        .parse()
                        .map_err(|_| CommandError::InvalidIndex(index.to_string()))?,
                )
            }
            "focus" => {
                let change = words.next().ok_or(CommandError::MissingArgument("focus change"))?;
                Self::Focus(match change {
                    "gained" => FocusChange::Gained,
                    "lost" => FocusChange::Lost,
                    "transient" => FocusChange::LostTransient,
                    "duck" => FocusChange::LostTransientCanDuck,
                    other => return Err(CommandError::InvalidFocus(other.to_string())),
                })
            }
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    fn apply(self, session: &SessionHandle) -> Result<(), CommandError> {
        match self {
            Self::Connect { host, port } => session.connect_to_server(host.as_deref(), port)?,
            Self::Disconnect => session.disconnect_from_server(),
            Self::Play(reference) => session.play_tts_audio(reference),
            Self::Replay => session.replay_audio(),
            Self::Pause => session.pause_audio(),
            Self::Resume => session.resume_audio(),
            Self::Stop => session.stop_audio(),
            Self::ClearError => session.clear_connection_error(),
            Self::ClearAudioError => session.clear_audio_error(),
            Self::Clear => session.clear_learning_response(),
            Self::Expand(index) => session.toggle_question_expansion(index),
            Self::Focus(change) => session.focus_changed(change),
            Self::Quit => {}
        }
        Ok(())
    }
}

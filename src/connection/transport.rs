//! Socket transport abstraction
//!
//! The runtime only ever talks to [`Connector`] and [`Socket`]; the
//! `tokio-tungstenite` adapter below is the production implementation.

use super::effect::{NORMAL_CLOSURE, USER_DISCONNECT_REASON};
use super::ConnEvent;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("read timeout")]
    ReadTimeout,
    #[error("{0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// One inbound frame, reduced to what the session cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Non-text payload; ignored by the session
    Binary(usize),
    Close {
        code: Option<u16>,
        reason: String,
    },
    /// Ping/Pong traffic, only relevant for liveness
    Control,
}

/// An open socket owned exclusively by one socket task
#[async_trait]
pub trait Socket: Send {
    /// Next inbound frame; `None` once the stream has ended
    async fn next_frame(&mut self) -> Option<Result<Inbound, TransportError>>;

    async fn ping(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Opens sockets
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError>;
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for std::sync::Arc<T> {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        (**self).connect(url).await
    }
}

/// Timeouts applied by [`run_socket`]
#[derive(Debug, Clone, Copy)]
pub struct SocketTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

/// Drive one socket attempt from connect to close, reporting every
/// lifecycle step through `emit`. Exactly one terminal event
/// (`TransportFailed` or `TransportClosed`) is emitted unless `cancel`
/// fires first, in which case the socket is closed normally and nothing
/// further is reported.
pub async fn run_socket<C, F>(
    connector: &C,
    url: String,
    attempt: u64,
    timeouts: SocketTimeouts,
    cancel: CancellationToken,
    emit: F,
) where
    C: Connector + ?Sized,
    F: Fn(ConnEvent),
{
    tracing::debug!(attempt, url = %url, "Attempting to connect");

    let connect = tokio::time::timeout(timeouts.connect, connector.connect(&url));
    let mut socket = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::debug!(attempt, "Connect superseded before completion");
            return;
        }
        result = connect => match result {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                emit(ConnEvent::TransportFailed { attempt, reason: e.to_string() });
                return;
            }
            Err(_) => {
                let e = TransportError::ConnectTimeout(timeouts.connect);
                emit(ConnEvent::TransportFailed { attempt, reason: e.to_string() });
                return;
            }
        }
    };

    tracing::info!(attempt, url = %url, "Connected to backend");
    emit(ConnEvent::TransportOpened { attempt });

    let mut awaiting_pong = false;
    let mut close_frame: Option<(Option<u16>, String)> = None;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(e) = socket.close(NORMAL_CLOSURE, USER_DISCONNECT_REASON).await {
                    tracing::debug!(attempt, error = %e, "Close handshake failed");
                }
                return;
            }
            frame = tokio::time::timeout(timeouts.read, socket.next_frame()) => match frame {
                Err(_) if awaiting_pong => {
                    emit(ConnEvent::TransportFailed {
                        attempt,
                        reason: TransportError::ReadTimeout.to_string(),
                    });
                    return;
                }
                Err(_) => {
                    tracing::debug!(attempt, "Inbound idle, sending liveness ping");
                    awaiting_pong = true;
                    if let Err(e) = socket.ping().await {
                        emit(ConnEvent::TransportFailed { attempt, reason: e.to_string() });
                        return;
                    }
                }
                Ok(None) => {
                    let (code, reason) = close_frame.take().unwrap_or((None, String::new()));
                    tracing::info!(attempt, code = ?code, reason = %reason, "Connection closed");
                    emit(ConnEvent::TransportClosed { attempt, code, reason });
                    return;
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(attempt, error = %e, "Connection failed");
                    emit(ConnEvent::TransportFailed { attempt, reason: e.to_string() });
                    return;
                }
                Ok(Some(Ok(inbound))) => {
                    awaiting_pong = false;
                    match inbound {
                        Inbound::Text(text) => {
                            tracing::debug!(attempt, len = text.len(), "Received frame");
                            emit(ConnEvent::FrameReceived { attempt, text });
                        }
                        Inbound::Binary(len) => {
                            tracing::debug!(attempt, len, "Ignoring binary frame");
                        }
                        Inbound::Close { code, reason } => {
                            tracing::info!(attempt, code = ?code, reason = %reason, "Connection closing");
                            emit(ConnEvent::PeerClosing { attempt, code, reason: reason.clone() });
                            close_frame = Some((code, reason));
                        }
                        Inbound::Control => {}
                    }
                }
            }
        }
    }
}

// ============================================================================
// tokio-tungstenite adapter
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production connector over `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        let (stream, _response) = connect_async(url).await?;
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WsStream,
}

#[async_trait]
impl Socket for WsSocket {
    async fn next_frame(&mut self) -> Option<Result<Inbound, TransportError>> {
        match self.stream.next().await? {
            Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.to_string()))),
            Ok(Message::Binary(data)) => Some(Ok(Inbound::Binary(data.len()))),
            Ok(Message::Close(frame)) => Some(Ok(match frame {
                Some(frame) => Inbound::Close {
                    code: Some(u16::from(frame.code)),
                    reason: frame.reason.to_string(),
                },
                None => Inbound::Close {
                    code: None,
                    reason: String::new(),
                },
            })),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                Some(Ok(Inbound::Control))
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => None,
            Err(e) => Some(Err(e.into())),
        }
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.stream.send(Message::Ping(Vec::new().into())).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}

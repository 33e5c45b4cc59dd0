//! Playback engine
//!
//! The production engine fetches the asset over HTTP and hands it to an
//! external player process. Pause and resume stop and continue the player's
//! process group; cancellation kills it. When the player is mpv, output level
//! changes go over its JSON IPC socket.

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use tokio::io::AsyncWriteExt;
#[cfg(unix)]
use tokio::net::UnixStream;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("HTTP {status} fetching {url}")]
    Http { status: u16, url: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Player(String),
}

/// A fully downloaded asset, ready for output
#[derive(Clone, PartialEq, Eq)]
pub struct PreparedAudio {
    pub url: String,
    pub data: Arc<[u8]>,
}

impl PreparedAudio {
    pub fn new(url: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            url: url.into(),
            data: data.into(),
        }
    }
}

impl std::fmt::Debug for PreparedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedAudio")
            .field("url", &self.url)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Live controls for one output, driven by the runtime
#[derive(Debug, Clone)]
pub struct OutputControl {
    pub paused: watch::Receiver<bool>,
    pub volume: watch::Receiver<f32>,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Fetch `url` into memory
    async fn prepare(&self, url: &str) -> Result<PreparedAudio, PlaybackError>;

    /// Play to completion. Returns `Ok(())` early if `control.cancel` fires.
    async fn play(&self, audio: PreparedAudio, control: OutputControl)
        -> Result<(), PlaybackError>;
}

#[async_trait]
impl<T: PlaybackEngine + ?Sized> PlaybackEngine for Arc<T> {
    async fn prepare(&self, url: &str) -> Result<PreparedAudio, PlaybackError> {
        (**self).prepare(url).await
    }

    async fn play(
        &self,
        audio: PreparedAudio,
        control: OutputControl,
    ) -> Result<(), PlaybackError> {
        (**self).play(audio, control).await
    }
}

/// Signals the runtime sends to a player's process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupSignal {
    Stop,
    Continue,
    Kill,
}

/// mpv takes a 0..=100 percentage
fn volume_percent(level: f32) -> f64 {
    (f64::from(level.clamp(0.0, 1.0)) * 100.0).round()
}

fn is_mpv(program: &str) -> bool {
    Path::new(program).file_stem() == Some(OsStr::new("mpv"))
}

/// Client side of mpv's `--input-ipc-server` socket
struct MpvIpc {
    path: PathBuf,
    #[cfg(unix)]
    stream: Option<UnixStream>,
}

impl MpvIpc {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            #[cfg(unix)]
            stream: None,
        }
    }

    /// Connects lazily since mpv creates the socket after it starts
    #[cfg(unix)]
    async fn set_volume(&mut self, level: f32) -> std::io::Result<()> {
        let command = serde_json::json!({
            "command": ["set_property", "volume", volume_percent(level)]
        });
        let mut line = command.to_string();
        line.push('\n');

        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => UnixStream::connect(&self.path).await?,
        };
        stream.write_all(line.as_bytes()).await?;
        self.stream = Some(stream);
        Ok(())
    }

    #[cfg(not(unix))]
    async fn set_volume(&mut self, _level: f32) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("no IPC transport for {}", self.path.display()),
        ))
    }
}

/// reqwest download + external player process
pub struct ProcessPlaybackEngine {
    client: reqwest::Client,
    player: Vec<String>,
    /// Pass `--input-ipc-server` and `--volume` to the player
    volume_ipc: bool,
}

impl ProcessPlaybackEngine {
    pub fn new(player: Vec<String>) -> Self {
        let volume_ipc = player.first().is_some_and(|program| is_mpv(program));
        Self {
            client: reqwest::Client::new(),
            player,
            volume_ipc,
        }
    }

    async fn run_player(
        &self,
        path: &Path,
        ipc_path: Option<&Path>,
        mut control: OutputControl,
    ) -> Result<(), PlaybackError> {
        let Some((program, args)) = self.player.split_first() else {
            return Err(PlaybackError::Player("no player command configured".to_string()));
        };

        let level = *control.volume.borrow_and_update();
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(ipc_path) = ipc_path {
            cmd.arg(format!("--input-ipc-server={}", ipc_path.display()))
                .arg(format!("--volume={}", volume_percent(level)));
        }
        cmd.arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Own process group so signals reach any helpers the player forks
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| PlaybackError::Player(format!("Failed to spawn {program}: {e}")))?;
        let pid = child.id();
        tracing::debug!(pid, program = %program, volume = level, "Player started");

        let mut ipc = ipc_path.map(|p| MpvIpc::new(p.to_path_buf()));
        let mut pause_open = true;
        let mut volume_open = true;
        loop {
            tokio::select! {
                biased;

                () = control.cancel.cancelled() => {
                    Self::signal_process_group(pid, GroupSignal::Kill);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(());
                }

                changed = control.paused.changed(), if pause_open => {
                    if changed.is_err() {
                        pause_open = false;
                        continue;
                    }
                    let paused = *control.paused.borrow_and_update();
                    let signal = if paused { GroupSignal::Stop } else { GroupSignal::Continue };
                    Self::signal_process_group(pid, signal);
                }

                changed = control.volume.changed(), if volume_open => {
                    if changed.is_err() {
                        volume_open = false;
                        continue;
                    }
                    let level = *control.volume.borrow_and_update();
                    match ipc.as_mut() {
                        Some(ipc) => {
                            if let Err(e) = ipc.set_volume(level).await {
                                tracing::warn!(volume = level, error = %e, "Failed to set player volume");
                            }
                        }
                        None => tracing::debug!(volume = level, program = %program, "Player has no volume control"),
                    }
                }

                status = child.wait() => {
                    let status = status?;
                    return if status.success() {
                        Ok(())
                    } else {
                        Err(PlaybackError::Player(format!("player exited with {status}")))
                    };
                }
            }
        }
    }

    #[cfg(unix)]
    fn signal_process_group(pid: Option<u32>, signal: GroupSignal) {
        let Some(pid) = pid else { return };
        let signal = match signal {
            GroupSignal::Stop => Signal::SIGSTOP,
            GroupSignal::Continue => Signal::SIGCONT,
            GroupSignal::Kill => Signal::SIGKILL,
        };
        let pgid = Pid::from_raw(pid.cast_signed());
        tracing::debug!(pgid = pid, signal = signal.as_str(), "Signalling player process group");
        let _ = killpg(pgid, signal);
    }

    #[cfg(not(unix))]
    fn signal_process_group(pid: Option<u32>, signal: GroupSignal) {
        // Kill falls back to the child handle; pause has no equivalent
        tracing::debug!(pid, signal = ?signal, "Process group signals unsupported");
    }
}

#[async_trait]
impl PlaybackEngine for ProcessPlaybackEngine {
    async fn prepare(&self, url: &str) -> Result<PreparedAudio, PlaybackError> {
        tracing::debug!(url, "Fetching audio asset");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlaybackError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlaybackError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlaybackError::Network(e.to_string()))?;
        tracing::debug!(url, bytes = bytes.len(), "Audio asset fetched");
        Ok(PreparedAudio::new(url, bytes.to_vec()))
    }

    async fn play(
        &self,
        audio: PreparedAudio,
        control: OutputControl,
    ) -> Result<(), PlaybackError> {
        let id = uuid::Uuid::new_v4();
        let path = std::env::temp_dir().join(format!("scholar-tts-{id}.mp3"));
        let ipc_path = self
            .volume_ipc
            .then(|| std::env::temp_dir().join(format!("scholar-mpv-{id}.sock")));
        tokio::fs::write(&path, &audio.data).await?;

        let result = self.run_player(&path, ipc_path.as_deref(), control).await;

        for leftover in std::iter::once(&path).chain(ipc_path.as_ref()) {
            if let Err(e) = tokio::fs::remove_file(leftover).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %leftover.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
        result
    }
}

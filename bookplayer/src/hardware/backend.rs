//! Playback backend interface and in-memory substitute
//!
//! The dispatcher and the status poller each own a backend connection; the
//! backend is the source of truth for what is actually playing.

use async_trait::async_trait;
use bookplayer_common::{Error, PlayerState, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Snapshot of the backend's playback status
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackStatus {
    pub state: PlayerState,
    pub position_secs: f64,
    /// Queue index of the current track, if any track is selected
    pub track: Option<u32>,
    pub track_count: u32,
    /// Duration of the current track, when the backend knows it
    pub duration_secs: Option<f64>,
    pub volume: Option<u8>,
}

/// Commands the coordination engine issues to the audio player
#[async_trait]
pub trait PlaybackBackend: Send {
    /// Rescan the music library so newly copied books become loadable
    async fn update_library(&mut self) -> Result<()>;

    /// Replace the queue with the audio files under `path`, in part order
    ///
    /// Returns the number of tracks queued. A path without playable tracks is
    /// an [`Error::UnresolvedReference`].
    async fn load(&mut self, path: &str) -> Result<u32>;

    async fn play(&mut self) -> Result<()>;

    async fn pause(&mut self) -> Result<()>;

    async fn resume(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Jump to `position_secs` within queue entry `track`
    async fn seek(&mut self, track: u32, position_secs: f64) -> Result<()>;

    async fn set_volume(&mut self, volume: u8) -> Result<()>;

    /// Duration of queue entry `track`, `None` when unknown
    async fn track_duration(&mut self, track: u32) -> Result<Option<f64>>;

    async fn status(&mut self) -> Result<PlaybackStatus>;

    /// Drop the connection; later calls may reconnect
    async fn close(&mut self) -> Result<()>;
}

/// One recorded backend command
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    UpdateLibrary,
    Load(String),
    Play,
    Pause,
    Resume,
    Stop,
    Seek(u32, f64),
    SetVolume(u8),
    Close,
}

impl BackendCommand {
    fn name(&self) -> &'static str {
        match self {
            BackendCommand::UpdateLibrary => "update_library",
            BackendCommand::Load(_) => "load",
            BackendCommand::Play => "play",
            BackendCommand::Pause => "pause",
            BackendCommand::Resume => "resume",
            BackendCommand::Stop => "stop",
            BackendCommand::Seek(..) => "seek",
            BackendCommand::SetVolume(_) => "set_volume",
            BackendCommand::Close => "close",
        }
    }
}

#[derive(Debug, Default)]
struct MemoryBackendState {
    library: HashMap<String, Vec<f64>>,
    queue: Vec<f64>,
    status: PlaybackStatus,
    commands: Vec<BackendCommand>,
    failing: HashSet<&'static str>,
    status_failures: u32,
}

/// Backend that simulates a player in memory
///
/// Clones share state, so a test can hand one clone to the dispatcher, one to
/// the status poller, and keep a third to script failures and inspect the
/// command log.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryBackendState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryBackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a book directory with the given track durations
    pub fn add_book(&self, path: &str, durations: &[f64]) {
        self.lock().library.insert(path.to_string(), durations.to_vec());
    }

    /// Make every later call of the named command fail
    ///
    /// Names: `update_library`, `load`, `play`, `pause`, `resume`, `stop`, `seek`, `set_volume`.
    pub fn fail_command(&self, name: &'static str) {
        self.lock().failing.insert(name);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing.clear();
        state.status_failures = 0;
    }

    /// Fail the next `count` status queries
    pub fn fail_status(&self, count: u32) {
        self.lock().status_failures = count;
    }

    /// Overwrite the simulated status, as if the player changed on its own
    pub fn set_status(&self, status: PlaybackStatus) {
        self.lock().status = status;
    }

    pub fn current_status(&self) -> PlaybackStatus {
        self.lock().status.clone()
    }

    /// Every successful command, oldest first
    pub fn commands(&self) -> Vec<BackendCommand> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    fn apply(&self, command: BackendCommand) -> Result<()> {
        let mut state = self.lock();
        if state.failing.contains(command.name()) {
            return Err(Error::Protocol(format!("{} rejected", command.name())));
        }

        match &command {
            BackendCommand::Load(path) => {
                let tracks = state
                    .library
                    .get(path)
                    .cloned()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        Error::UnresolvedReference(format!("No playable tracks under {}", path))
                    })?;
                state.status = PlaybackStatus {
                    state: PlayerState::Stopped,
                    position_secs: 0.0,
                    track: Some(0),
                    track_count: tracks.len() as u32,
                    duration_secs: tracks.first().copied(),
                    volume: state.status.volume,
                };
                state.queue = tracks;
            }
            BackendCommand::Play => {
                if state.queue.is_empty() {
                    return Err(Error::Protocol("Queue is empty".to_string()));
                }
                state.status.state = PlayerState::Playing;
            }
            BackendCommand::Pause => {
                if state.status.state == PlayerState::Playing {
                    state.status.state = PlayerState::Paused;
                }
            }
            BackendCommand::Resume => {
                if state.status.state == PlayerState::Paused {
                    state.status.state = PlayerState::Playing;
                }
            }
            BackendCommand::Stop => {
                state.status.state = PlayerState::Stopped;
                state.status.position_secs = 0.0;
            }
            BackendCommand::Seek(track, secs) => {
                let duration = state.queue.get(*track as usize).copied().ok_or_else(|| {
                    Error::Protocol(format!("Bad song index {}", track))
                })?;
                state.status.track = Some(*track);
                state.status.position_secs = *secs;
                state.status.duration_secs = Some(duration);
            }
            BackendCommand::SetVolume(volume) => state.status.volume = Some(*volume),
            BackendCommand::UpdateLibrary | BackendCommand::Close => {}
        }

        state.commands.push(command);
        Ok(())
    }
}

#[async_trait]
impl PlaybackBackend for MemoryBackend {
    async fn update_library(&mut self) -> Result<()> {
        self.apply(BackendCommand::UpdateLibrary)
    }

    async fn load(&mut self, path: &str) -> Result<u32> {
        self.apply(BackendCommand::Load(path.to_string()))?;
        Ok(self.lock().status.track_count)
    }

    async fn play(&mut self) -> Result<()> {
        self.apply(BackendCommand::Play)
    }

    async fn pause(&mut self) -> Result<()> {
        self.apply(BackendCommand::Pause)
    }

    async fn resume(&mut self) -> Result<()> {
        self.apply(BackendCommand::Resume)
    }

    async fn stop(&mut self) -> Result<()> {
        self.apply(BackendCommand::Stop)
    }

    async fn seek(&mut self, track: u32, position_secs: f64) -> Result<()> {
        self.apply(BackendCommand::Seek(track, position_secs))
    }

    async fn set_volume(&mut self, volume: u8) -> Result<()> {
        self.apply(BackendCommand::SetVolume(volume))
    }

    async fn track_duration(&mut self, track: u32) -> Result<Option<f64>> {
        Ok(self.lock().queue.get(track as usize).copied())
    }

    async fn status(&mut self) -> Result<PlaybackStatus> {
        let mut state = self.lock();
        if state.status_failures > 0 {
            state.status_failures -= 1;
            return Err(Error::HardwareTransient("status query timed out".to_string()));
        }
        Ok(state.status.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.apply(BackendCommand::Close)
    }
}

//! Track Engine
//!
//! Per-track state machine:
//!
//! ```text
//! Empty --record--> Recording --stop--> Ready --play--> Playing --pause--> Paused
//!                                         ^                |  ^               |
//!                                         |                |  +----play-------+
//!                                         +--stop/complete-+
//! Ready --record--> Recording   (a successful take replaces the previous file)
//! ```
//!
//! Mute is orthogonal to the state: a muted track keeps playing (and keeps
//! its position in step with the others) at zero volume.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{DeviceParams, LaunchRequest, PreparedLaunch};
use crate::engine::context::EngineContext;
use crate::engine::io::{patch_wav_header_if_needed, probe_wav, WavInfo};
use crate::engine::process::HandleId;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;

/// Stable track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// First eight hex digits, for file names and logs
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TrackId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(TrackId)
    }
}

/// Lifecycle state of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrackState {
    /// No audio yet
    #[default]
    Empty,
    /// Has audio, not playing
    Ready,
    /// Capturing a take
    Recording,
    Playing,
    /// Stopped mid-file; position retained
    Paused,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackState::Empty => write!(f, "Empty"),
            TrackState::Ready => write!(f, "Ready"),
            TrackState::Recording => write!(f, "Recording"),
            TrackState::Playing => write!(f, "Playing"),
            TrackState::Paused => write!(f, "Paused"),
        }
    }
}

/// Status text for a track row
pub fn status_label(state: TrackState, muted: bool) -> &'static str {
    match (state, muted) {
        (TrackState::Empty, _) => "Empty",
        (TrackState::Ready, _) => "Ready",
        (TrackState::Recording, _) => "Recording…",
        (TrackState::Playing, false) => "Playing…",
        (TrackState::Playing, true) => "Playing (muted)…",
        (TrackState::Paused, false) => "Paused",
        (TrackState::Paused, true) => "Paused (muted)",
    }
}

/// What [`TrackEngine::poll`] observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackCompletion {
    /// The player reached end of stream
    PlaybackFinished,
    /// The recorder exited without being asked to
    RecorderExited,
}

/// The audio file currently backing a track
#[derive(Debug, Clone)]
struct Take {
    path: PathBuf,
    info: WavInfo,
}

#[derive(Debug)]
struct PendingTake {
    handle: HandleId,
    path: PathBuf,
    /// State to return to if the take turns out empty
    previous: TrackState,
}

#[derive(Debug)]
struct Playback {
    handle: HandleId,
    started_at: Instant,
    start_frame: u64,
}

/// One track and its record/playback pipelines
#[derive(Debug)]
pub struct TrackEngine {
    id: TrackId,
    name: String,
    state: TrackState,
    muted: bool,
    take: Option<Take>,
    /// Frame offset; authoritative whenever the track is not playing
    position: u64,
    recording: Option<PendingTake>,
    playback: Option<Playback>,
}

impl TrackEngine {
    /// Create an empty track
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(TrackId::new(), name)
    }

    pub fn with_id(id: TrackId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: TrackState::Empty,
            muted: false,
            take: None,
            position: 0,
            recording: None,
            playback: None,
        }
    }

    /// Re-hydrate a track from an existing take
    ///
    /// # Errors
    /// * `Io` / `Format` - If the file is missing or not a readable WAV
    pub fn from_file(id: TrackId, name: impl Into<String>, path: &Path, muted: bool) -> Result<Self> {
        let info = probe_wav(path)?;
        let mut track = Self::with_id(id, name);
        track.muted = muted;
        if info.frames > 0 {
            track.take = Some(Take {
                path: path.to_path_buf(),
                info,
            });
            track.state = TrackState::Ready;
        }
        Ok(track)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Whether the track has audio to play or export
    pub fn has_content(&self) -> bool {
        self.take.is_some()
    }

    /// Backing file, if any
    pub fn file(&self) -> Option<&Path> {
        self.take.as_ref().map(|t| t.path.as_path())
    }

    /// File the active recorder is writing, if any
    pub fn pending_file(&self) -> Option<&Path> {
        self.recording.as_ref().map(|r| r.path.as_path())
    }

    pub fn wav_info(&self) -> Option<WavInfo> {
        self.take.as_ref().map(|t| t.info)
    }

    /// Length of the take in frames
    pub fn total_frames(&self) -> u64 {
        self.take.as_ref().map_or(0, |t| t.info.frames)
    }

    pub fn label(&self) -> &'static str {
        status_label(self.state, self.muted)
    }

    /// Current playback position in frames
    ///
    /// While playing this is derived from the clock; otherwise it is the
    /// stored offset (0 unless paused).
    pub fn position(&self, ctx: &EngineContext) -> u64 {
        match (&self.playback, &self.take) {
            (Some(playback), Some(take)) if self.state == TrackState::Playing => {
                let elapsed = ctx.clock.now().saturating_duration_since(playback.started_at);
                let frames = (elapsed.as_nanos() * take.info.sample_rate as u128 / 1_000_000_000) as u64;
                (playback.start_frame + frames).min(take.info.frames)
            }
            _ => self.position,
        }
    }

    /// Current playback position in seconds
    pub fn position_secs(&self, ctx: &EngineContext) -> f64 {
        match &self.take {
            Some(take) => self.position(ctx) as f64 / take.info.sample_rate as f64,
            None => 0.0,
        }
    }

    fn owner(&self) -> String {
        format!("track:{}", self.id.short())
    }

    fn set_state(&mut self, ctx: &EngineContext, to: TrackState) {
        let from = self.state;
        self.state = to;
        if from != to {
            debug!("Track '{}': {} -> {}", self.name, from, to);
            ctx.emit(EngineEvent::TrackStateChanged {
                id: self.id,
                from,
                to,
                muted: self.muted,
            });
        }
    }

    fn allocate_take_path(&self, ctx: &EngineContext) -> Result<PathBuf> {
        let dir = ctx.audio_dir();
        fs::create_dir_all(dir).map_err(|e| EngineError::io(dir, e))?;
        let take = Uuid::new_v4().simple().to_string();
        Ok(dir.join(format!("{}-{}.wav", self.id.short(), &take[..8])))
    }

    /// Swap in a new take and delete the file it replaces
    fn replace_take(&mut self, take: Take) {
        if let Some(old) = self.take.replace(take) {
            discard_file(&old.path);
        }
        self.position = 0;
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Start capturing a new take
    ///
    /// # Errors
    /// * `InvalidState` - Unless the track is Empty or Ready
    /// * `Conflict` - If another track is recording
    /// * `Launch` - If the recorder cannot start (track state is unchanged)
    pub fn record(&mut self, ctx: &EngineContext) -> Result<()> {
        self.reap_finished_player(ctx);
        match self.state {
            TrackState::Empty | TrackState::Ready => {}
            state => {
                return Err(EngineError::InvalidState {
                    operation: "record",
                    state,
                })
            }
        }

        ctx.claim_recording(self.id)?;

        let started = self.allocate_take_path(ctx).and_then(|path| {
            let request = LaunchRequest::record(&path, ctx.device_params());
            match ctx.supervisor.start(request, &self.owner()) {
                Ok(handle) => Ok((handle, path)),
                Err(e) => {
                    discard_file(&path);
                    Err(e)
                }
            }
        });

        let (handle, path) = match started {
            Ok(started) => started,
            Err(e) => {
                ctx.release_recording(self.id);
                return Err(e);
            }
        };

        info!("Track '{}' recording to {}", self.name, path.display());
        self.recording = Some(PendingTake {
            handle,
            path,
            previous: self.state,
        });
        self.set_state(ctx, TrackState::Recording);
        Ok(())
    }

    /// Finish the current take
    ///
    /// A take with no frames is discarded and the track returns to the state
    /// it had before `record`.
    ///
    /// # Errors
    /// * `InvalidState` - Unless the track is Recording
    pub fn stop_recording(&mut self, ctx: &EngineContext) -> Result<()> {
        if self.state != TrackState::Recording {
            return Err(EngineError::InvalidState {
                operation: "stop recording",
                state: self.state,
            });
        }
        let Some(pending) = self.recording.take() else {
            return Err(EngineError::InvalidState {
                operation: "stop recording",
                state: self.state,
            });
        };

        ctx.supervisor.stop(pending.handle);
        ctx.release_recording(self.id);
        self.finish_take(ctx, pending);
        Ok(())
    }

    fn finish_take(&mut self, ctx: &EngineContext, pending: PendingTake) {
        if pending.path.exists() {
            if let Err(e) = patch_wav_header_if_needed(&pending.path) {
                warn!("Could not repair header of {}: {}", pending.path.display(), e);
            }
        }

        match probe_wav(&pending.path) {
            Ok(info) if info.frames > 0 => {
                info!(
                    "Track '{}' captured {:.2}s",
                    self.name,
                    info.duration_secs()
                );
                self.replace_take(Take {
                    path: pending.path,
                    info,
                });
                self.set_state(ctx, TrackState::Ready);
            }
            _ => {
                info!("Track '{}' captured nothing; take discarded", self.name);
                discard_file(&pending.path);
                self.set_state(ctx, pending.previous);
            }
        }
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Start (or resume) playback from the stored position
    ///
    /// Playing an already playing track is a no-op.
    ///
    /// # Errors
    /// * `InvalidState` - If the track is Empty or Recording
    /// * `Launch` - If the player cannot start
    pub fn play(&mut self, ctx: &EngineContext) -> Result<()> {
        match self.prepare_play(ctx)? {
            Some(prepared) => self.commit_play(ctx, prepared),
            None => Ok(()),
        }
    }

    /// Validate and prepare a play launch without spawning it
    ///
    /// Returns `None` if the track is already playing.
    pub(crate) fn prepare_play(&mut self, ctx: &EngineContext) -> Result<Option<PreparedLaunch>> {
        self.reap_finished_player(ctx);
        match self.state {
            TrackState::Playing => return Ok(None),
            TrackState::Ready | TrackState::Paused => {}
            state => {
                return Err(EngineError::InvalidState {
                    operation: "play",
                    state,
                })
            }
        }
        self.prepare_player(ctx).map(Some)
    }

    fn prepare_player(&mut self, ctx: &EngineContext) -> Result<PreparedLaunch> {
        let Some(take) = &self.take else {
            return Err(EngineError::InvalidState {
                operation: "play",
                state: TrackState::Empty,
            });
        };
        if self.position >= take.info.frames {
            self.position = 0;
        }

        let params = DeviceParams {
            sample_rate: take.info.sample_rate,
            channels: take.info.channels,
            latency: None,
            start_frame: self.position,
            volume: if self.muted { 0.0 } else { 1.0 },
        };
        ctx.supervisor.prepare(LaunchRequest::play(&take.path, params))
    }

    /// Spawn a launch produced by [`prepare_play`](Self::prepare_play)
    pub(crate) fn commit_play(&mut self, ctx: &EngineContext, prepared: PreparedLaunch) -> Result<()> {
        self.playback = Some(self.spawn_player(ctx, prepared)?);
        self.set_state(ctx, TrackState::Playing);
        Ok(())
    }

    fn spawn_player(&self, ctx: &EngineContext, prepared: PreparedLaunch) -> Result<Playback> {
        let start_frame = prepared.request.params.start_frame;
        let handle = ctx.supervisor.start_prepared(prepared, &self.owner())?;
        Ok(Playback {
            handle,
            started_at: ctx.clock.now(),
            start_frame,
        })
    }

    /// Capture the position, then stop the player
    fn halt_player(&mut self, ctx: &EngineContext) {
        let position = self.position(ctx);
        if let Some(playback) = self.playback.take() {
            ctx.supervisor.stop(playback.handle);
        }
        self.position = position;
    }

    /// Pause, keeping the exact frame reached
    ///
    /// # Errors
    /// * `InvalidState` - Unless the track is Playing
    pub fn pause(&mut self, ctx: &EngineContext) -> Result<()> {
        self.reap_finished_player(ctx);
        if self.state != TrackState::Playing {
            return Err(EngineError::InvalidState {
                operation: "pause",
                state: self.state,
            });
        }
        self.halt_player(ctx);
        debug!("Track '{}' paused at frame {}", self.name, self.position);
        self.set_state(ctx, TrackState::Paused);
        Ok(())
    }

    /// Stop playback and rewind to the start
    ///
    /// # Errors
    /// * `InvalidState` - Unless the track is Playing or Paused
    pub fn stop(&mut self, ctx: &EngineContext) -> Result<()> {
        self.reap_finished_player(ctx);
        match self.state {
            TrackState::Playing | TrackState::Paused => {}
            state => {
                return Err(EngineError::InvalidState {
                    operation: "stop",
                    state,
                })
            }
        }
        if let Some(playback) = self.playback.take() {
            ctx.supervisor.stop(playback.handle);
        }
        self.position = 0;
        self.set_state(ctx, TrackState::Ready);
        Ok(())
    }

    /// Mute or unmute without touching the transport state
    ///
    /// A playing track is relaunched at its current position with the new
    /// volume. The replacement starts before the old player is stopped; one
    /// of the two is always silent. On failure nothing changes.
    pub fn set_muted(&mut self, ctx: &EngineContext, muted: bool) -> Result<()> {
        self.reap_finished_player(ctx);
        if self.muted == muted {
            return Ok(());
        }

        if self.state == TrackState::Playing {
            let previous = self.muted;
            let resume_at = self.position(ctx);
            let held = self.position;
            self.muted = muted;
            self.position = resume_at;
            let relaunched = self
                .prepare_player(ctx)
                .and_then(|prepared| self.spawn_player(ctx, prepared));
            match relaunched {
                Ok(playback) => {
                    if let Some(old) = self.playback.replace(playback) {
                        ctx.supervisor.stop(old.handle);
                    }
                }
                Err(e) => {
                    self.muted = previous;
                    self.position = held;
                    return Err(e);
                }
            }
        } else {
            self.muted = muted;
        }

        ctx.emit(EngineEvent::TrackStateChanged {
            id: self.id,
            from: self.state,
            to: self.state,
            muted,
        });
        Ok(())
    }

    /// Set the flag on a track with no pipeline, without notifying
    pub(crate) fn mark_muted(&mut self) {
        self.muted = true;
    }

    /// Change the display name
    pub fn rename(&mut self, ctx: &EngineContext, name: impl Into<String>) {
        self.name = name.into();
        ctx.emit(EngineEvent::TrackRenamed {
            id: self.id,
            name: self.name.clone(),
        });
    }

    // ========================================================================
    // Import / teardown
    // ========================================================================

    /// Use an existing WAV file as this track's audio
    ///
    /// The file is copied into the project's audio directory.
    ///
    /// # Errors
    /// * `InvalidState` - Unless the track is Empty or Ready
    /// * `Format` - If the source is not a WAV file or has no frames
    /// * `Io` - If the source is missing or the copy fails
    pub fn import_file(&mut self, ctx: &EngineContext, source: &Path) -> Result<()> {
        self.reap_finished_player(ctx);
        match self.state {
            TrackState::Empty | TrackState::Ready => {}
            state => {
                return Err(EngineError::InvalidState {
                    operation: "import",
                    state,
                })
            }
        }

        let info = probe_wav(source)?;
        if info.frames == 0 {
            return Err(EngineError::Format {
                path: source.to_path_buf(),
                reason: "file contains no audio frames".to_string(),
            });
        }

        let dest = self.allocate_take_path(ctx)?;
        if let Err(e) = fs::copy(source, &dest) {
            discard_file(&dest);
            return Err(EngineError::io(source, e));
        }

        info!("Track '{}' imported {}", self.name, source.display());
        self.replace_take(Take { path: dest, info });
        self.set_state(ctx, TrackState::Ready);
        Ok(())
    }

    /// Stop every pipeline this track owns ahead of deletion
    ///
    /// Returns the backing file for the caller to remove.
    pub(crate) fn teardown(&mut self, ctx: &EngineContext) -> Option<PathBuf> {
        if let Some(pending) = self.recording.take() {
            ctx.supervisor.stop(pending.handle);
            ctx.release_recording(self.id);
            discard_file(&pending.path);
        }
        if let Some(playback) = self.playback.take() {
            ctx.supervisor.stop(playback.handle);
        }
        self.position = 0;
        self.state = TrackState::Empty;
        self.take.take().map(|t| t.path)
    }

    /// Return a track whose player hit end of stream to Ready at the start
    fn reap_finished_player(&mut self, ctx: &EngineContext) -> bool {
        if self.state != TrackState::Playing {
            return false;
        }
        let Some(handle) = self.playback.as_ref().map(|p| p.handle) else {
            return false;
        };
        if ctx.supervisor.is_alive(handle) {
            return false;
        }
        ctx.supervisor.stop(handle);
        self.playback = None;
        self.position = 0;
        self.set_state(ctx, TrackState::Ready);
        ctx.emit(EngineEvent::PlaybackCompleted { id: self.id });
        true
    }

    /// Check whether a pipeline ended on its own
    pub fn poll(&mut self, ctx: &EngineContext) -> Option<TrackCompletion> {
        match self.state {
            TrackState::Playing => self
                .reap_finished_player(ctx)
                .then_some(TrackCompletion::PlaybackFinished),
            TrackState::Recording => {
                let handle = self.recording.as_ref()?.handle;
                if ctx.supervisor.is_alive(handle) {
                    return None;
                }
                warn!("Recorder for track '{}' exited unexpectedly", self.name);
                let pending = self.recording.take()?;
                ctx.supervisor.stop(pending.handle);
                ctx.release_recording(self.id);
                self.finish_take(ctx, pending);
                ctx.notifier.error(
                    format!("track '{}'", self.name),
                    "recorder exited unexpectedly",
                );
                Some(TrackCompletion::RecorderExited)
            }
            _ => None,
        }
    }
}

/// Remove a file the engine owns, logging instead of failing
pub(crate) fn discard_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

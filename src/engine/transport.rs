//! Transport and session control
//!
//! The [`TransportController`] owns the ordered track list and the monitor,
//! and is the single entry point for commands: per-track commands by id,
//! group operations (play-all / pause-all / toggle / stop-all), monitoring,
//! export and project persistence.
//!
//! The global transport state is never set directly. It is derived from the
//! track states after every command and every poll.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::engine::context::EngineContext;
use crate::engine::mixdown::{self, ExportReport, MixReport, MixSource};
use crate::engine::monitor::{MonitorEngine, MonitorLatency, MonitorState};
use crate::engine::track::{discard_file, TrackCompletion, TrackEngine, TrackId, TrackState};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::project::{self, ProjectManifest, TrackEntry};

/// Session-wide transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Nothing playing or paused (default state)
    #[default]
    Stopped,
    /// At least one track is playing
    Playing,
    /// Nothing playing, at least one track paused
    Paused,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "Stopped"),
            TransportState::Playing => write!(f, "Playing"),
            TransportState::Paused => write!(f, "Paused"),
        }
    }
}

/// Derive the transport state from the track states
pub fn derive_transport_state<I>(states: I) -> TransportState
where
    I: IntoIterator<Item = TrackState>,
{
    let mut paused = false;
    for state in states {
        match state {
            TrackState::Playing => return TransportState::Playing,
            TrackState::Paused => paused = true,
            _ => {}
        }
    }
    if paused {
        TransportState::Paused
    } else {
        TransportState::Stopped
    }
}

/// Outcome of a group operation
///
/// Group operations are best-effort: one track failing does not stop the
/// others.
#[derive(Debug, Default)]
pub struct GroupReport {
    /// Tracks the operation changed
    pub affected: Vec<TrackId>,
    pub failures: Vec<(TrackId, EngineError)>,
}

impl GroupReport {
    pub fn is_noop(&self) -> bool {
        self.affected.is_empty() && self.failures.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, id: TrackId, result: Result<()>) {
        match result {
            Ok(()) => self.affected.push(id),
            Err(e) => {
                warn!("Track {} failed: {}", id, e);
                self.failures.push((id, e));
            }
        }
    }
}

/// Project directory a session is bound to
#[derive(Debug, Clone)]
struct ProjectBinding {
    dir: PathBuf,
    manifest: ProjectManifest,
}

/// Owner of the session: tracks, monitor and derived transport state
#[derive(Debug)]
pub struct TransportController {
    ctx: EngineContext,
    tracks: Vec<TrackEngine>,
    monitor: MonitorEngine,
    state: TransportState,
    dirty: bool,
    next_track_number: u32,
    project: Option<ProjectBinding>,
}

impl TransportController {
    /// Create an empty session that is not bound to a project directory
    pub fn new(ctx: EngineContext) -> Self {
        let latency = MonitorLatency::try_from(ctx.config.monitor_latency).unwrap_or_else(|e| {
            warn!("{}; using {}", e, MonitorLatency::default());
            MonitorLatency::default()
        });
        Self {
            ctx,
            tracks: Vec::new(),
            monitor: MonitorEngine::new(latency),
            state: TransportState::Stopped,
            dirty: false,
            next_track_number: 1,
            project: None,
        }
    }

    /// Open the project in `dir`, creating it if there is none
    ///
    /// Tracks whose take exists load as Ready; tracks whose take is missing
    /// or unreadable load as Empty with a warning.
    ///
    /// # Errors
    /// * `Io` - If the directory cannot be created or the manifest read
    /// * `InvalidProject` - If the manifest is malformed
    pub fn open(dir: &Path, mut ctx: EngineContext) -> Result<Self> {
        let audio_dir = project::audio_dir(dir);
        std::fs::create_dir_all(&audio_dir).map_err(|e| EngineError::io(&audio_dir, e))?;
        ctx.set_audio_dir(&audio_dir);

        let (manifest, fresh) = if project::is_project(dir) {
            (ProjectManifest::load(dir)?, false)
        } else {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "Untitled".to_string());
            (ProjectManifest::new(name), true)
        };

        let mut controller = Self::new(ctx);
        for entry in &manifest.tracks {
            controller.tracks.push(load_track(dir, &manifest, entry));
        }
        controller.next_track_number = manifest
            .next_track_number
            .max(manifest.tracks.len() as u32 + 1);
        controller.project = Some(ProjectBinding {
            dir: dir.to_path_buf(),
            manifest,
        });

        if fresh {
            controller.save()?;
            info!("Created project at {}", dir.display());
        } else {
            info!(
                "Opened project at {} ({} track(s))",
                dir.display(),
                controller.tracks.len()
            );
        }
        Ok(controller)
    }

    /// Write the manifest and purge audio files nothing references
    ///
    /// # Errors
    /// * `InvalidProject` - If the session is not bound to a directory
    /// * `Io` / `Serialization` - If the manifest cannot be written
    pub fn save(&mut self) -> Result<()> {
        let Some(binding) = self.project.as_mut() else {
            return Err(EngineError::InvalidProject {
                path: self.ctx.audio_dir().to_path_buf(),
                reason: "session is not bound to a project directory".to_string(),
            });
        };

        let dir = binding.dir.clone();
        binding.manifest.next_track_number = self.next_track_number;
        binding.manifest.tracks = self
            .tracks
            .iter()
            .map(|track| TrackEntry {
                id: track.id(),
                name: track.name().to_string(),
                file: track
                    .file()
                    .map(|f| project::relative_take_path(&dir, f)),
                muted: track.is_muted(),
            })
            .collect();
        binding.manifest.save(&dir)?;

        let keep: HashSet<PathBuf> = self
            .tracks
            .iter()
            .flat_map(|t| [t.file(), t.pending_file()])
            .flatten()
            .map(Path::to_path_buf)
            .collect();
        project::purge_unreferenced(self.ctx.audio_dir(), &keep);

        self.dirty = false;
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.ctx
    }

    pub fn tracks(&self) -> &[TrackEngine] {
        &self.tracks
    }

    /// # Errors
    /// * `TrackNotFound` - If no track has this id
    pub fn track(&self, id: TrackId) -> Result<&TrackEngine> {
        self.tracks
            .iter()
            .find(|t| t.id() == id)
            .ok_or_else(|| not_found(id))
    }

    /// Resolve a 1-based track number, a full id, or an id prefix
    pub fn find_track(&self, key: &str) -> Option<TrackId> {
        if let Ok(n) = key.parse::<usize>() {
            return n.checked_sub(1).and_then(|i| self.tracks.get(i)).map(|t| t.id());
        }
        if let Ok(id) = key.parse::<TrackId>() {
            return self.tracks.iter().find(|t| t.id() == id).map(|t| t.id());
        }
        let mut matches = self
            .tracks
            .iter()
            .filter(|t| t.id().to_string().starts_with(key) || t.name() == key);
        match (matches.next(), matches.next()) {
            (Some(track), None) => Some(track.id()),
            _ => None,
        }
    }

    pub fn transport_state(&self) -> TransportState {
        self.state
    }

    pub fn monitor_state(&self) -> MonitorState {
        self.monitor.state()
    }

    /// Track currently recording, if any
    pub fn recording_track(&self) -> Option<TrackId> {
        self.ctx.recording_holder()
    }

    /// Playback position of a track in frames
    pub fn position(&self, id: TrackId) -> Result<u64> {
        Ok(self.track(id)?.position(&self.ctx))
    }

    /// Whether there are changes since the last save
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn project_dir(&self) -> Option<&Path> {
        self.project.as_ref().map(|p| p.dir.as_path())
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.manifest.name.as_str())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn index_of(&self, id: TrackId) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.id() == id)
            .ok_or_else(|| not_found(id))
    }

    /// Recompute the global state and announce a change
    fn refresh_state(&mut self) {
        let next = derive_transport_state(self.tracks.iter().map(TrackEngine::state));
        if next != self.state {
            debug!("Transport: {} -> {}", self.state, next);
            self.ctx.emit(EngineEvent::TransportChanged {
                from: self.state,
                to: next,
            });
            self.state = next;
        }
    }

    /// Run a command against one track, then refresh the transport state
    fn with_track<T>(
        &mut self,
        id: TrackId,
        op: impl FnOnce(&mut TrackEngine, &EngineContext) -> Result<T>,
    ) -> Result<T> {
        let index = self.index_of(id)?;
        let result = op(&mut self.tracks[index], &self.ctx);
        self.refresh_state();
        result
    }

    // ========================================================================
    // Track list
    // ========================================================================

    /// Append an empty track
    ///
    /// Without a name the track is called "Track N" from a session counter.
    pub fn add_track(&mut self, name: Option<&str>) -> TrackId {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("Track {}", self.next_track_number),
        };
        self.next_track_number += 1;

        let track = TrackEngine::new(name);
        let id = track.id();
        info!("Added track '{}'", track.name());
        self.ctx.emit(EngineEvent::TrackAdded {
            id,
            name: track.name().to_string(),
        });
        self.tracks.push(track);
        self.dirty = true;
        id
    }

    /// Remove a track, stopping its pipelines and deleting its take
    pub fn delete_track(&mut self, id: TrackId) -> Result<()> {
        let index = self.index_of(id)?;
        let mut track = self.tracks.remove(index);
        if let Some(file) = track.teardown(&self.ctx) {
            discard_file(&file);
        }
        info!("Deleted track '{}'", track.name());
        self.ctx.emit(EngineEvent::TrackRemoved { id });
        self.dirty = true;
        self.refresh_state();
        Ok(())
    }

    pub fn rename(&mut self, id: TrackId, name: &str) -> Result<()> {
        self.with_track(id, |track, ctx| {
            track.rename(ctx, name);
            Ok(())
        })?;
        self.dirty = true;
        Ok(())
    }

    // ========================================================================
    // Per-track commands
    // ========================================================================

    pub fn record(&mut self, id: TrackId) -> Result<()> {
        self.with_track(id, |track, ctx| track.record(ctx))
    }

    pub fn stop_recording(&mut self, id: TrackId) -> Result<()> {
        self.with_track(id, |track, ctx| track.stop_recording(ctx))?;
        self.dirty = true;
        Ok(())
    }

    pub fn play(&mut self, id: TrackId) -> Result<()> {
        self.with_track(id, |track, ctx| track.play(ctx))
    }

    pub fn pause(&mut self, id: TrackId) -> Result<()> {
        self.with_track(id, |track, ctx| track.pause(ctx))
    }

    pub fn stop(&mut self, id: TrackId) -> Result<()> {
        self.with_track(id, |track, ctx| track.stop(ctx))
    }

    pub fn set_muted(&mut self, id: TrackId, muted: bool) -> Result<()> {
        let changed = self.track(id)?.is_muted() != muted;
        self.with_track(id, |track, ctx| track.set_muted(ctx, muted))?;
        if changed {
            self.dirty = true;
        }
        Ok(())
    }

    pub fn import_file(&mut self, id: TrackId, source: &Path) -> Result<()> {
        self.with_track(id, |track, ctx| track.import_file(ctx, source))?;
        self.dirty = true;
        Ok(())
    }

    // ========================================================================
    // Group operations
    // ========================================================================

    /// Play every Ready or Paused track from its own position
    ///
    /// All launches are prepared first and then spawned back-to-back so the
    /// tracks start as close together as possible.
    pub fn play_all(&mut self) -> GroupReport {
        self.settle();
        let mut report = GroupReport::default();
        let mut prepared = Vec::new();

        for (index, track) in self.tracks.iter_mut().enumerate() {
            if !matches!(track.state(), TrackState::Ready | TrackState::Paused) || !track.has_content() {
                continue;
            }
            match track.prepare_play(&self.ctx) {
                Ok(Some(launch)) => prepared.push((index, launch)),
                Ok(None) => {}
                Err(e) => report.record(track.id(), Err(e)),
            }
        }

        for (index, launch) in prepared {
            let track = &mut self.tracks[index];
            let result = track.commit_play(&self.ctx, launch);
            report.record(track.id(), result);
        }

        self.refresh_state();
        report
    }

    /// Pause every playing track
    pub fn pause_all(&mut self) -> GroupReport {
        self.settle();
        let mut report = GroupReport::default();
        for track in self.tracks.iter_mut() {
            if track.state() == TrackState::Playing {
                let result = track.pause(&self.ctx);
                report.record(track.id(), result);
            }
        }
        self.refresh_state();
        report
    }

    /// Pause everything if playing, otherwise play everything
    pub fn toggle(&mut self) -> GroupReport {
        self.settle();
        if self.state == TransportState::Playing {
            self.pause_all()
        } else {
            self.play_all()
        }
    }

    /// Stop every playing or paused track and rewind it
    pub fn stop_all(&mut self) -> GroupReport {
        self.settle();
        let mut report = GroupReport::default();
        for track in self.tracks.iter_mut() {
            if matches!(track.state(), TrackState::Playing | TrackState::Paused) {
                let result = track.stop(&self.ctx);
                report.record(track.id(), result);
            }
        }
        self.refresh_state();
        report
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// Turn monitoring on at the stored latency
    pub fn enable_monitor(&mut self) -> Result<()> {
        let latency = self.monitor.latency();
        self.monitor.enable(&self.ctx, latency)
    }

    pub fn disable_monitor(&mut self) {
        self.monitor.disable(&self.ctx);
    }

    /// # Errors
    /// * `InvalidLatency` - If `samples` is not one of the supported sizes
    pub fn set_monitor_latency(&mut self, samples: u32) -> Result<()> {
        let latency = MonitorLatency::try_from(samples)?;
        self.monitor.set_latency(&self.ctx, latency)
    }

    // ========================================================================
    // Completion handling
    // ========================================================================

    /// Observe pipelines that ended on their own
    ///
    /// Finished players return their track to Ready; a dead recorder is
    /// finalized; a dead monitor turns monitoring off.
    pub fn poll(&mut self) -> Vec<(TrackId, TrackCompletion)> {
        let mut completions = Vec::new();
        for track in self.tracks.iter_mut() {
            if let Some(completion) = track.poll(&self.ctx) {
                if completion == TrackCompletion::RecorderExited {
                    self.dirty = true;
                }
                completions.push((track.id(), completion));
            }
        }
        self.monitor.poll(&self.ctx);
        self.refresh_state();
        completions
    }

    /// Fold in pipelines that ended since the last poll before a group command
    fn settle(&mut self) {
        let finished = self.poll();
        if !finished.is_empty() {
            debug!("{} pipeline(s) ended before the group command", finished.len());
        }
    }

    /// Bring everything down
    ///
    /// An active recording is finalized so the take is kept. Returns how
    /// many processes the final registry sweep had to terminate.
    pub fn shutdown(&mut self) -> usize {
        if let Some(id) = self.ctx.recording_holder() {
            if let Ok(index) = self.index_of(id) {
                if let Err(e) = self.tracks[index].stop_recording(&self.ctx) {
                    warn!("Could not finalize recording on shutdown: {}", e);
                }
                self.dirty = true;
            }
        }
        for track in self.tracks.iter_mut() {
            if matches!(track.state(), TrackState::Playing | TrackState::Paused) {
                if let Err(e) = track.stop(&self.ctx) {
                    warn!("Could not stop '{}' on shutdown: {}", track.name(), e);
                }
            }
        }
        self.monitor.disable(&self.ctx);
        let swept = self.ctx.supervisor.shutdown();
        self.refresh_state();
        swept
    }

    // ========================================================================
    // Export
    // ========================================================================

    fn mix_sources(&self) -> Vec<MixSource> {
        self.tracks.iter().map(MixSource::from).collect()
    }

    /// # Errors
    /// * `TrackNotFound`, `EmptyTrack`, `Io`
    pub fn export_track(&self, id: TrackId, dest: &Path) -> Result<()> {
        mixdown::export_track(&MixSource::from(self.track(id)?), dest)
    }

    /// # Errors
    /// * `NothingToMix` - If no track is audible
    pub fn export_mixed(&self, dest: &Path) -> Result<MixReport> {
        mixdown::export_mixed(&self.mix_sources(), dest)
    }

    pub fn export_all(&self, dir: &Path) -> ExportReport {
        mixdown::export_all(&self.mix_sources(), dir)
    }
}

impl Drop for TransportController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn not_found(id: TrackId) -> EngineError {
    EngineError::TrackNotFound { id: id.to_string() }
}

fn load_track(dir: &Path, manifest: &ProjectManifest, entry: &TrackEntry) -> TrackEngine {
    let Some(path) = manifest.resolve(dir, entry) else {
        return empty_track(entry);
    };
    if !path.exists() {
        warn!(
            "Take for track '{}' is missing ({}); loading it empty",
            entry.name,
            path.display()
        );
        return empty_track(entry);
    }
    match TrackEngine::from_file(entry.id, &entry.name, &path, entry.muted) {
        Ok(track) => track,
        Err(e) => {
            warn!("Take for track '{}' is unreadable: {}; loading it empty", entry.name, e);
            empty_track(entry)
        }
    }
}

fn empty_track(entry: &TrackEntry) -> TrackEngine {
    let mut track = TrackEngine::with_id(entry.id, &entry.name);
    if entry.muted {
        track.mark_muted();
    }
    track
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, ProcessRole};
    use crate::config::EngineConfig;
    use crate::engine::clock::ManualClock;
    use crate::engine::process::ProcessSupervisor;
    use crate::events::EventLog;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Session {
        transport: TransportController,
        backend: MockBackend,
        clock: Arc<ManualClock>,
        events: Arc<EventLog>,
        _dir: TempDir,
    }

    fn session() -> Session {
        let dir = tempdir().unwrap();
        let backend = MockBackend::new();
        backend.set_recording(48000, 1000);
        let clock = Arc::new(ManualClock::new());
        let events = Arc::new(EventLog::new());
        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::new(backend.clone()),
            Duration::from_millis(20),
        ));
        let mut ctx = EngineContext::new(EngineConfig::default(), supervisor, dir.path().join("audio"))
            .with_clock(clock.clone());
        ctx.subscribe(events.clone());
        Session {
            transport: TransportController::new(ctx),
            backend,
            clock,
            events,
            _dir: dir,
        }
    }

    fn recorded(s: &mut Session) -> TrackId {
        let id = s.transport.add_track(None);
        s.transport.record(id).unwrap();
        s.transport.stop_recording(id).unwrap();
        id
    }

    // ========================================================================
    // Derived State Tests
    // ========================================================================

    #[test]
    fn test_derive_transport_state() {
        use TrackState::*;
        assert_eq!(derive_transport_state([]), TransportState::Stopped);
        assert_eq!(derive_transport_state([Ready, Empty]), TransportState::Stopped);
        assert_eq!(derive_transport_state([Paused, Ready]), TransportState::Paused);
        assert_eq!(derive_transport_state([Paused, Playing]), TransportState::Playing);
        assert_eq!(derive_transport_state([Recording]), TransportState::Stopped);
    }

    #[test]
    fn test_tracks_are_auto_named() {
        let mut s = session();
        let a = s.transport.add_track(None);
        let b = s.transport.add_track(Some("Bass"));
        let c = s.transport.add_track(None);

        assert_eq!(s.transport.track(a).unwrap().name(), "Track 1");
        assert_eq!(s.transport.track(b).unwrap().name(), "Bass");
        assert_eq!(s.transport.track(c).unwrap().name(), "Track 3");
        assert!(s.transport.is_dirty());
    }

    #[test]
    fn test_unknown_track_is_not_found() {
        let mut s = session();
        let err = s.transport.play(TrackId::new()).unwrap_err();
        assert_eq!(err.error_code(), "TRACK_NOT_FOUND");
    }

    #[test]
    fn test_find_track_by_number_and_name() {
        let mut s = session();
        let a = s.transport.add_track(None);
        let b = s.transport.add_track(Some("Bass"));
        assert_eq!(s.transport.find_track("1"), Some(a));
        assert_eq!(s.transport.find_track("Bass"), Some(b));
        assert_eq!(s.transport.find_track("9"), None);
        assert_eq!(s.transport.find_track(&b.to_string()), Some(b));
    }

    // ========================================================================
    // Group Operation Tests
    // ========================================================================

    #[test]
    fn test_play_all_with_nothing_playable_is_noop() {
        let mut s = session();
        s.transport.add_track(None);
        let report = s.transport.play_all();
        assert!(report.is_noop());
        assert_eq!(s.transport.transport_state(), TransportState::Stopped);
    }

    #[test]
    fn test_play_all_then_pause_all() {
        let mut s = session();
        let a = recorded(&mut s);
        let b = recorded(&mut s);
        s.transport.add_track(None);

        let report = s.transport.play_all();
        assert_eq!(report.affected, vec![a, b]);
        assert_eq!(s.transport.transport_state(), TransportState::Playing);
        assert_eq!(s.backend.live_count_for(ProcessRole::Play), 2);

        s.clock.advance(Duration::from_millis(500));
        s.transport.pause_all();
        assert_eq!(s.transport.transport_state(), TransportState::Paused);
        assert_eq!(s.transport.position(a).unwrap(), 24000);
        assert_eq!(s.transport.position(b).unwrap(), 24000);
    }

    #[test]
    fn test_pause_all_with_nothing_playing_keeps_state() {
        let mut s = session();
        recorded(&mut s);
        let report = s.transport.pause_all();
        assert!(report.is_noop());
        assert_eq!(s.transport.transport_state(), TransportState::Stopped);
    }

    #[test]
    fn test_toggle_alternates() {
        let mut s = session();
        recorded(&mut s);

        s.transport.toggle();
        assert_eq!(s.transport.transport_state(), TransportState::Playing);
        s.transport.toggle();
        assert_eq!(s.transport.transport_state(), TransportState::Paused);
        s.transport.toggle();
        assert_eq!(s.transport.transport_state(), TransportState::Playing);
    }

    #[test]
    fn test_play_all_leaves_playing_tracks_alone() {
        let mut s = session();
        let a = recorded(&mut s);
        let b = recorded(&mut s);
        s.transport.play(a).unwrap();
        let launches = s.backend.launches().len();

        let report = s.transport.play_all();
        assert_eq!(report.affected, vec![b]);
        assert_eq!(s.backend.launches().len(), launches + 1);
    }

    #[test]
    fn test_stop_all_then_play_all_restarts_from_zero() {
        let mut s = session();
        let a = recorded(&mut s);
        s.transport.play_all();
        s.clock.advance(Duration::from_millis(300));
        s.transport.pause_all();

        s.transport.stop_all();
        assert_eq!(s.transport.transport_state(), TransportState::Stopped);
        assert_eq!(s.transport.track(a).unwrap().state(), TrackState::Ready);

        s.transport.play_all();
        let launch = s.backend.last_launch(ProcessRole::Play).unwrap();
        assert_eq!(launch.params.start_frame, 0);
    }

    #[test]
    fn test_play_all_is_best_effort() {
        let mut s = session();
        let a = recorded(&mut s);
        let b = recorded(&mut s);
        let file = s.transport.track(a).unwrap().file().unwrap().to_path_buf();
        std::fs::remove_file(file).unwrap();

        let report = s.transport.play_all();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, a);
        assert_eq!(report.affected, vec![b]);
        assert_eq!(s.transport.transport_state(), TransportState::Playing);
    }

    #[test]
    fn test_transport_changes_are_announced() {
        let mut s = session();
        recorded(&mut s);
        s.events.clear();

        s.transport.play_all();
        s.transport.stop_all();

        let changes: Vec<_> = s
            .events
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::TransportChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                (TransportState::Stopped, TransportState::Playing),
                (TransportState::Playing, TransportState::Stopped),
            ]
        );
    }

    // ========================================================================
    // Completion and Teardown Tests
    // ========================================================================

    #[test]
    fn test_poll_returns_finished_tracks_to_ready() {
        let mut s = session();
        let a = recorded(&mut s);
        s.transport.play_all();

        s.backend.finish_playback();
        let completions = s.transport.poll();

        assert_eq!(completions, vec![(a, TrackCompletion::PlaybackFinished)]);
        assert_eq!(s.transport.transport_state(), TransportState::Stopped);
    }

    #[test]
    fn test_pause_after_unpolled_completion_leaves_session_stopped() {
        let mut s = session();
        let a = recorded(&mut s);
        s.transport.play(a).unwrap();
        s.backend.finish_playback();
        s.clock.advance(Duration::from_secs(2));

        assert!(s.transport.pause(a).is_err());
        assert_eq!(s.transport.track(a).unwrap().state(), TrackState::Ready);
        assert_eq!(s.transport.position(a).unwrap(), 0);
        assert_eq!(s.transport.transport_state(), TransportState::Stopped);
    }

    #[test]
    fn test_toggle_after_unpolled_completion_plays_from_origin() {
        let mut s = session();
        let a = recorded(&mut s);
        s.transport.play_all();
        s.backend.finish_playback();
        s.clock.advance(Duration::from_secs(2));

        // The session is Stopped, so toggle plays instead of pausing
        let report = s.transport.toggle();

        assert_eq!(report.affected, vec![a]);
        assert_eq!(s.transport.track(a).unwrap().state(), TrackState::Playing);
        let launch = s.backend.last_launch(ProcessRole::Play).unwrap();
        assert_eq!(launch.params.start_frame, 0);
        assert_eq!(s.backend.live_count_for(ProcessRole::Play), 1);
    }

    #[test]
    fn test_failed_mute_keeps_session_playing() {
        let mut s = session();
        let a = recorded(&mut s);
        s.transport.play(a).unwrap();
        s.backend.set_unavailable(true);

        assert!(s.transport.set_muted(a, true).is_err());

        let track = s.transport.track(a).unwrap();
        assert!(!track.is_muted());
        assert_eq!(track.state(), TrackState::Playing);
        assert_eq!(s.transport.transport_state(), TransportState::Playing);
    }

    #[test]
    fn test_delete_recording_track_releases_slot() {
        let mut s = session();
        let a = s.transport.add_track(None);
        let b = s.transport.add_track(None);
        s.transport.record(a).unwrap();

        s.transport.delete_track(a).unwrap();
        assert_eq!(s.transport.recording_track(), None);
        assert_eq!(s.backend.live_count(), 0);
        s.transport.record(b).unwrap();
    }

    #[test]
    fn test_delete_removes_take() {
        let mut s = session();
        let a = recorded(&mut s);
        let file = s.transport.track(a).unwrap().file().unwrap().to_path_buf();

        s.transport.delete_track(a).unwrap();
        assert!(!file.exists());
        assert!(s.transport.tracks().is_empty());
    }

    #[test]
    fn test_shutdown_leaves_no_live_processes() {
        let mut s = session();
        let a = recorded(&mut s);
        let b = s.transport.add_track(None);
        s.transport.play(a).unwrap();
        s.transport.record(b).unwrap();
        s.transport.enable_monitor().unwrap();
        assert_eq!(s.backend.live_count(), 3);

        s.transport.shutdown();

        assert_eq!(s.backend.live_count(), 0);
        assert_eq!(s.transport.context().supervisor.live_count(), 0);
        assert_eq!(s.transport.track(b).unwrap().state(), TrackState::Ready);
        assert!(!s.transport.monitor_state().enabled);
    }

    #[test]
    fn test_invalid_latency_is_rejected() {
        let mut s = session();
        let err = s.transport.set_monitor_latency(100).unwrap_err();
        assert!(err.is_caller_error());
        s.transport.set_monitor_latency(256).unwrap();
        assert_eq!(s.transport.monitor_state().latency.samples(), 256);
    }

    #[test]
    fn test_save_without_project_fails() {
        let mut s = session();
        let err = s.transport.save().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PROJECT");
    }
}

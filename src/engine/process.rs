//! Process supervision
//!
//! Every external audio operation the engine starts is registered here and
//! addressed by a [`HandleId`]. Stopping is bounded: a graceful request, a
//! grace period, then a forced kill. [`ProcessSupervisor::shutdown`] (also run
//! on drop) sweeps whatever is still registered, so no audio subprocess can
//! outlive the engine even if a caller forgot to stop it.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::backend::{AudioBackend, LaunchRequest, Pipeline, PreparedLaunch, ProcessRole};
use crate::error::{EngineError, Result};

/// Interval between exit checks while waiting out the grace period
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Identifier of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The handle was not registered (never started, or already stopped)
    AlreadyStopped,
    /// The process exited within the grace period
    Exited,
    /// The process ignored the graceful request and was killed
    Killed,
}

/// Registry entry for one live process
struct LiveProcess {
    role: ProcessRole,
    owner: String,
    path: Option<PathBuf>,
    scratch: Option<PathBuf>,
    pipeline: Box<dyn Pipeline>,
}

impl LiveProcess {
    fn release_scratch(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            if let Err(e) = std::fs::remove_file(&scratch) {
                debug!("Could not remove scratch file {}: {}", scratch.display(), e);
            }
        }
    }
}

/// Summary of a registered process, for queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub id: HandleId,
    pub role: ProcessRole,
    pub owner: String,
    pub path: Option<PathBuf>,
}

/// Owner of every running audio pipeline
pub struct ProcessSupervisor {
    backend: Arc<dyn AudioBackend>,
    grace: Duration,
    next_id: AtomicU64,
    live: Mutex<HashMap<HandleId, LiveProcess>>,
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("backend", &self.backend.name())
            .field("grace", &self.grace)
            .field("live", &self.live_count())
            .finish()
    }
}

impl ProcessSupervisor {
    /// Create a supervisor launching through `backend`
    ///
    /// # Arguments
    /// * `backend` - The process/pipeline facility
    /// * `grace` - How long `stop` waits for a graceful exit before killing
    pub fn new(backend: Arc<dyn AudioBackend>, grace: Duration) -> Self {
        Self {
            backend,
            grace,
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HandleId, LiveProcess>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Validate a request and do its blocking preparation
    ///
    /// # Errors
    /// * `Launch` - If a record target is not writable or a play source is not readable
    pub fn prepare(&self, request: LaunchRequest) -> Result<PreparedLaunch> {
        validate(&request)?;
        self.backend.prepare(request)
    }

    /// Spawn a prepared launch and register it
    pub fn start_prepared(&self, mut prepared: PreparedLaunch, owner: &str) -> Result<HandleId> {
        let pipeline = match self.backend.spawn(&prepared) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                if let Some(scratch) = prepared.scratch.take() {
                    let _ = std::fs::remove_file(scratch);
                }
                return Err(e);
            }
        };

        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let role = prepared.request.role;
        debug!(
            "Started {} handle {} for {} (pid {:?})",
            role,
            id,
            owner,
            pipeline.pid()
        );
        self.lock().insert(
            id,
            LiveProcess {
                role,
                owner: owner.to_string(),
                path: prepared.request.path.take(),
                scratch: prepared.scratch.take(),
                pipeline,
            },
        );
        Ok(id)
    }

    /// Validate, prepare and spawn in one step
    pub fn start(&self, request: LaunchRequest, owner: &str) -> Result<HandleId> {
        let prepared = self.prepare(request)?;
        self.start_prepared(prepared, owner)
    }

    /// Stop a handle, waiting at most the grace period before killing it
    ///
    /// Idempotent: stopping an unknown or already stopped handle is a no-op.
    pub fn stop(&self, id: HandleId) -> StopOutcome {
        let entry = self.lock().remove(&id);
        let Some(mut entry) = entry else {
            return StopOutcome::AlreadyStopped;
        };

        let outcome = terminate_within(entry.pipeline.as_mut(), self.grace);
        if outcome == StopOutcome::Killed {
            warn!(
                "{} handle {} ({}) ignored stop for {:?}; killed",
                entry.role, id, entry.owner, self.grace
            );
        } else {
            debug!("Stopped {} handle {} ({})", entry.role, id, entry.owner);
        }
        entry.release_scratch();
        outcome
    }

    /// Whether the handle's process is still running
    pub fn is_alive(&self, id: HandleId) -> bool {
        let mut live = self.lock();
        let Some(entry) = live.get_mut(&id) else {
            return false;
        };
        match entry.pipeline.try_wait() {
            Ok(exited) => !exited,
            Err(e) => {
                warn!("Could not poll {} handle {}: {}", entry.role, id, e);
                false
            }
        }
    }

    /// Every registered process
    pub fn live_handles(&self) -> Vec<ProcessInfo> {
        let mut handles: Vec<ProcessInfo> = self
            .lock()
            .iter()
            .map(|(id, entry)| ProcessInfo {
                id: *id,
                role: entry.role,
                owner: entry.owner.clone(),
                path: entry.path.clone(),
            })
            .collect();
        handles.sort_by_key(|info| info.id);
        handles
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    /// Terminate every registered process unconditionally
    ///
    /// All processes are asked to stop at once and share one grace period;
    /// stragglers are killed. Returns how many processes were swept.
    pub fn shutdown(&self) -> usize {
        let mut entries: Vec<(HandleId, LiveProcess)> = self.lock().drain().collect();
        if entries.is_empty() {
            return 0;
        }
        info!("Sweeping {} live audio process(es)", entries.len());

        for (id, entry) in &mut entries {
            if let Err(e) = entry.pipeline.request_stop() {
                debug!("Stop request for handle {} failed: {}", id, e);
            }
        }

        let deadline = Instant::now() + self.grace;
        loop {
            let mut pending = 0;
            for (_, entry) in &mut entries {
                if !entry.pipeline.try_wait().unwrap_or(true) {
                    pending += 1;
                }
            }
            if pending == 0 || Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        let count = entries.len();
        for (id, mut entry) in entries {
            if !entry.pipeline.try_wait().unwrap_or(true) {
                warn!("{} handle {} ({}) killed during shutdown", entry.role, id, entry.owner);
                if let Err(e) = entry.pipeline.kill() {
                    warn!("Kill of handle {} failed: {}", id, e);
                }
            }
            entry.release_scratch();
        }
        count
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Graceful request, bounded wait, then kill
fn terminate_within(pipeline: &mut dyn Pipeline, grace: Duration) -> StopOutcome {
    if pipeline.try_wait().unwrap_or(false) {
        return StopOutcome::Exited;
    }

    if let Err(e) = pipeline.request_stop() {
        debug!("Graceful stop request failed: {}", e);
    }

    let deadline = Instant::now() + grace;
    loop {
        if pipeline.try_wait().unwrap_or(false) {
            return StopOutcome::Exited;
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    if let Err(e) = pipeline.kill() {
        warn!("Forced kill failed: {}", e);
    }
    StopOutcome::Killed
}

fn validate(request: &LaunchRequest) -> Result<()> {
    let launch_error = |reason: String, source: std::io::Error| EngineError::Launch {
        role: request.role,
        path: request.path.clone(),
        reason,
        source: Some(source),
    };

    match (request.role, request.path()) {
        (ProcessRole::Record, Some(path)) => OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map(drop)
            .map_err(|e| launch_error(format!("path is not writable: {}", e), e)),
        (ProcessRole::Play, Some(path)) => File::open(path)
            .map(drop)
            .map_err(|e| launch_error(format!("path is not readable: {}", e), e)),
        (ProcessRole::Monitor, _) => Ok(()),
        (role, None) => Err(EngineError::Launch {
            role,
            path: None,
            reason: "no file path given".to_string(),
            source: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceParams, MockBackend};
    use tempfile::tempdir;

    fn supervisor(backend: &MockBackend) -> ProcessSupervisor {
        ProcessSupervisor::new(Arc::new(backend.clone()), Duration::from_millis(50))
    }

    #[test]
    fn test_start_and_stop() {
        let dir = tempdir().unwrap();
        let backend = MockBackend::new();
        let sup = supervisor(&backend);

        let id = sup
            .start(LaunchRequest::record(dir.path().join("a.wav"), DeviceParams::default()), "test")
            .unwrap();
        assert!(sup.is_alive(id));
        assert_eq!(sup.live_count(), 1);

        assert_eq!(sup.stop(id), StopOutcome::Exited);
        assert!(!sup.is_alive(id));
        assert_eq!(sup.live_count(), 0);
        assert_eq!(backend.live_count(), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let backend = MockBackend::new();
        let sup = supervisor(&backend);
        let id = sup
            .start(LaunchRequest::monitor(DeviceParams::default()), "monitor")
            .unwrap();

        assert_eq!(sup.stop(id), StopOutcome::Exited);
        assert_eq!(sup.stop(id), StopOutcome::AlreadyStopped);
    }

    #[test]
    fn test_stubborn_process_is_killed_after_grace() {
        let backend = MockBackend::new();
        backend.set_stubborn(true);
        let sup = supervisor(&backend);
        let id = sup
            .start(LaunchRequest::monitor(DeviceParams::default()), "monitor")
            .unwrap();

        let started = Instant::now();
        assert_eq!(sup.stop(id), StopOutcome::Killed);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(backend.live_count(), 0);
        assert_eq!(backend.kill_count(), 1);
    }

    #[test]
    fn test_unreadable_play_source_is_launch_error() {
        let backend = MockBackend::new();
        let sup = supervisor(&backend);
        let err = sup
            .start(
                LaunchRequest::play("/nonexistent/overdub/take.wav", DeviceParams::default()),
                "test",
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "LAUNCH_ERROR");
        assert!(backend.launches().is_empty());
    }

    #[test]
    fn test_unwritable_record_target_is_launch_error() {
        let backend = MockBackend::new();
        let sup = supervisor(&backend);
        let err = sup
            .start(
                LaunchRequest::record("/nonexistent/overdub/take.wav", DeviceParams::default()),
                "test",
            )
            .unwrap_err();
        assert_eq!(err.error_code(), "LAUNCH_ERROR");
    }

    #[test]
    fn test_shutdown_sweeps_everything() {
        let dir = tempdir().unwrap();
        let backend = MockBackend::new();
        backend.set_stubborn(true);
        let sup = supervisor(&backend);

        sup.start(LaunchRequest::record(dir.path().join("a.wav"), DeviceParams::default()), "t1")
            .unwrap();
        sup.start(LaunchRequest::monitor(DeviceParams::default()), "monitor")
            .unwrap();
        assert_eq!(backend.live_count(), 2);

        assert_eq!(sup.shutdown(), 2);
        assert_eq!(sup.live_count(), 0);
        assert_eq!(backend.live_count(), 0);
    }

    #[test]
    fn test_drop_sweeps() {
        let backend = MockBackend::new();
        {
            let sup = supervisor(&backend);
            sup.start(LaunchRequest::monitor(DeviceParams::default()), "monitor")
                .unwrap();
        }
        assert_eq!(backend.live_count(), 0);
    }

    #[test]
    fn test_naturally_exited_process_is_not_alive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.wav");
        crate::engine::io::write_pcm16(&path, 48000, 1, &[0; 10]).unwrap();
        let backend = MockBackend::new();
        let sup = supervisor(&backend);

        let id = sup.start(LaunchRequest::play(&path, DeviceParams::default()), "t").unwrap();
        backend.finish_playback();
        assert!(!sup.is_alive(id));
        assert_eq!(sup.stop(id), StopOutcome::Exited);
    }
}

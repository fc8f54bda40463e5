//! Mock audio backend
//!
//! Simulates record/play/monitor pipelines in-process so the engine can be
//! exercised without audio hardware. Recorders write a WAV of a configurable
//! length when asked to stop; players run until [`MockBackend::finish_playback`]
//! is called or they are stopped.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{AudioBackend, LaunchRequest, Pipeline, PreparedLaunch, ProcessRole};
use crate::engine::io::write_pcm16;
use crate::error::{EngineError, Result};

#[derive(Debug)]
struct MockProcess {
    request: LaunchRequest,
    alive: bool,
}

#[derive(Debug, Default)]
struct MockState {
    next_pid: u32,
    processes: HashMap<u32, MockProcess>,
    launches: Vec<LaunchRequest>,
    unavailable: bool,
    stubborn: bool,
    recorded_frames: u64,
    recorded_value: i16,
    kills: usize,
}

/// In-process stand-in for the PipeWire tools
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.lock().next_pid = 1000;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not wedge every later assertion.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every launch fail as if the tools were not installed
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make pipelines ignore graceful stop requests
    pub fn set_stubborn(&self, stubborn: bool) {
        self.lock().stubborn = stubborn;
    }

    /// Frames (and their constant sample value) each recorder captures
    pub fn set_recording(&self, frames: u64, value: i16) {
        let mut state = self.lock();
        state.recorded_frames = frames;
        state.recorded_value = value;
    }

    /// Every request spawned so far, in order
    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.lock().launches.clone()
    }

    /// The most recent spawned request for a role
    pub fn last_launch(&self, role: ProcessRole) -> Option<LaunchRequest> {
        self.lock()
            .launches
            .iter()
            .rev()
            .find(|r| r.role == role)
            .cloned()
    }

    /// Number of simulated processes still running
    pub fn live_count(&self) -> usize {
        self.lock().processes.values().filter(|p| p.alive).count()
    }

    /// Number of simulated processes of a role still running
    pub fn live_count_for(&self, role: ProcessRole) -> usize {
        self.lock()
            .processes
            .values()
            .filter(|p| p.alive && p.request.role == role)
            .count()
    }

    /// How many pipelines had to be force-killed
    pub fn kill_count(&self) -> usize {
        self.lock().kills
    }

    /// Simulate every running player reaching end of stream
    pub fn finish_playback(&self) {
        self.exit_role(ProcessRole::Play);
    }

    /// Simulate every running process of a role exiting on its own
    pub fn exit_role(&self, role: ProcessRole) {
        for process in self.lock().processes.values_mut() {
            if process.request.role == role {
                process.alive = false;
            }
        }
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn spawn(&self, prepared: &PreparedLaunch) -> Result<Box<dyn Pipeline>> {
        let request = prepared.request.clone();
        let mut state = self.lock();
        if state.unavailable {
            return Err(EngineError::Launch {
                role: request.role,
                path: request.path.clone(),
                reason: "mock backend unavailable".to_string(),
                source: Some(io::Error::from(io::ErrorKind::NotFound)),
            });
        }

        if let (ProcessRole::Record, Some(path)) = (request.role, request.path()) {
            // pw-record creates its output file as soon as it starts
            std::fs::File::create(path).map_err(|e| EngineError::io(path, e))?;
        }

        state.next_pid += 1;
        let pid = state.next_pid;
        state.launches.push(request.clone());
        state.processes.insert(
            pid,
            MockProcess {
                request,
                alive: true,
            },
        );

        Ok(Box::new(MockPipeline {
            pid,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockPipeline {
    pid: u32,
    state: Arc<Mutex<MockState>>,
}

impl MockPipeline {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Pipeline for MockPipeline {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn request_stop(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if state.stubborn {
            return Ok(());
        }
        let frames = state.recorded_frames;
        let value = state.recorded_value;
        let Some(process) = state.processes.get_mut(&self.pid) else {
            return Ok(());
        };
        if !process.alive {
            return Ok(());
        }
        process.alive = false;

        if let (ProcessRole::Record, Some(path)) = (process.request.role, process.request.path()) {
            let params = &process.request.params;
            let samples = vec![value; frames as usize * params.channels as usize];
            write_pcm16(path, params.sample_rate, params.channels, &samples)
                .map_err(|e| io::Error::other(e.to_string()))?;
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        let was_alive = match state.processes.get_mut(&self.pid) {
            Some(process) => std::mem::replace(&mut process.alive, false),
            None => false,
        };
        if was_alive {
            state.kills += 1;
        }
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<bool> {
        Ok(self
            .lock()
            .processes
            .get(&self.pid)
            .map_or(true, |p| !p.alive))
    }
}

//! Audio Backend Module
//!
//! The process/pipeline facility the engine drives. A backend knows how to
//! turn a [`LaunchRequest`] into a running [`Pipeline`]; everything about
//! supervising that pipeline lives in [`crate::engine::process`].
//!
//! - `pipewire`: spawns `pw-record` / `pw-play` subprocesses
//! - `mock`: in-process simulation for tests and dry runs

pub mod mock;
pub mod pipewire;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use mock::MockBackend;
pub use pipewire::PipeWireBackend;

/// What an external audio operation is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    /// Capturing input into a file
    Record,
    /// Rendering a file to the output device
    Play,
    /// Routing live input straight to the output device
    Monitor,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Record => write!(f, "record"),
            ProcessRole::Play => write!(f, "play"),
            ProcessRole::Monitor => write!(f, "monitor"),
        }
    }
}

/// Device-side parameters for one launch
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParams {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u16,
    /// Buffer size in samples, monitor only
    pub latency: Option<u32>,
    /// First frame to render, play only
    pub start_frame: u64,
    /// Output gain, 0.0 for a muted track
    pub volume: f32,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            latency: None,
            start_frame: 0,
            volume: 1.0,
        }
    }
}

/// One request to start an external audio operation
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub role: ProcessRole,
    /// Target file; `None` for monitoring
    pub path: Option<PathBuf>,
    pub params: DeviceParams,
}

impl LaunchRequest {
    pub fn record(path: impl Into<PathBuf>, params: DeviceParams) -> Self {
        Self {
            role: ProcessRole::Record,
            path: Some(path.into()),
            params,
        }
    }

    pub fn play(path: impl Into<PathBuf>, params: DeviceParams) -> Self {
        Self {
            role: ProcessRole::Play,
            path: Some(path.into()),
            params,
        }
    }

    pub fn monitor(params: DeviceParams) -> Self {
        Self {
            role: ProcessRole::Monitor,
            path: None,
            params,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// A launch with all blocking preparation already done
///
/// Spawning a prepared launch does no file work, so several of them can be
/// started back-to-back.
#[derive(Debug, Clone)]
pub struct PreparedLaunch {
    pub request: LaunchRequest,
    /// File actually handed to the player (a trimmed copy when resuming mid-file)
    pub source: Option<PathBuf>,
    /// Scratch file owned by the launch, removed once the pipeline is reaped
    pub scratch: Option<PathBuf>,
}

impl PreparedLaunch {
    /// A launch that needs no preparation
    pub fn direct(request: LaunchRequest) -> Self {
        let source = request.path.clone();
        Self {
            request,
            source,
            scratch: None,
        }
    }
}

/// A running external audio operation
pub trait Pipeline: Send {
    /// OS process id of the first process in the pipeline, if any
    fn pid(&self) -> Option<u32>;

    /// Ask the operation to finish cleanly (flush files, close devices)
    fn request_stop(&mut self) -> io::Result<()>;

    /// Terminate unconditionally
    fn kill(&mut self) -> io::Result<()>;

    /// Non-blocking check; `true` once every process in the pipeline exited
    fn try_wait(&mut self) -> io::Result<bool>;
}

/// Factory for pipelines
pub trait AudioBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Do any blocking work a launch needs before spawning
    fn prepare(&self, request: LaunchRequest) -> Result<PreparedLaunch> {
        Ok(PreparedLaunch::direct(request))
    }

    /// Spawn the pipeline
    fn spawn(&self, prepared: &PreparedLaunch) -> Result<Box<dyn Pipeline>>;
}

//! Shared engine context
//!
//! Everything a track or the monitor needs to act on the outside world:
//! configuration, the process supervisor, the clock, the notifier and the
//! session-wide recording slot.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::backend::DeviceParams;
use crate::config::EngineConfig;
use crate::engine::clock::{Clock, SystemClock};
use crate::engine::process::ProcessSupervisor;
use crate::engine::track::TrackId;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink, Notifier};

/// Collaborators shared by every track of a session
#[derive(Debug)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub supervisor: Arc<ProcessSupervisor>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Notifier,
    audio_dir: PathBuf,
    /// Track currently holding the single recording resource
    recording_slot: Mutex<Option<TrackId>>,
}

impl EngineContext {
    pub fn new(config: EngineConfig, supervisor: Arc<ProcessSupervisor>, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            supervisor,
            clock: Arc::new(SystemClock),
            notifier: Notifier::new(),
            audio_dir: audio_dir.into(),
            recording_slot: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.notifier.subscribe(sink);
    }

    pub fn emit(&self, event: EngineEvent) {
        self.notifier.emit(event);
    }

    /// Directory holding the project's takes
    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    pub(crate) fn set_audio_dir(&mut self, dir: impl Into<PathBuf>) {
        self.audio_dir = dir.into();
    }

    /// Device parameters for recording and monitoring
    pub fn device_params(&self) -> DeviceParams {
        DeviceParams {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            ..DeviceParams::default()
        }
    }

    /// Check-and-set the recording slot for `id`
    ///
    /// # Errors
    /// * `Conflict` - If another track already holds the slot
    pub fn claim_recording(&self, id: TrackId) -> Result<()> {
        let mut slot = self.recording_slot.lock().unwrap_or_else(|p| p.into_inner());
        match *slot {
            Some(holder) if holder != id => Err(EngineError::Conflict { holder }),
            _ => {
                *slot = Some(id);
                debug!("Recording slot claimed by track {}", id);
                Ok(())
            }
        }
    }

    /// Give the slot back if `id` holds it
    pub fn release_recording(&self, id: TrackId) {
        let mut slot = self.recording_slot.lock().unwrap_or_else(|p| p.into_inner());
        if *slot == Some(id) {
            *slot = None;
            debug!("Recording slot released by track {}", id);
        }
    }

    /// Track currently recording, if any
    pub fn recording_holder(&self) -> Option<TrackId> {
        *self.recording_slot.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::time::Duration;

    fn context() -> EngineContext {
        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::new(MockBackend::new()),
            Duration::from_millis(10),
        ));
        EngineContext::new(EngineConfig::default(), supervisor, "/tmp/overdub-audio")
    }

    #[test]
    fn test_recording_slot_is_exclusive() {
        let ctx = context();
        let first = TrackId::new();
        let second = TrackId::new();

        ctx.claim_recording(first).unwrap();
        let err = ctx.claim_recording(second).unwrap_err();
        assert!(matches!(err, EngineError::Conflict { holder } if holder == first));
        assert_eq!(ctx.recording_holder(), Some(first));

        // Only the holder can release
        ctx.release_recording(second);
        assert_eq!(ctx.recording_holder(), Some(first));

        ctx.release_recording(first);
        ctx.claim_recording(second).unwrap();
    }

    #[test]
    fn test_device_params_follow_config() {
        let ctx = context();
        let params = ctx.device_params();
        assert_eq!(params.sample_rate, 48000);
        assert_eq!(params.channels, 1);
        assert_eq!(params.start_frame, 0);
    }
}

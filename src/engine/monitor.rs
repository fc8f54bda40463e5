//! Live input monitoring
//!
//! One capture-to-playback pipeline per session, independent of recording
//! and playback. The latency is a preference that survives disable/enable.

use std::fmt;

use log::{info, warn};

use crate::backend::{DeviceParams, LaunchRequest};
use crate::engine::context::EngineContext;
use crate::engine::process::HandleId;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;

const MONITOR_OWNER: &str = "monitor";

/// Monitor buffer size in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MonitorLatency {
    L32,
    #[default]
    L64,
    L128,
    L256,
    L512,
}

impl MonitorLatency {
    pub const ALL: [MonitorLatency; 5] = [
        MonitorLatency::L32,
        MonitorLatency::L64,
        MonitorLatency::L128,
        MonitorLatency::L256,
        MonitorLatency::L512,
    ];

    pub fn samples(self) -> u32 {
        match self {
            MonitorLatency::L32 => 32,
            MonitorLatency::L64 => 64,
            MonitorLatency::L128 => 128,
            MonitorLatency::L256 => 256,
            MonitorLatency::L512 => 512,
        }
    }

    /// Round-trip delay this buffer adds at `sample_rate`
    pub fn millis(self, sample_rate: u32) -> f64 {
        self.samples() as f64 * 1000.0 / sample_rate as f64
    }
}

impl TryFrom<u32> for MonitorLatency {
    type Error = EngineError;

    fn try_from(samples: u32) -> Result<Self> {
        MonitorLatency::ALL
            .into_iter()
            .find(|l| l.samples() == samples)
            .ok_or(EngineError::InvalidLatency { samples })
    }
}

impl fmt::Display for MonitorLatency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} samples", self.samples())
    }
}

/// Whether monitoring is on, and at what latency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorState {
    pub enabled: bool,
    pub latency: MonitorLatency,
}

/// Supervisor of the monitoring pipeline
#[derive(Debug, Default)]
pub struct MonitorEngine {
    latency: MonitorLatency,
    handle: Option<HandleId>,
}

impl MonitorEngine {
    pub fn new(latency: MonitorLatency) -> Self {
        Self {
            latency,
            handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    pub fn latency(&self) -> MonitorLatency {
        self.latency
    }

    pub fn state(&self) -> MonitorState {
        MonitorState {
            enabled: self.is_enabled(),
            latency: self.latency,
        }
    }

    fn notify(&self, ctx: &EngineContext) {
        ctx.emit(EngineEvent::MonitorChanged {
            enabled: self.is_enabled(),
            latency: self.latency,
        });
    }

    fn launch(&mut self, ctx: &EngineContext, latency: MonitorLatency) -> Result<()> {
        let params = DeviceParams {
            latency: Some(latency.samples()),
            ..ctx.device_params()
        };
        let handle = ctx.supervisor.start(LaunchRequest::monitor(params), MONITOR_OWNER)?;
        self.handle = Some(handle);
        self.latency = latency;
        info!("Monitoring on ({})", latency);
        Ok(())
    }

    fn halt(&mut self, ctx: &EngineContext) -> bool {
        match self.handle.take() {
            Some(handle) => {
                ctx.supervisor.stop(handle);
                true
            }
            None => false,
        }
    }

    /// Start monitoring at `latency`
    ///
    /// Already enabled at the same latency is a no-op; a different latency
    /// restarts the pipeline.
    ///
    /// # Errors
    /// * `Launch` - If the pipeline cannot start (monitoring stays off)
    pub fn enable(&mut self, ctx: &EngineContext, latency: MonitorLatency) -> Result<()> {
        if self.is_enabled() && self.latency == latency {
            return Ok(());
        }
        self.halt(ctx);
        let result = self.launch(ctx, latency);
        self.notify(ctx);
        result
    }

    /// Stop monitoring. Idempotent.
    pub fn disable(&mut self, ctx: &EngineContext) {
        if self.halt(ctx) {
            info!("Monitoring off");
            self.notify(ctx);
        }
    }

    /// Change the latency, restarting the pipeline if it is running
    ///
    /// # Errors
    /// * `Launch` - If the restart fails. The old latency is kept and its
    ///   pipeline relaunched; if that fails too monitoring is off.
    pub fn set_latency(&mut self, ctx: &EngineContext, latency: MonitorLatency) -> Result<()> {
        if !self.is_enabled() {
            self.latency = latency;
            self.notify(ctx);
            return Ok(());
        }
        if self.latency == latency {
            return Ok(());
        }
        let previous = self.latency;
        self.halt(ctx);
        let result = self.launch(ctx, latency);
        if let Err(e) = &result {
            warn!("Monitor restart at {} failed: {}", latency, e);
            if let Err(again) = self.launch(ctx, previous) {
                warn!("Could not restore monitoring at {}: {}", previous, again);
                ctx.notifier.error("monitor", "monitoring lost while changing latency");
            }
        }
        self.notify(ctx);
        result
    }

    /// Turn monitoring off if its pipeline died. Returns true if it did.
    pub fn poll(&mut self, ctx: &EngineContext) -> bool {
        let Some(handle) = self.handle else {
            return false;
        };
        if ctx.supervisor.is_alive(handle) {
            return false;
        }
        warn!("Monitor pipeline exited unexpectedly");
        self.halt(ctx);
        self.notify(ctx);
        ctx.notifier.error("monitor", "monitor pipeline exited unexpectedly");
        true
    }
}

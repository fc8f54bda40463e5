//! Overdub - Multi-Track Audio Engine
//!
//! The engine beneath a multi-track recorder: one recording at a time,
//! synchronized playback with sample-accurate pause/resume, live input
//! monitoring, and offline mixdown.
//!
//! # Architecture
//!
//! All audio I/O runs out of process. The engine drives it through an
//! [`backend::AudioBackend`] and keeps every launched pipeline in a
//! [`engine::ProcessSupervisor`] so nothing outlives the session:
//! - [`engine::TransportController`]: session owner and command entry point
//! - [`engine::TrackEngine`]: per-track record/play state machine
//! - [`engine::MonitorEngine`]: live input monitoring
//! - [`engine::mixdown`]: per-track, mixed and batch export

pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod project;

pub use error::{EngineError, Result};

//! Error handling for Overdub
//!
//! Caller mistakes (state violations, slot contention) are distinguished from
//! environment failures (missing tools, file system trouble) so the front-end
//! can decide whether to show a hint or an actionable error.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::ProcessRole;
use crate::engine::track::{TrackId, TrackState};

/// Result type alias for Overdub operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    // Environment Errors
    #[error("Failed to launch {role} process{}: {reason}", display_path(.path))]
    Launch {
        role: ProcessRole,
        path: Option<PathBuf>,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("WAV codec error on {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    // State Machine Errors
    #[error("Recording slot is busy: track {holder} is already recording")]
    Conflict { holder: TrackId },

    #[error("Cannot {operation} while track is {state}")]
    InvalidState {
        operation: &'static str,
        state: TrackState,
    },

    #[error("Track not found: {id}")]
    TrackNotFound { id: String },

    #[error("Unsupported monitor latency: {samples} samples (expected one of 32, 64, 128, 256, 512)")]
    InvalidLatency { samples: u32 },

    // Content Errors
    #[error("Not a usable WAV file: {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("Track '{name}' has no audio to export")]
    EmptyTrack { name: String },

    #[error("No tracks qualify for mixing")]
    NothingToMix,

    // Project Errors
    #[error("Invalid project at {path}: {reason}")]
    InvalidProject { path: PathBuf, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" for {}", p.display()),
        None => String::new(),
    }
}

impl EngineError {
    /// Wrap an I/O failure with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a WAV codec failure with the path it happened on
    pub fn wav(path: impl Into<PathBuf>, source: hound::Error) -> Self {
        EngineError::Wav {
            path: path.into(),
            source,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Launch { .. } => "LAUNCH_ERROR",
            EngineError::Io { .. } => "IO_ERROR",
            EngineError::Wav { .. } => "WAV_ERROR",
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::TrackNotFound { .. } => "TRACK_NOT_FOUND",
            EngineError::InvalidLatency { .. } => "INVALID_LATENCY",
            EngineError::Format { .. } => "FORMAT_ERROR",
            EngineError::EmptyTrack { .. } => "EMPTY_TRACK",
            EngineError::NothingToMix => "NOTHING_TO_MIX",
            EngineError::InvalidProject { .. } => "INVALID_PROJECT",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// True for errors caused by issuing a command the current state does not allow.
    ///
    /// These are surfaced immediately and never retried; the engine has not
    /// mutated anything when it returns one.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict { .. }
                | EngineError::InvalidState { .. }
                | EngineError::TrackNotFound { .. }
                | EngineError::InvalidLatency { .. }
                | EngineError::EmptyTrack { .. }
                | EngineError::NothingToMix
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            EngineError::Launch { .. } => vec![
                "Install the PipeWire command line tools (pw-record, pw-play)",
                "Check that no other application holds the audio device exclusively",
            ],
            EngineError::Conflict { .. } => vec!["Stop the active recording before starting another"],
            EngineError::Format { .. } => vec![
                "Convert the file to PCM WAV first",
                "Check if the file plays in another application",
            ],
            EngineError::Io { .. } => vec![
                "Check that the project directory is writable",
                "Free up disk space",
            ],
            _ => vec![],
        }
    }
}

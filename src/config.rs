//! Engine configuration
//!
//! Loaded from a JSON file; every field has a default so a partial file (or
//! no file at all) is valid.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default recording sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default grace period before a stop escalates to a kill
pub const DEFAULT_STOP_GRACE_MS: u64 = 1000;

/// Settings shared by every engine component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate used for recording and monitoring
    pub sample_rate: u32,
    /// Input channels captured per track (1 or 2)
    pub channels: u16,
    /// Milliseconds to wait for a graceful exit before killing
    pub stop_grace_ms: u64,
    /// Monitor buffer size in samples
    pub monitor_latency: u32,
    /// Capture tool
    pub record_program: String,
    /// Playback tool
    pub play_program: String,
    /// PipeWire target node
    pub target: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 1,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            monitor_latency: 64,
            record_program: "pw-record".to_string(),
            play_program: "pw-play".to_string(),
            target: "auto".to_string(),
        }
    }
}

impl EngineConfig {
    /// Read a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if !(1..=2).contains(&self.channels) {
            return Err(EngineError::InvalidProject {
                path: path.to_path_buf(),
                reason: format!("channels must be 1 or 2, got {}", self.channels),
            });
        }
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidProject {
                path: path.to_path_buf(),
                reason: "sample_rate must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.monitor_latency, 64);
        assert_eq!(config.stop_grace(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overdub.json");
        fs::write(&path, r#"{ "channels": 2, "stop_grace_ms": 250 }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.channels, 2);
        assert_eq!(config.stop_grace_ms, 250);
        assert_eq!(config.record_program, "pw-record");
    }

    #[test]
    fn test_rejects_surround_channels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("overdub.json");
        fs::write(&path, r#"{ "channels": 6 }"#).unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}

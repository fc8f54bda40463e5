//! Audio Engine Module
//!
//! Core multi-track engine including:
//! - Process supervision for external record/play/monitor pipelines
//! - Per-track state machines and the session transport
//! - Live input monitoring
//! - WAV file I/O, mixdown and export

pub mod buffer;
pub mod clock;
pub mod context;
pub mod io;
pub mod mixdown;
pub mod monitor;
pub mod process;
pub mod track;
pub mod transport;

pub use buffer::AudioBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::EngineContext;
pub use io::{patch_wav_header_if_needed, probe_wav, read_audio, write_pcm16, WavInfo};
pub use mixdown::{export_all, export_mixed, export_track, ExportReport, MixReport, MixSource};
pub use monitor::{MonitorEngine, MonitorLatency, MonitorState};
pub use process::{HandleId, ProcessInfo, ProcessSupervisor, StopOutcome};
pub use track::{status_label, TrackCompletion, TrackEngine, TrackId, TrackState};
pub use transport::{derive_transport_state, GroupReport, TransportController, TransportState};

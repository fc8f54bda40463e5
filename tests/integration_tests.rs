//! Integration Tests
//!
//! End-to-end tests for the Overdub session: transport, recording,
//! persistence, export and the interactive shell, all driven through the
//! mock backend and a manual clock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use tempfile::{tempdir, TempDir};

use overdub::backend::{MockBackend, ProcessRole};
use overdub::cli::shell::Shell;
use overdub::config::EngineConfig;
use overdub::engine::{
    probe_wav, write_pcm16, EngineContext, ManualClock, ProcessSupervisor, TrackId, TrackState,
    TransportController, TransportState,
};
use overdub::events::{EngineEvent, EventLog};
use overdub::EngineError;

struct Rig {
    backend: MockBackend,
    clock: Arc<ManualClock>,
    dir: TempDir,
}

impl Rig {
    fn new() -> Self {
        let backend = MockBackend::new();
        backend.set_recording(48000, 1000);
        Self {
            backend,
            clock: Arc::new(ManualClock::new()),
            dir: tempdir().unwrap(),
        }
    }

    fn project(&self) -> PathBuf {
        self.dir.path().join("song")
    }

    fn context(&self) -> EngineContext {
        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::new(self.backend.clone()),
            Duration::from_millis(30),
        ));
        EngineContext::new(EngineConfig::default(), supervisor, self.dir.path().join("scratch"))
            .with_clock(self.clock.clone())
    }

    fn open(&self) -> TransportController {
        TransportController::open(&self.project(), self.context()).unwrap()
    }

    /// Write a constant-valued 16-bit WAV outside the project
    fn tone(&self, name: &str, rate: u32, secs: f64, value: i16) -> PathBuf {
        let path = self.dir.path().join(name);
        let samples = vec![value; (rate as f64 * secs) as usize];
        write_pcm16(&path, rate, 1, &samples).unwrap();
        path
    }
}

fn imported(transport: &mut TransportController, file: &Path) -> TrackId {
    let id = transport.add_track(None);
    transport.import_file(id, file).unwrap();
    id
}

// === Transport Tests ===

#[test]
fn test_pause_resume_is_sample_accurate() {
    let rig = Rig::new();
    let mut transport = rig.open();
    let id = imported(&mut transport, &rig.tone("a.wav", 48000, 10.0, 100));

    transport.play(id).unwrap();
    rig.clock.advance(Duration::from_millis(2500));
    transport.pause(id).unwrap();
    assert_eq!(transport.position(id).unwrap(), 120_000);

    transport.play(id).unwrap();
    let launch = rig.backend.last_launch(ProcessRole::Play).unwrap();
    assert_eq!(launch.params.start_frame, 120_000);

    rig.clock.advance(Duration::from_secs(1));
    assert_eq!(transport.position(id).unwrap(), 168_000);
}

#[test]
fn test_only_one_track_records() {
    let rig = Rig::new();
    let mut transport = rig.open();
    let a = transport.add_track(None);
    let b = transport.add_track(None);

    transport.record(a).unwrap();
    let err = transport.record(b).unwrap_err();

    assert!(matches!(err, EngineError::Conflict { holder } if holder == a));
    assert_eq!(transport.track(b).unwrap().state(), TrackState::Empty);
    assert_eq!(rig.backend.live_count_for(ProcessRole::Record), 1);

    transport.stop_recording(a).unwrap();
    transport.record(b).unwrap();
}

#[test]
fn test_immediate_stop_leaves_track_empty() {
    let rig = Rig::new();
    rig.backend.set_recording(0, 0);
    let mut transport = rig.open();
    let id = transport.add_track(None);

    transport.record(id).unwrap();
    transport.stop_recording(id).unwrap();

    let track = transport.track(id).unwrap();
    assert_eq!(track.state(), TrackState::Empty);
    assert!(track.file().is_none());
}

#[test]
fn test_stop_all_then_play_all_starts_from_zero() {
    let rig = Rig::new();
    let mut transport = rig.open();
    let a = imported(&mut transport, &rig.tone("a.wav", 48000, 4.0, 100));
    let b = imported(&mut transport, &rig.tone("b.wav", 48000, 4.0, 100));

    transport.play_all();
    rig.clock.advance(Duration::from_secs(1));
    transport.pause_all();
    assert_eq!(transport.transport_state(), TransportState::Paused);

    transport.stop_all();
    assert_eq!(transport.transport_state(), TransportState::Stopped);

    let report = transport.play_all();
    assert_eq!(report.affected, vec![a, b]);
    for launch in rig.backend.launches().iter().rev().take(2) {
        assert_eq!(launch.params.start_frame, 0);
    }
    assert_eq!(transport.position(a).unwrap(), 0);
}

#[test]
fn test_muted_track_keeps_its_place() {
    let rig = Rig::new();
    let mut transport = rig.open();
    let a = imported(&mut transport, &rig.tone("a.wav", 48000, 4.0, 100));
    let b = imported(&mut transport, &rig.tone("b.wav", 48000, 4.0, 100));

    transport.play_all();
    rig.clock.advance(Duration::from_millis(750));
    transport.set_muted(b, true).unwrap();
    rig.clock.advance(Duration::from_millis(750));

    assert_eq!(transport.transport_state(), TransportState::Playing);
    assert_eq!(transport.position(a).unwrap(), transport.position(b).unwrap());
    assert_eq!(transport.track(b).unwrap().label(), "Playing (muted)…");
}

#[test]
fn test_shutdown_leaves_no_live_processes() {
    let rig = Rig::new();
    let mut transport = rig.open();
    let a = imported(&mut transport, &rig.tone("a.wav", 48000, 4.0, 100));
    let b = transport.add_track(None);
    transport.play(a).unwrap();
    transport.record(b).unwrap();
    transport.enable_monitor().unwrap();

    let mut roles: Vec<ProcessRole> = transport
        .context()
        .supervisor
        .live_handles()
        .iter()
        .map(|info| info.role)
        .collect();
    roles.sort_by_key(|role| role.to_string());
    assert_eq!(roles, vec![ProcessRole::Monitor, ProcessRole::Play, ProcessRole::Record]);

    // Nothing honours the graceful request; the sweep has to kill
    rig.backend.set_stubborn(true);
    transport.shutdown();

    assert_eq!(rig.backend.live_count(), 0);
    assert_eq!(transport.context().supervisor.live_count(), 0);
    assert!(rig.backend.kill_count() >= 3);
}

#[test]
fn test_dropping_the_session_sweeps_processes() {
    let rig = Rig::new();
    {
        let mut transport = rig.open();
        let a = imported(&mut transport, &rig.tone("a.wav", 48000, 4.0, 100));
        transport.play(a).unwrap();
        transport.enable_monitor().unwrap();
        assert_eq!(rig.backend.live_count(), 2);
    }
    assert_eq!(rig.backend.live_count(), 0);
}

#[test]
fn test_playback_completion_is_notified() {
    let rig = Rig::new();
    let mut transport = rig.open();
    let log = Arc::new(EventLog::new());
    transport.context_mut().subscribe(log.clone());
    let a = imported(&mut transport, &rig.tone("a.wav", 48000, 1.0, 100));

    transport.play(a).unwrap();
    rig.backend.finish_playback();
    transport.poll();

    assert_eq!(transport.track(a).unwrap().state(), TrackState::Ready);
    assert!(log
        .events()
        .contains(&EngineEvent::PlaybackCompleted { id: a }));
}

// === Export Tests ===

#[test]
fn test_mix_length_ignores_muted_longer_track() {
    let rig = Rig::new();
    let mut transport = rig.open();
    imported(&mut transport, &rig.tone("three.wav", 48000, 3.0, 1000));
    imported(&mut transport, &rig.tone("five.wav", 48000, 5.0, 1000));
    let long = imported(&mut transport, &rig.tone("ten.wav", 48000, 10.0, 1000));
    transport.set_muted(long, true).unwrap();

    let dest = rig.dir.path().join("out").join("mix.wav");
    let report = transport.export_mixed(&dest).unwrap();

    assert_relative_eq!(report.duration_secs(), 5.0);
    assert_eq!(probe_wav(&dest).unwrap().frames, 240_000);
}

/// Mix three tracks holding one constant sample value
fn mix_of_three(value: i16) -> Vec<i16> {
    let rig = Rig::new();
    let mut transport = rig.open();
    for name in ["a.wav", "b.wav", "c.wav"] {
        imported(&mut transport, &rig.tone(name, 8000, 0.25, value));
    }

    let dest = rig.dir.path().join("mix.wav");
    let report = transport.export_mixed(&dest).unwrap();
    assert!(report.clipped());

    let mut reader = hound::WavReader::open(&dest).unwrap();
    reader.samples::<i16>().map(|s| s.unwrap()).collect()
}

#[test]
fn test_mix_saturates_instead_of_wrapping() {
    // Three tracks at 80% of full scale sum to 240%
    let loud = (i16::MAX as f64 * 0.8) as i16;

    let positive = mix_of_three(loud);
    assert_eq!(positive.len(), 2000);
    assert!(positive.iter().all(|&s| s == i16::MAX));

    let negative = mix_of_three(-loud);
    assert_eq!(negative.len(), 2000);
    assert!(negative.iter().all(|&s| s == i16::MIN));
}

#[test]
fn test_export_all_reports_missing_file_and_still_mixes() {
    let rig = Rig::new();
    let mut transport = rig.open();
    imported(&mut transport, &rig.tone("a.wav", 48000, 1.0, 100));
    let broken = imported(&mut transport, &rig.tone("b.wav", 48000, 1.0, 100));
    imported(&mut transport, &rig.tone("c.wav", 48000, 1.0, 100));
    let file = transport.track(broken).unwrap().file().unwrap().to_path_buf();
    std::fs::remove_file(file).unwrap();

    let out = rig.dir.path().join("export");
    let report = transport.export_all(&out);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].item, "Track 2");
    assert!(out.join("mixed.wav").exists());
    assert!(out.join("Track 1.wav").exists());
    assert!(out.join("Track 3.wav").exists());
}

#[test]
fn test_export_empty_track_is_rejected() {
    let rig = Rig::new();
    let mut transport = rig.open();
    let id = transport.add_track(None);

    let err = transport
        .export_track(id, &rig.dir.path().join("x.wav"))
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyTrack { .. }));
    assert!(matches!(
        transport.export_mixed(&rig.dir.path().join("mix.wav")),
        Err(EngineError::NothingToMix)
    ));
}

// === Project Tests ===

#[test]
fn test_project_round_trip() {
    let rig = Rig::new();
    let (a, b, c) = {
        let mut transport = rig.open();
        let a = transport.add_track(None);
        transport.record(a).unwrap();
        transport.stop_recording(a).unwrap();
        let b = imported(&mut transport, &rig.tone("b.wav", 44100, 1.0, 100));
        transport.rename(b, "Keys").unwrap();
        transport.set_muted(b, true).unwrap();
        let c = transport.add_track(Some("Idea"));
        transport.save().unwrap();
        assert!(!transport.is_dirty());
        (a, b, c)
    };

    let mut transport = rig.open();
    let names: Vec<&str> = transport.tracks().iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["Track 1", "Keys", "Idea"]);
    assert_eq!(transport.track(a).unwrap().state(), TrackState::Ready);
    assert_eq!(transport.track(a).unwrap().total_frames(), 48000);
    assert!(transport.track(b).unwrap().is_muted());
    assert_eq!(transport.track(c).unwrap().state(), TrackState::Empty);

    let d = transport.add_track(None);
    assert_eq!(transport.track(d).unwrap().name(), "Track 4");
}

#[test]
fn test_missing_take_loads_empty() {
    let rig = Rig::new();
    let id = {
        let mut transport = rig.open();
        let id = imported(&mut transport, &rig.tone("a.wav", 48000, 1.0, 100));
        transport.save().unwrap();
        std::fs::remove_file(transport.track(id).unwrap().file().unwrap()).unwrap();
        id
    };

    let transport = rig.open();
    assert_eq!(transport.track(id).unwrap().state(), TrackState::Empty);
}

#[test]
fn test_save_purges_replaced_and_deleted_takes() {
    let rig = Rig::new();
    let mut transport = rig.open();
    let a = imported(&mut transport, &rig.tone("a.wav", 48000, 1.0, 100));
    let b = imported(&mut transport, &rig.tone("b.wav", 48000, 1.0, 100));
    let stray = rig.project().join("audio").join("stray.wav");
    std::fs::write(&stray, b"leftover").unwrap();

    transport.delete_track(b).unwrap();
    transport.save().unwrap();

    let remaining: Vec<_> = std::fs::read_dir(rig.project().join("audio"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(remaining, vec![transport.track(a).unwrap().file().unwrap().to_path_buf()]);
}

#[test]
fn test_save_keeps_take_being_recorded() {
    let rig = Rig::new();
    let mut transport = rig.open();
    let a = transport.add_track(None);
    transport.record(a).unwrap();

    transport.save().unwrap();
    transport.stop_recording(a).unwrap();

    assert_eq!(transport.track(a).unwrap().state(), TrackState::Ready);
}

// === Shell Tests ===

#[test]
fn test_shell_session() {
    let rig = Rig::new();
    let mut shell = Shell::new(rig.open());
    let script = "\
add
add Bass
record 1
record Bass
stop-rec
play-all
latency 100
monitor on
status
quit
";
    let mut output = Vec::new();
    shell.run(script.as_bytes(), &mut output).unwrap();
    let output = String::from_utf8(output).unwrap();

    assert!(output.contains("Added 'Track 1'"));
    assert!(output.contains("Added 'Bass'"));
    assert!(output.contains("error [CONFLICT]"));
    assert!(output.contains("Transport: Playing"));
    assert!(output.contains("error [INVALID_LATENCY]"));
    assert!(output.contains("Monitoring on"));
    assert!(output.contains("Audio: mock backend"));
    assert!(output.contains("Saved."));
    assert_eq!(rig.backend.live_count(), 0);

    // The session was saved on the way out
    let transport = rig.open();
    assert_eq!(transport.tracks().len(), 2);
    assert_eq!(transport.tracks()[0].state(), TrackState::Ready);
}

//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::backend::{AudioBackend, MockBackend, PipeWireBackend};
use crate::cli::shell::Shell;
use crate::config::EngineConfig;
use crate::engine::{EngineContext, ProcessSupervisor, TrackEngine, TransportController};
use crate::error::{EngineError, Result};
use crate::project;

/// How the front-end should build the engine
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub config: EngineConfig,
    /// Use the in-process mock instead of the PipeWire tools
    pub dry_run: bool,
}

/// Build an engine context from the options
pub fn build_context(options: &SessionOptions) -> EngineContext {
    let backend: Arc<dyn AudioBackend> = if options.dry_run {
        let mock = MockBackend::new();
        mock.set_recording(options.config.sample_rate as u64 * 2, 0);
        Arc::new(mock)
    } else {
        Arc::new(PipeWireBackend::new(&options.config))
    };
    let supervisor = Arc::new(ProcessSupervisor::new(backend, options.config.stop_grace()));
    info!(
        "Using {} audio backend (stop grace {:?})",
        supervisor.backend_name(),
        supervisor.grace()
    );
    EngineContext::new(options.config.clone(), supervisor, project::audio_dir(Path::new(".")))
}

/// Open an existing project; unlike the shell this never creates one
fn open_existing(path: &Path, options: &SessionOptions) -> Result<TransportController> {
    if !project::is_project(path) {
        return Err(EngineError::InvalidProject {
            path: path.to_path_buf(),
            reason: format!("no {} found", project::PROJECT_FILE),
        });
    }
    TransportController::open(path, build_context(options))
}

fn print_track_row(index: usize, track: &TrackEngine) {
    let length = track.wav_info().map_or(0.0, |info| info.duration_secs());
    println!(
        "{:>3}  {:<24} {:<18} {:>8.2}s  {}{}",
        index + 1,
        track.name(),
        track.label(),
        length,
        track.id().short(),
        if track.is_muted() { "  [muted]" } else { "" }
    );
}

/// List the tracks of a project.
pub fn list_tracks(path: &Path, options: &SessionOptions) -> Result<()> {
    let transport = open_existing(path, options)?;

    println!(
        "Project: {} ({})",
        transport.project_name().unwrap_or("Untitled"),
        path.display()
    );
    println!("{:-<72}", "");
    if transport.tracks().is_empty() {
        println!("No tracks.");
    }
    for (i, track) in transport.tracks().iter().enumerate() {
        print_track_row(i, track);
    }
    Ok(())
}

/// Export one track.
pub fn export_track(path: &Path, track: &str, dest: &Path, options: &SessionOptions) -> Result<()> {
    let transport = open_existing(path, options)?;
    let id = transport
        .find_track(track)
        .ok_or_else(|| EngineError::TrackNotFound {
            id: track.to_string(),
        })?;

    transport.export_track(id, dest)?;
    println!("Exported '{}' to {}", transport.track(id)?.name(), dest.display());
    Ok(())
}

/// Mix every audible track.
pub fn export_mixed(path: &Path, dest: &Path, options: &SessionOptions) -> Result<()> {
    let transport = open_existing(path, options)?;
    let report = transport.export_mixed(dest)?;

    println!(
        "Mixed {} track(s) into {} ({:.2}s, {} Hz, {} ch)",
        report.contributors.len(),
        dest.display(),
        report.duration_secs(),
        report.sample_rate,
        report.channels
    );
    for skipped in &report.skipped {
        warn!("Skipped '{}': {}", skipped.name, skipped.reason);
    }
    if report.clipped() {
        println!("WARNING: the mix clipped (peak {:.2}); consider muting a track", report.peak);
    }
    Ok(())
}

/// Export every track plus the mix.
///
/// Individual failures are printed; the command only fails if nothing at all
/// could be exported.
pub fn export_all(path: &Path, dir: &Path, options: &SessionOptions) -> Result<()> {
    let transport = open_existing(path, options)?;
    let report = transport.export_all(dir);

    for file in &report.exported {
        println!("Exported {}", file.display());
    }
    if let Some(mix) = &report.mix {
        println!("Exported {}", mix.path.display());
    }
    for name in &report.empty {
        println!("Skipped '{}' (no audio)", name);
    }
    for failure in &report.failures {
        println!("FAILED {}: {}", failure.item, failure.error);
    }

    if report.exported.is_empty() && report.mix.is_none() {
        return Err(EngineError::NothingToMix);
    }
    Ok(())
}

/// Run the interactive shell on stdin/stdout.
pub fn run_shell(path: &Path, options: &SessionOptions) -> Result<()> {
    let transport = TransportController::open(path, build_context(options))?;
    let mut shell = Shell::new(transport);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    shell
        .run(stdin.lock(), &mut stdout)
        .map_err(|e| EngineError::io(path, e))
}

/// Read the configuration file if one was given.
pub fn load_options(config: Option<&Path>, dry_run: bool) -> Result<SessionOptions> {
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    Ok(SessionOptions { config, dry_run })
}

/// Read a line, returning `None` at end of input
pub(crate) fn read_line<R: BufRead>(input: &mut R, output: &mut impl Write, prompt: &str) -> io::Result<Option<String>> {
    write!(output, "{}", prompt)?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

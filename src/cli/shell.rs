//! Interactive shell
//!
//! A line-oriented driver for a session. Each line is one engine command;
//! pipelines that finished on their own are reported before the next prompt.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use log::debug;

use crate::cli::commands::read_line;
use crate::engine::{GroupReport, TrackCompletion, TrackId, TransportController};
use crate::error::{EngineError, Result};

const PROMPT: &str = "overdub> ";

const HELP: &str = "\
Tracks are addressed by number (1-based), name or id prefix.

  add [name]              add an empty track
  record <t>              start recording a take
  stop-rec [t]            finish the take (defaults to the recording track)
  play <t> | pause <t> | stop <t>
  mute <t> | unmute <t>
  rename <t> <name>
  delete <t>
  import <t> <file.wav>
  play-all | pause-all | toggle | stop-all
  monitor on|off          live input monitoring
  latency <32|64|128|256|512>
  export-track <t> <dest> | export-mixed <dest> | export-all <dir>
  status                  show tracks and transport
  save                    write project.json
  quit                    save if needed and exit";

/// One parsed shell line
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Add(Option<String>),
    Record(String),
    StopRecording(Option<String>),
    Play(String),
    Pause(String),
    Stop(String),
    Mute(String, bool),
    Rename(String, String),
    Delete(String),
    Import(String, PathBuf),
    PlayAll,
    PauseAll,
    Toggle,
    StopAll,
    Monitor(bool),
    Latency(u32),
    ExportTrack(String, PathBuf),
    ExportMixed(PathBuf),
    ExportAll(PathBuf),
    Status,
    Save,
    Help,
    Quit,
}

impl ShellCommand {
    /// Parse one input line
    ///
    /// Returns `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> std::result::Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let track = |usage: &str| -> std::result::Result<String, String> {
            if rest.is_empty() {
                Err(format!("usage: {}", usage))
            } else {
                Ok(rest.to_string())
            }
        };
        let track_and = |usage: &str| -> std::result::Result<(String, String), String> {
            match rest.split_once(char::is_whitespace) {
                Some((t, arg)) if !arg.trim().is_empty() => Ok((t.to_string(), arg.trim().to_string())),
                _ => Err(format!("usage: {}", usage)),
            }
        };
        let path = |usage: &str| -> std::result::Result<PathBuf, String> {
            if rest.is_empty() {
                Err(format!("usage: {}", usage))
            } else {
                Ok(PathBuf::from(rest))
            }
        };

        let command = match verb {
            "add" => ShellCommand::Add((!rest.is_empty()).then(|| rest.to_string())),
            "record" | "rec" => ShellCommand::Record(track("record <track>")?),
            "stop-rec" => ShellCommand::StopRecording((!rest.is_empty()).then(|| rest.to_string())),
            "play" => ShellCommand::Play(track("play <track>")?),
            "pause" => ShellCommand::Pause(track("pause <track>")?),
            "stop" => ShellCommand::Stop(track("stop <track>")?),
            "mute" => ShellCommand::Mute(track("mute <track>")?, true),
            "unmute" => ShellCommand::Mute(track("unmute <track>")?, false),
            "rename" => {
                let (t, name) = track_and("rename <track> <name>")?;
                ShellCommand::Rename(t, name)
            }
            "delete" | "rm" => ShellCommand::Delete(track("delete <track>")?),
            "import" => {
                let (t, file) = track_and("import <track> <file.wav>")?;
                ShellCommand::Import(t, PathBuf::from(file))
            }
            "play-all" => ShellCommand::PlayAll,
            "pause-all" => ShellCommand::PauseAll,
            "toggle" | "space" => ShellCommand::Toggle,
            "stop-all" => ShellCommand::StopAll,
            "monitor" => match rest {
                "on" => ShellCommand::Monitor(true),
                "off" => ShellCommand::Monitor(false),
                _ => return Err("usage: monitor on|off".to_string()),
            },
            "latency" => ShellCommand::Latency(
                rest.parse()
                    .map_err(|_| "usage: latency <32|64|128|256|512>".to_string())?,
            ),
            "export-track" => {
                let (t, dest) = track_and("export-track <track> <dest>")?;
                ShellCommand::ExportTrack(t, PathBuf::from(dest))
            }
            "export-mixed" => ShellCommand::ExportMixed(path("export-mixed <dest>")?),
            "export-all" => ShellCommand::ExportAll(path("export-all <dir>")?),
            "status" | "ls" => ShellCommand::Status,
            "save" => ShellCommand::Save,
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" | "q" => ShellCommand::Quit,
            other => return Err(format!("unknown command '{}' (try 'help')", other)),
        };
        Ok(Some(command))
    }
}

/// Whether the shell keeps reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Interactive driver around a session
pub struct Shell {
    transport: TransportController,
}

impl Shell {
    pub fn new(transport: TransportController) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &TransportController {
        &self.transport
    }

    /// Read commands until `quit` or end of input
    ///
    /// Unsaved changes are saved on the way out and every pipeline is
    /// brought down.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, output: &mut W) -> io::Result<()> {
        writeln!(output, "Type 'help' for commands.")?;
        loop {
            let Some(line) = read_line(&mut input, output, PROMPT)? else {
                writeln!(output)?;
                break;
            };
            self.report_completions(output)?;

            let command = match ShellCommand::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(usage) => {
                    writeln!(output, "{}", usage)?;
                    continue;
                }
            };
            debug!("Shell command: {:?}", command);

            match self.execute(command, output) {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => report_error(output, &e)?,
            }
        }

        self.transport.shutdown();
        if self.transport.is_dirty() {
            match self.transport.save() {
                Ok(()) => writeln!(output, "Saved.")?,
                Err(e) => report_error(output, &e)?,
            }
        }
        Ok(())
    }

    fn report_completions<W: Write>(&mut self, output: &mut W) -> io::Result<()> {
        for (id, completion) in self.transport.poll() {
            let name = self.name_of(id);
            match completion {
                TrackCompletion::PlaybackFinished => writeln!(output, "'{}' finished playing", name)?,
                TrackCompletion::RecorderExited => {
                    writeln!(output, "Recorder for '{}' stopped unexpectedly", name)?
                }
            }
        }
        Ok(())
    }

    fn name_of(&self, id: TrackId) -> String {
        self.transport
            .track(id)
            .map(|t| t.name().to_string())
            .unwrap_or_else(|_| id.short())
    }

    fn resolve(&self, key: &str) -> Result<TrackId> {
        self.transport
            .find_track(key)
            .ok_or_else(|| EngineError::TrackNotFound { id: key.to_string() })
    }

    fn execute<W: Write>(&mut self, command: ShellCommand, output: &mut W) -> Result<Flow> {
        let t = &mut self.transport;
        match command {
            ShellCommand::Add(name) => {
                let id = t.add_track(name.as_deref());
                say(output, format!("Added '{}'", t.track(id)?.name()));
            }
            ShellCommand::Record(key) => {
                let id = self.resolve(&key)?;
                self.transport.record(id)?;
                say(output, format!("Recording '{}'", self.name_of(id)));
            }
            ShellCommand::StopRecording(key) => {
                let id = match key {
                    Some(key) => self.resolve(&key)?,
                    None => t.recording_track().ok_or(EngineError::InvalidState {
                        operation: "stop recording",
                        state: crate::engine::TrackState::Ready,
                    })?,
                };
                self.transport.stop_recording(id)?;
                let track = self.transport.track(id)?;
                let secs = track.wav_info().map_or(0.0, |i| i.duration_secs());
                say(output, format!("'{}': {} ({:.2}s)", track.name(), track.label(), secs));
            }
            ShellCommand::Play(key) => {
                let id = self.resolve(&key)?;
                self.transport.play(id)?;
            }
            ShellCommand::Pause(key) => {
                let id = self.resolve(&key)?;
                self.transport.pause(id)?;
                let secs = self.transport.track(id)?.position_secs(self.transport.context());
                say(output, format!("Paused at {:.3}s", secs));
            }
            ShellCommand::Stop(key) => {
                let id = self.resolve(&key)?;
                self.transport.stop(id)?;
            }
            ShellCommand::Mute(key, muted) => {
                let id = self.resolve(&key)?;
                self.transport.set_muted(id, muted)?;
            }
            ShellCommand::Rename(key, name) => {
                let id = self.resolve(&key)?;
                self.transport.rename(id, &name)?;
            }
            ShellCommand::Delete(key) => {
                let id = self.resolve(&key)?;
                let name = self.name_of(id);
                self.transport.delete_track(id)?;
                say(output, format!("Deleted '{}'", name));
            }
            ShellCommand::Import(key, file) => {
                let id = self.resolve(&key)?;
                self.transport.import_file(id, &file)?;
                say(output, format!("Imported {}", file.display()));
            }
            ShellCommand::PlayAll => {
                let report = t.play_all();
                self.report_group(output, "play", report);
            }
            ShellCommand::PauseAll => {
                let report = t.pause_all();
                self.report_group(output, "pause", report);
            }
            ShellCommand::Toggle => {
                let report = t.toggle();
                self.report_group(output, "toggle", report);
            }
            ShellCommand::StopAll => {
                let report = t.stop_all();
                self.report_group(output, "stop", report);
            }
            ShellCommand::Monitor(true) => {
                t.enable_monitor()?;
                say(output, format!("Monitoring on ({})", t.monitor_state().latency));
            }
            ShellCommand::Monitor(false) => {
                t.disable_monitor();
                say(output, "Monitoring off".to_string());
            }
            ShellCommand::Latency(samples) => {
                t.set_monitor_latency(samples)?;
                let latency = t.monitor_state().latency;
                let ms = latency.millis(t.context().config.sample_rate);
                say(output, format!("Monitor latency {} ({:.1} ms)", latency, ms));
            }
            ShellCommand::ExportTrack(key, dest) => {
                let id = self.resolve(&key)?;
                self.transport.export_track(id, &dest)?;
                say(output, format!("Exported {}", dest.display()));
            }
            ShellCommand::ExportMixed(dest) => {
                let report = t.export_mixed(&dest)?;
                say(
                    output,
                    format!("Mixed {} track(s) into {}", report.contributors.len(), dest.display()),
                );
            }
            ShellCommand::ExportAll(dir) => {
                let report = t.export_all(&dir);
                say(
                    output,
                    format!(
                        "Exported {} track(s){} to {}",
                        report.exported.len(),
                        if report.mix.is_some() { " and the mix" } else { "" },
                        dir.display()
                    ),
                );
                for failure in &report.failures {
                    say(output, format!("  failed {}: {}", failure.item, failure.error));
                }
            }
            ShellCommand::Status => self.print_status(output),
            ShellCommand::Save => {
                t.save()?;
                say(output, "Saved.".to_string());
            }
            ShellCommand::Help => say(output, HELP.to_string()),
            ShellCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn report_group<W: Write>(&self, output: &mut W, verb: &str, report: GroupReport) {
        if report.is_noop() {
            say(output, format!("Nothing to {}", verb));
        }
        for (id, error) in &report.failures {
            say(output, format!("'{}': {}", self.name_of(*id), error));
        }
        say(output, format!("Transport: {}", self.transport.transport_state()));
    }

    fn print_status<W: Write>(&self, output: &mut W) {
        let t = &self.transport;
        let ctx = t.context();
        let monitor = t.monitor_state();
        say(
            output,
            format!(
                "Transport: {}   Monitor: {} ({}){}",
                t.transport_state(),
                if monitor.enabled { "on" } else { "off" },
                monitor.latency,
                if t.is_dirty() { "   [unsaved]" } else { "" }
            ),
        );
        for (i, track) in t.tracks().iter().enumerate() {
            say(
                output,
                format!(
                    "{:>3}  {:<24} {:<18} {:>8.2}s / {:.2}s",
                    i + 1,
                    track.name(),
                    track.label(),
                    track.position_secs(ctx),
                    track.wav_info().map_or(0.0, |info| info.duration_secs())
                ),
            );
        }

        let handles = ctx.supervisor.live_handles();
        say(
            output,
            format!(
                "Audio: {} backend, {} live process(es)",
                ctx.supervisor.backend_name(),
                handles.len()
            ),
        );
        for handle in &handles {
            say(output, format!("  {}  {:<8} {}", handle.id, handle.role.to_string(), handle.owner));
        }
    }
}

/// Best-effort line to the shell's output
fn say<W: Write>(output: &mut W, line: String) {
    if let Err(e) = writeln!(output, "{}", line) {
        debug!("Shell output failed: {}", e);
    }
}

fn report_error<W: Write>(output: &mut W, error: &EngineError) -> io::Result<()> {
    writeln!(output, "error [{}]: {}", error.error_code(), error)?;
    for hint in error.recovery_suggestions() {
        writeln!(output, "  hint: {}", hint)?;
    }
    Ok(())
}

//! PipeWire subprocess backend
//!
//! Records with `pw-record`, plays with `pw-play`, and monitors by piping
//! `pw-record -` into `pw-play -`. Resuming mid-file is done by handing the
//! player a trimmed scratch copy, since `pw-play` cannot seek.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use log::{debug, info};
use uuid::Uuid;

use super::{AudioBackend, LaunchRequest, Pipeline, PreparedLaunch, ProcessRole};
use crate::config::EngineConfig;
use crate::engine::io::write_trimmed_copy;
use crate::error::{EngineError, Result};

/// Spawns PipeWire command line tools
#[derive(Debug, Clone)]
pub struct PipeWireBackend {
    record_program: String,
    play_program: String,
    target: String,
    scratch_dir: PathBuf,
}

impl PipeWireBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            record_program: config.record_program.clone(),
            play_program: config.play_program.clone(),
            target: config.target.clone(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Directory for trimmed resume copies (defaults to the system temp dir)
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    fn spawn_record(&self, request: &LaunchRequest, path: &Path) -> Result<Child> {
        let params = &request.params;
        let mut command = Command::new(&self.record_program);
        command
            .args(["--target", &self.target])
            .args(["--rate", &params.sample_rate.to_string()])
            .args(["--channels", &params.channels.to_string()])
            .args(["--format", "s16"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
            .spawn()
            .map_err(|e| launch_error(ProcessRole::Record, Some(path), &self.record_program, e))
    }

    fn spawn_play(&self, request: &LaunchRequest, source: &Path) -> Result<Child> {
        let mut command = Command::new(&self.play_program);
        command
            .args(["--target", &self.target])
            .args(["--volume", &format!("{:.3}", request.params.volume)])
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
            .spawn()
            .map_err(|e| launch_error(ProcessRole::Play, request.path(), &self.play_program, e))
    }

    fn spawn_monitor(&self, request: &LaunchRequest) -> Result<Vec<Child>> {
        let params = &request.params;
        let latency = params.latency.unwrap_or(64).to_string();
        let rate = params.sample_rate.to_string();
        let channels = params.channels.to_string();

        let mut capture = Command::new(&self.record_program)
            .args(["--target", &self.target])
            .args(["--latency", &latency])
            .args(["--rate", &rate])
            .args(["--channels", &channels])
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| launch_error(ProcessRole::Monitor, None, &self.record_program, e))?;

        let capture_out = match capture.stdout.take() {
            Some(out) => out,
            None => {
                reap(&mut capture);
                return Err(EngineError::Launch {
                    role: ProcessRole::Monitor,
                    path: None,
                    reason: "capture process has no output pipe".to_string(),
                    source: None,
                });
            }
        };

        let render = Command::new(&self.play_program)
            .args(["--target", &self.target])
            .args(["--latency", &latency])
            .args(["--rate", &rate])
            .args(["--channels", &channels])
            .arg("-")
            .stdin(Stdio::from(capture_out))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match render {
            Ok(render) => Ok(vec![capture, render]),
            Err(e) => {
                reap(&mut capture);
                Err(launch_error(ProcessRole::Monitor, None, &self.play_program, e))
            }
        }
    }
}

impl AudioBackend for PipeWireBackend {
    fn name(&self) -> &str {
        "pipewire"
    }

    fn prepare(&self, request: LaunchRequest) -> Result<PreparedLaunch> {
        let start = request.params.start_frame;
        match (&request.role, request.path.clone()) {
            (ProcessRole::Play, Some(path)) if start > 0 => {
                let scratch = self
                    .scratch_dir
                    .join(format!("overdub-resume-{}.wav", Uuid::new_v4().simple()));
                write_trimmed_copy(&path, &scratch, start)?;
                debug!(
                    "Prepared resume copy of {} from frame {} at {}",
                    path.display(),
                    start,
                    scratch.display()
                );
                Ok(PreparedLaunch {
                    request,
                    source: Some(scratch.clone()),
                    scratch: Some(scratch),
                })
            }
            _ => Ok(PreparedLaunch::direct(request)),
        }
    }

    fn spawn(&self, prepared: &PreparedLaunch) -> Result<Box<dyn Pipeline>> {
        let request = &prepared.request;
        let children = match request.role {
            ProcessRole::Record => {
                let path = require_path(request)?;
                vec![self.spawn_record(request, path)?]
            }
            ProcessRole::Play => {
                let source = match prepared.source.as_deref() {
                    Some(source) => source,
                    None => require_path(request)?,
                };
                vec![self.spawn_play(request, source)?]
            }
            ProcessRole::Monitor => self.spawn_monitor(request)?,
        };

        info!(
            "Spawned {} pipeline (pid {:?})",
            request.role,
            children.first().map(|c| c.id())
        );
        Ok(Box::new(ChildPipeline { children }))
    }
}

/// One or more OS processes forming a pipeline
struct ChildPipeline {
    children: Vec<Child>,
}

impl Pipeline for ChildPipeline {
    fn pid(&self) -> Option<u32> {
        self.children.first().map(|c| c.id())
    }

    fn request_stop(&mut self) -> io::Result<()> {
        for child in &mut self.children {
            if child.try_wait()?.is_none() {
                terminate(child)?;
            }
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        for child in &mut self.children {
            reap(child);
        }
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<bool> {
        let mut all_exited = true;
        for child in &mut self.children {
            if child.try_wait()?.is_none() {
                all_exited = false;
            }
        }
        Ok(all_exited)
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs to
    // a child we have not reaped yet, so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.kill()
}

/// Kill and wait, ignoring a child that already exited
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn require_path(request: &LaunchRequest) -> Result<&Path> {
    request.path().ok_or_else(|| EngineError::Launch {
        role: request.role,
        path: None,
        reason: "no file path given".to_string(),
        source: None,
    })
}

fn launch_error(role: ProcessRole, path: Option<&Path>, program: &str, e: io::Error) -> EngineError {
    let reason = if e.kind() == io::ErrorKind::NotFound {
        format!("{} not found; install the PipeWire command line tools", program)
    } else {
        format!("{} failed to start: {}", program, e)
    };
    EngineError::Launch {
        role,
        path: path.map(Path::to_path_buf),
        reason,
        source: Some(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DeviceParams;

    fn backend_with(program: &str) -> PipeWireBackend {
        let config = EngineConfig {
            record_program: program.to_string(),
            play_program: program.to_string(),
            ..EngineConfig::default()
        };
        PipeWireBackend::new(&config)
    }

    #[test]
    fn test_missing_tool_is_launch_error() {
        let backend = backend_with("overdub-definitely-missing-tool");
        let prepared = PreparedLaunch::direct(LaunchRequest::record("/tmp/never.wav", DeviceParams::default()));

        let err = match backend.spawn(&prepared) {
            Err(e) => e,
            Ok(_) => panic!("spawn of a missing tool must fail"),
        };
        assert_eq!(err.error_code(), "LAUNCH_ERROR");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_prepare_from_origin_needs_no_scratch() {
        let backend = backend_with("pw-play");
        let prepared = backend
            .prepare(LaunchRequest::play("/tmp/a.wav", DeviceParams::default()))
            .unwrap();
        assert!(prepared.scratch.is_none());
    }

    #[test]
    fn test_resume_writes_trimmed_copy_into_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("take.wav");
        crate::engine::io::write_pcm16(&source, 48000, 1, &[7; 100]).unwrap();
        let scratch_dir = dir.path().join("scratch");
        std::fs::create_dir(&scratch_dir).unwrap();
        let backend = backend_with("pw-play").with_scratch_dir(&scratch_dir);

        let params = DeviceParams {
            start_frame: 40,
            ..DeviceParams::default()
        };
        let prepared = backend.prepare(LaunchRequest::play(&source, params)).unwrap();

        let scratch = prepared.scratch.clone().unwrap();
        assert!(scratch.starts_with(&scratch_dir));
        assert_eq!(prepared.source.as_deref(), Some(scratch.as_path()));
        assert_eq!(crate::engine::io::probe_wav(&scratch).unwrap().frames, 60);
    }
}

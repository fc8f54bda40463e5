//! Mixdown and export
//!
//! Offline work over finished takes: copying a single track out, summing
//! tracks into one file, and the batch export that does both.
//!
//! All tracks start at the project origin. The mix is summed in `f32` and
//! only clamped when encoded, so intermediate overs are preserved until the
//! final conversion to 16-bit.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::engine::buffer::AudioBuffer;
use crate::engine::io::{read_audio, write_buffer_pcm16};
use crate::engine::track::TrackEngine;
use crate::error::{EngineError, Result};

/// File name reserved for the mix in a batch export
pub const MIXED_FILE_NAME: &str = "mixed.wav";

/// What the exporter needs to know about a track
#[derive(Debug, Clone, PartialEq)]
pub struct MixSource {
    pub name: String,
    /// Backing take; `None` for an empty track
    pub file: Option<PathBuf>,
    pub muted: bool,
}

impl MixSource {
    pub fn new(name: impl Into<String>, file: Option<PathBuf>, muted: bool) -> Self {
        Self {
            name: name.into(),
            file,
            muted,
        }
    }
}

impl From<&TrackEngine> for MixSource {
    fn from(track: &TrackEngine) -> Self {
        Self {
            name: track.name().to_string(),
            file: track.file().map(Path::to_path_buf),
            muted: track.is_muted(),
        }
    }
}

/// A track left out of a mix, and why
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTrack {
    pub name: String,
    pub reason: String,
}

/// Outcome of a successful mix
#[derive(Debug, Clone, PartialEq)]
pub struct MixReport {
    pub path: PathBuf,
    /// Names of the tracks summed into the mix, in order
    pub contributors: Vec<String>,
    /// Qualifying tracks that could not be decoded
    pub skipped: Vec<SkippedTrack>,
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
    /// Peak before clamping; above 1.0 means the encode saturated
    pub peak: f32,
}

impl MixReport {
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn clipped(&self) -> bool {
        self.peak > 1.0
    }
}

/// One item of a batch export that failed
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFailure {
    /// Track name, or `mixed` for the mix
    pub item: String,
    pub error: String,
}

/// Outcome of a batch export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    /// Per-track files written
    pub exported: Vec<PathBuf>,
    /// The mix, if one was written
    pub mix: Option<MixReport>,
    /// Tracks with no audio
    pub empty: Vec<String>,
    pub failures: Vec<ExportFailure>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn create_parent(dest: &Path) -> Result<()> {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))
        }
        _ => Ok(()),
    }
}

/// Copy one track's take to `dest`
///
/// # Errors
/// * `EmptyTrack` - If the track has no audio
/// * `Io` - If the take is missing or the copy fails
pub fn export_track(source: &MixSource, dest: &Path) -> Result<()> {
    let Some(file) = &source.file else {
        return Err(EngineError::EmptyTrack {
            name: source.name.clone(),
        });
    };
    create_parent(dest)?;
    fs::copy(file, dest).map_err(|e| EngineError::io(file, e))?;
    debug!("Exported '{}' to {}", source.name, dest.display());
    Ok(())
}

/// Sum every audible track into `dest`
///
/// Empty and muted tracks do not contribute. Tracks whose take cannot be
/// decoded are skipped and listed in the report.
///
/// # Errors
/// * `NothingToMix` - If no track qualifies or none decodes
/// * `Io` / `Wav` - If the mix cannot be written
pub fn export_mixed(sources: &[MixSource], dest: &Path) -> Result<MixReport> {
    let mut decoded = Vec::new();
    let mut skipped = Vec::new();

    for source in sources.iter().filter(|s| !s.muted) {
        let Some(file) = &source.file else {
            continue;
        };
        match read_audio(file) {
            Ok(buffer) if !buffer.is_empty() => decoded.push((source.name.clone(), buffer)),
            Ok(_) => skipped.push(SkippedTrack {
                name: source.name.clone(),
                reason: "no audio frames".to_string(),
            }),
            Err(e) => {
                warn!("Skipping '{}' in mix: {}", source.name, e);
                skipped.push(SkippedTrack {
                    name: source.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if decoded.is_empty() {
        return Err(EngineError::NothingToMix);
    }

    let contributors: Vec<String> = decoded.iter().map(|(name, _)| name.clone()).collect();
    let mix = mix_buffers(decoded.into_iter().map(|(_, buffer)| buffer).collect());
    let peak = mix.peak();

    create_parent(dest)?;
    write_buffer_pcm16(&mix, dest)?;
    info!(
        "Mixed {} track(s) into {} ({:.2}s)",
        contributors.len(),
        dest.display(),
        mix.duration_secs()
    );

    Ok(MixReport {
        path: dest.to_path_buf(),
        contributors,
        skipped,
        sample_rate: mix.sample_rate,
        channels: mix.num_channels(),
        frames: mix.num_frames(),
        peak,
    })
}

/// Sum buffers at the first buffer's rate and the widest channel count
///
/// The result is as long as the longest input; shorter inputs are silence
/// past their end.
pub fn mix_buffers(buffers: Vec<AudioBuffer>) -> AudioBuffer {
    let Some(sample_rate) = buffers.first().map(|b| b.sample_rate) else {
        return AudioBuffer::new(0, 1, 48000);
    };
    let channels = buffers.iter().map(AudioBuffer::num_channels).max().unwrap_or(1);

    let aligned: Vec<AudioBuffer> = buffers
        .into_iter()
        .map(|b| b.resampled(sample_rate).with_channels(channels))
        .collect();
    let frames = aligned.iter().map(AudioBuffer::num_frames).max().unwrap_or(0);

    let mut mix = AudioBuffer::new(frames, channels, sample_rate);
    for buffer in &aligned {
        for ch in 0..channels {
            for (out, sample) in mix.channel_mut(ch).iter_mut().zip(buffer.channel(ch)) {
                *out += sample;
            }
        }
    }
    mix
}

/// Export every track with audio plus the mix into `dir`
///
/// Muted tracks are still exported individually. Failures are collected per
/// item and never stop the batch.
pub fn export_all(sources: &[MixSource], dir: &Path) -> ExportReport {
    let mut report = ExportReport::default();

    if let Err(e) = fs::create_dir_all(dir) {
        let error = EngineError::io(dir, e);
        report.failures.push(ExportFailure {
            item: dir.display().to_string(),
            error: error.to_string(),
        });
        return report;
    }

    let mut names = ExportNames::new();
    for source in sources {
        if source.file.is_none() {
            report.empty.push(source.name.clone());
            continue;
        }
        let dest = dir.join(names.claim(&source.name));
        match export_track(source, &dest) {
            Ok(()) => report.exported.push(dest),
            Err(e) => {
                warn!("Export of '{}' failed: {}", source.name, e);
                report.failures.push(ExportFailure {
                    item: source.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    match export_mixed(sources, &dir.join(MIXED_FILE_NAME)) {
        Ok(mix) => report.mix = Some(mix),
        Err(e) => {
            warn!("Mix export failed: {}", e);
            report.failures.push(ExportFailure {
                item: "mixed".to_string(),
                error: e.to_string(),
            });
        }
    }

    info!(
        "Exported {} track(s) to {} ({} failure(s))",
        report.exported.len(),
        dir.display(),
        report.failures.len()
    );
    report
}

/// Replace anything that is not safe in a file name
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        "track".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Hands out unique `.wav` names within one export directory
struct ExportNames {
    taken: HashSet<String>,
}

impl ExportNames {
    fn new() -> Self {
        let mut taken = HashSet::new();
        taken.insert(MIXED_FILE_NAME.to_lowercase());
        Self { taken }
    }

    fn claim(&mut self, name: &str) -> String {
        let stem = sanitize_file_stem(name);
        let mut candidate = format!("{}.wav", stem);
        let mut n = 2;
        while !self.taken.insert(candidate.to_lowercase()) {
            candidate = format!("{} ({}).wav", stem, n);
            n += 1;
        }
        candidate
    }
}

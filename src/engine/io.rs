//! WAV file I/O
//!
//! Probing, decoding and encoding of the WAV files that back tracks. Takes
//! are always written as 16-bit PCM; imports may be any PCM or float WAV that
//! `hound` can read.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, warn};

use crate::engine::buffer::AudioBuffer;
use crate::error::{EngineError, Result};

/// Size of the RIFF/WAVE preamble
const RIFF_HEADER_LEN: u64 = 12;

/// Header facts about a WAV file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Frames per channel
    pub frames: u64,
}

impl WavInfo {
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

fn open_reader(path: &Path) -> Result<WavReader<BufReader<File>>> {
    if !path.exists() {
        return Err(EngineError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
        ));
    }
    WavReader::open(path).map_err(|e| EngineError::Format {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Read the header of a WAV file
///
/// # Errors
/// * `Io` - If the file does not exist
/// * `Format` - If the file is not a WAV file hound can parse
pub fn probe_wav(path: &Path) -> Result<WavInfo> {
    let reader = open_reader(path)?;
    let spec = reader.spec();
    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        frames: reader.duration() as u64,
    })
}

/// Decode a WAV file into a normalized buffer
pub fn read_audio(path: &Path) -> Result<AudioBuffer> {
    let reader = open_reader(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format, path)?;
    Ok(AudioBuffer::from_interleaved(&samples, channels, spec.sample_rate))
}

/// Write interleaved 16-bit samples
pub fn write_pcm16(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) -> Result<()> {
    let spec = pcm16_spec(sample_rate, channels);
    let mut writer = WavWriter::create(path, spec).map_err(|e| EngineError::wav(path, e))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| EngineError::wav(path, e))?;
    }
    writer.finalize().map_err(|e| EngineError::wav(path, e))
}

/// Encode a buffer as 16-bit PCM, clamping anything past full scale
pub fn write_buffer_pcm16(buffer: &AudioBuffer, path: &Path) -> Result<()> {
    let spec = pcm16_spec(buffer.sample_rate, buffer.num_channels() as u16);
    let mut writer = WavWriter::create(path, spec).map_err(|e| EngineError::wav(path, e))?;
    for sample in buffer.to_interleaved() {
        writer
            .write_sample(to_pcm16(sample))
            .map_err(|e| EngineError::wav(path, e))?;
    }
    writer.finalize().map_err(|e| EngineError::wav(path, e))
}

/// Convert a normalized sample to 16-bit, saturating instead of wrapping
#[inline]
pub fn to_pcm16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

fn pcm16_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Copy `src` to `dst`, dropping the first `start_frame` frames
///
/// Used to resume playback mid-file with players that cannot seek. The copy
/// keeps the source's sample format.
pub fn write_trimmed_copy(src: &Path, dst: &Path, start_frame: u64) -> Result<()> {
    let mut reader = open_reader(src)?;
    let spec = reader.spec();
    let start = start_frame.min(reader.duration() as u64) as u32;
    reader.seek(start).map_err(|e| EngineError::io(src, e))?;

    let mut writer = WavWriter::create(dst, spec).map_err(|e| EngineError::wav(dst, e))?;
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => copy_samples::<f32>(&mut reader, &mut writer, src, dst)?,
        (SampleFormat::Int, bits) if bits <= 8 => copy_samples::<i8>(&mut reader, &mut writer, src, dst)?,
        (SampleFormat::Int, bits) if bits <= 16 => copy_samples::<i16>(&mut reader, &mut writer, src, dst)?,
        (SampleFormat::Int, _) => copy_samples::<i32>(&mut reader, &mut writer, src, dst)?,
    }
    writer.finalize().map_err(|e| EngineError::wav(dst, e))
}

fn copy_samples<S: hound::Sample>(
    reader: &mut WavReader<BufReader<File>>,
    writer: &mut WavWriter<std::io::BufWriter<File>>,
    src: &Path,
    dst: &Path,
) -> Result<()> {
    for sample in reader.samples::<S>() {
        let sample = sample.map_err(|e| EngineError::wav(src, e))?;
        writer
            .write_sample(sample)
            .map_err(|e| EngineError::wav(dst, e))?;
    }
    Ok(())
}

/// Repair the size fields of a WAV file whose writer was killed mid-take
///
/// A recorder terminated before it finalizes leaves a `data` chunk size of 0
/// (or 0xFFFFFFFF for streaming writers) even though samples follow. The
/// sizes are rewritten from the real file length. Returns `true` if the file
/// was patched.
pub fn patch_wav_header_if_needed(path: &Path) -> Result<bool> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| EngineError::io(path, e))?;
    patch_header(&mut file).map_err(|e| EngineError::io(path, e))
}

fn patch_header(file: &mut File) -> std::io::Result<bool> {
    let file_len = file.metadata()?.len();
    if file_len < RIFF_HEADER_LEN {
        return Ok(false);
    }

    let mut riff = [0u8; 12];
    file.read_exact(&mut riff)?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Ok(false);
    }

    let mut offset = RIFF_HEADER_LEN;
    let mut block_align: u64 = 0;
    while offset + 8 <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
        let body = offset + 8;

        if &header[0..4] == b"fmt " && size >= 16 && body + 16 <= file_len {
            let mut fmt = [0u8; 16];
            file.read_exact(&mut fmt)?;
            block_align = u16::from_le_bytes([fmt[12], fmt[13]]) as u64;
        }

        if &header[0..4] == b"data" {
            let available = file_len - body;
            let broken = size == 0 || size == u32::MAX as u64 || size > available;
            if !broken {
                return Ok(false);
            }
            let mut actual = available;
            if block_align > 0 {
                actual -= actual % block_align;
            }
            let actual = actual.min(u32::MAX as u64 - body) as u32;
            let riff_size = (body - 8) as u32 + actual;

            file.seek(SeekFrom::Start(offset + 4))?;
            file.write_all(&actual.to_le_bytes())?;
            file.seek(SeekFrom::Start(4))?;
            file.write_all(&riff_size.to_le_bytes())?;
            file.flush()?;
            debug!("Patched WAV data size to {} bytes", actual);
            return Ok(true);
        }

        offset = body + size + (size & 1);
    }

    warn!("WAV file has no data chunk; leaving it untouched");
    Ok(false)
}

/// Read samples from a WAV reader and convert to f32
fn read_samples_as_f32<R: Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
    path: &Path,
) -> Result<Vec<f32>> {
    let format_error = |e: hound::Error| EngineError::Format {
        path: path.to_path_buf(),
        reason: format!("Failed to read samples: {}", e),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(format_error),
        SampleFormat::Int => match bits_per_sample {
            8 => reader
                .samples::<i8>()
                .map(|s| s.map(|v| v as f32 / 128.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(format_error),
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(format_error),
            // 24-bit stored as i32 in hound
            24 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 8388608.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(format_error),
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 2147483648.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(format_error),
            other => Err(EngineError::Format {
                path: path.to_path_buf(),
                reason: format!("{}-bit integer audio is not supported", other),
            }),
        },
    }
}

//! Audio Buffer
//!
//! Decoded audio used during mixdown. Samples are planar `f32` normalized to
//! [-1.0, 1.0); every buffer starts at the project origin.

/// Planar audio data at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is frames
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer
    pub fn new(num_frames: usize, num_channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_frames]; num_channels.max(1)],
            sample_rate,
        }
    }

    /// Build a buffer from interleaved samples
    pub fn from_interleaved(interleaved: &[f32], num_channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: deinterleave(interleaved, num_channels.max(1)),
            sample_rate,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Frames per channel
    pub fn num_frames(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.num_frames() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.num_frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Interleave channels: [[L,L,...], [R,R,...]] -> [L,R,L,R,...]
    pub fn to_interleaved(&self) -> Vec<f32> {
        interleave(&self.samples)
    }

    /// Absolute peak across all channels
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// Convert to a different channel count
    ///
    /// Mono is duplicated into every output channel; anything else is averaged
    /// down to mono first.
    pub fn with_channels(self, target: usize) -> Self {
        let target = target.max(1);
        if self.num_channels() == target {
            return self;
        }

        let mono = if self.num_channels() == 1 {
            self.samples.into_iter().next().unwrap_or_default()
        } else {
            let count = self.samples.len() as f32;
            let frames = self.samples.first().map_or(0, Vec::len);
            (0..frames)
                .map(|i| self.samples.iter().map(|ch| ch[i]).sum::<f32>() / count)
                .collect()
        };

        Self {
            samples: vec![mono; target],
            sample_rate: self.sample_rate,
        }
    }

    /// Resample every channel to `target_rate`
    pub fn resampled(self, target_rate: u32) -> Self {
        if self.sample_rate == target_rate || self.sample_rate == 0 {
            return self;
        }
        let ratio = target_rate as f64 / self.sample_rate as f64;
        Self {
            samples: self
                .samples
                .iter()
                .map(|channel| resample_linear(channel, ratio))
                .collect(),
            sample_rate: target_rate,
        }
    }
}

/// De-interleave samples from [L,R,L,R,...] to [[L,L,...], [R,R,...]]
pub(crate) fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut result = vec![Vec::with_capacity(frames); channels];

    for (i, sample) in samples.iter().take(frames * channels).enumerate() {
        result[i % channels].push(*sample);
    }

    result
}

/// Interleave channels from [[L,L,...], [R,R,...]] to [L,R,L,R,...]
pub(crate) fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    if channels.is_empty() {
        return Vec::new();
    }

    let frames = channels[0].len();
    let mut result = Vec::with_capacity(frames * channels.len());

    for frame in 0..frames {
        for channel in channels {
            result.push(channel[frame]);
        }
    }

    result
}

/// Linear interpolation resampling
///
/// Good enough for lining up an imported take recorded at another rate;
/// aliasing on downsampling is accepted.
pub(crate) fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let source_len = samples.len();
    let target_len = ((source_len as f64) * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(target_len);

    for i in 0..target_len {
        let src_pos = i as f64 / ratio;
        let src_idx = src_pos.floor() as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let sample = if src_idx + 1 < source_len {
            samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac
        } else if src_idx < source_len {
            samples[src_idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

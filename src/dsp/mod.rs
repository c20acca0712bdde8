//! The lo-fi signal chain: tempo → resample → reverb → delay → compression.
//!
//! Every stage takes and returns a planar [`AudioBuffer`]. After each stage the buffer is checked
//! for emptiness and non-finite samples, and the transform deadline is checked, so a failure is
//! always reported against the stage that caused it.

mod compressor;
mod delay;
mod resample;
mod reverb;
mod tempo;
mod wav;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactScope;
use crate::error::AppError;
use crate::source::RawAudioAsset;

pub use compressor::{CompressorSettings, compress};
pub use delay::feedback_delay;
pub use resample::{Biquad, downsample, sinc_resample};
pub use reverb::{Reverb, ReverbSettings};
pub use tempo::varispeed;
pub use wav::{read_wav, write_wav};

pub const PROCESSED_FILE_NAME: &str = "processed.wav";
pub const MAX_DELAY_MS: u32 = 2000;
/// Output ceiling applied after any stage that can raise the level.
pub const PEAK_CEILING: f32 = 0.98;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformStage {
    Input,
    Tempo,
    Resample,
    Reverb,
    Delay,
    Compression,
    Output,
}

impl TransformStage {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformStage::Input => "input",
            TransformStage::Tempo => "tempo",
            TransformStage::Resample => "resample",
            TransformStage::Reverb => "reverb",
            TransformStage::Delay => "delay",
            TransformStage::Compression => "compression",
            TransformStage::Output => "output",
        }
    }
}

impl fmt::Display for TransformStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Planar f32 samples, one `Vec` per channel, all the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0 || self.sample_rate == 0
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    fn validate(&self) -> Result<(), String> {
        if self.channels.is_empty() || self.is_empty() {
            return Err("buffer is empty".to_string());
        }
        let frames = self.frames();
        if self.channels.iter().any(|c| c.len() != frames) {
            return Err("channels differ in length".to_string());
        }
        if let Some(pos) = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .position(|s| !s.is_finite())
        {
            return Err(format!("non-finite sample at index {pos}"));
        }
        Ok(())
    }
}

/// Scale the whole buffer down so its peak sits at `ceiling`. Quieter buffers are untouched.
pub fn peak_limit(buffer: &mut AudioBuffer, ceiling: f32) {
    let peak = buffer.peak();
    if peak > ceiling && peak.is_finite() {
        let gain = ceiling / peak;
        for sample in buffer.channels.iter_mut().flat_map(|c| c.iter_mut()) {
            *sample *= gain;
        }
    }
}

/// Caller-tunable transform settings. Omitted fields take their defaults; out-of-range values are
/// clamped by [`TransformParameters::normalized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformParameters {
    /// Playback speed, below 1 slows down. Pitch drops with it.
    pub tempo_ratio: f32,
    /// `None` keeps the source rate.
    pub target_sample_rate: Option<u32>,
    pub room_size: f32,
    pub damping: f32,
    pub wet_level: f32,
    pub dry_level: f32,
    pub delay_ms: u32,
    pub compress: bool,
}

impl Default for TransformParameters {
    fn default() -> Self {
        Self {
            tempo_ratio: 0.92,
            target_sample_rate: Some(22_050),
            room_size: 0.75,
            damping: 0.5,
            wet_level: 0.08,
            dry_level: 0.2,
            delay_ms: 2,
            compress: true,
        }
    }
}

impl TransformParameters {
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        Self {
            tempo_ratio: clamp_or(self.tempo_ratio, 0.25, 1.0, defaults.tempo_ratio),
            target_sample_rate: self.target_sample_rate.map(|r| r.clamp(8_000, 48_000)),
            room_size: clamp_or(self.room_size, 0.0, 1.0, defaults.room_size),
            damping: clamp_or(self.damping, 0.0, 1.0, defaults.damping),
            wet_level: clamp_or(self.wet_level, 0.0, 1.0, defaults.wet_level),
            dry_level: clamp_or(self.dry_level, 0.0, 1.0, defaults.dry_level),
            delay_ms: self.delay_ms.min(MAX_DELAY_MS),
            compress: self.compress,
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

/// Transformed audio on local storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedAudioAsset {
    pub path: PathBuf,
    pub encoding: String,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TransformEngine {
    timeout: Option<Duration>,
}

impl TransformEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Read `asset`, run the chain and write `processed.wav` into `scope`.
    pub fn transform(
        &self,
        asset: &RawAudioAsset,
        params: &TransformParameters,
        scope: &mut ArtifactScope,
    ) -> Result<ProcessedAudioAsset, AppError> {
        let input = read_wav(&asset.path)
            .map_err(|e| AppError::processing(TransformStage::Input, e.to_string()))?;
        log::debug!(
            target: "lofi::dsp",
            "Transforming {} ({} Hz, {} ch, {:.1}s) with {:?}",
            asset.path.display(),
            input.sample_rate,
            input.channel_count(),
            input.duration_seconds(),
            params
        );
        let output = self.process(input, params)?;
        let path = scope
            .allocate(PROCESSED_FILE_NAME)
            .map_err(|e| AppError::processing(TransformStage::Output, e.to_string()))?;
        write_output(&path, &output)?;
        Ok(ProcessedAudioAsset {
            path,
            encoding: "pcm_s16le".to_string(),
            duration_seconds: output.duration_seconds(),
        })
    }

    /// Run the chain on an in-memory buffer.
    pub fn process(
        &self,
        input: AudioBuffer,
        params: &TransformParameters,
    ) -> Result<AudioBuffer, AppError> {
        let params = params.normalized();
        let deadline = self.timeout.map(|t| Instant::now() + t);
        input
            .validate()
            .map_err(|e| AppError::processing(TransformStage::Input, e))?;

        let buffer = run_stage(TransformStage::Tempo, deadline, input, |b| {
            varispeed(b, params.tempo_ratio)
        })?;
        let buffer = run_stage(TransformStage::Resample, deadline, buffer, |b| {
            downsample(b, params.target_sample_rate)
        })?;
        let buffer = run_stage(TransformStage::Reverb, deadline, buffer, |mut b| {
            let settings = ReverbSettings {
                room_size: params.room_size,
                damping: params.damping,
                wet_level: params.wet_level,
                dry_level: params.dry_level,
            };
            let input_peak = b.peak();
            Reverb::new(b.sample_rate, b.channel_count(), settings).process(&mut b);
            if input_peak > 0.0 && b.peak() == 0.0 {
                return Err("mix is silent; raise wet_level or dry_level".to_string());
            }
            peak_limit(&mut b, PEAK_CEILING);
            Ok(b)
        })?;
        let buffer = run_stage(TransformStage::Delay, deadline, buffer, |mut b| {
            feedback_delay(&mut b, params.delay_ms);
            peak_limit(&mut b, PEAK_CEILING);
            Ok(b)
        })?;
        if !params.compress {
            return Ok(buffer);
        }
        run_stage(TransformStage::Compression, deadline, buffer, |mut b| {
            compress(&mut b, &CompressorSettings::default());
            peak_limit(&mut b, PEAK_CEILING);
            Ok(b)
        })
    }
}

fn run_stage(
    stage: TransformStage,
    deadline: Option<Instant>,
    buffer: AudioBuffer,
    apply: impl FnOnce(AudioBuffer) -> Result<AudioBuffer, String>,
) -> Result<AudioBuffer, AppError> {
    let started = Instant::now();
    let out = apply(buffer).map_err(|reason| AppError::processing(stage, reason))?;
    out.validate()
        .map_err(|reason| AppError::processing(stage, reason))?;
    if let Some(deadline) = deadline
        && Instant::now() > deadline
    {
        return Err(AppError::processing(stage, "transform time budget exhausted"));
    }
    log::trace!(
        target: "lofi::dsp",
        "{} done in {:?}: {} frames @ {} Hz",
        stage,
        started.elapsed(),
        out.frames(),
        out.sample_rate
    );
    Ok(out)
}

fn write_output(path: &Path, buffer: &AudioBuffer) -> Result<(), AppError> {
    write_wav(path, buffer).map_err(|e| AppError::processing(TransformStage::Output, e.to_string()))
}

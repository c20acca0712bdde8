use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::AudioBuffer;

const CHUNK_FRAMES: usize = 1024;
/// Anti-alias corner as a fraction of the target rate (just under its Nyquist).
const ANTI_ALIAS_FRACTION: f32 = 0.45;

/// Reduce to `target` Hz. Skipped when there is no target or it is not below the current rate.
pub fn downsample(buffer: AudioBuffer, target: Option<u32>) -> Result<AudioBuffer, String> {
    let Some(target) = target else {
        return Ok(buffer);
    };
    if target >= buffer.sample_rate {
        return Ok(buffer);
    }
    let source_rate = buffer.sample_rate;
    let mut channels = buffer.channels;
    for channel in &mut channels {
        Biquad::low_pass(source_rate, ANTI_ALIAS_FRACTION * target as f32).process(channel);
    }
    let ratio = target as f64 / source_rate as f64;
    let channels = sinc_resample(&channels, ratio)?;
    Ok(AudioBuffer::new(target, channels))
}

/// Band-limited resampling by `ratio` (output frames per input frame). The result has
/// `round(frames * ratio)` frames with the filter delay removed.
pub fn sinc_resample(channels: &[Vec<f32>], ratio: f64) -> Result<Vec<Vec<f32>>, String> {
    let frames = channels.first().map_or(0, Vec::len);
    if channels.is_empty() || frames == 0 {
        return Ok(channels.to_vec());
    }
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.925,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.1, params, CHUNK_FRAMES, channels.len())
        .map_err(|e| format!("resampler init: {e}"))?;

    let expected = (frames as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let needed = expected + delay;
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(needed + CHUNK_FRAMES); channels.len()];
    let mut padded: Vec<Vec<f32>> = vec![vec![0.0; CHUNK_FRAMES]; channels.len()];
    let mut pos = 0;

    while out[0].len() < needed {
        let take = CHUNK_FRAMES.min(frames.saturating_sub(pos));
        for (dst, src) in padded.iter_mut().zip(channels) {
            dst[..take].copy_from_slice(&src[pos..pos + take]);
            dst[take..].fill(0.0);
        }
        pos += take;
        let produced = resampler
            .process(&padded[..], None)
            .map_err(|e| format!("resample: {e}"))?;
        if produced.first().is_none_or(Vec::is_empty) {
            return Err("resampler produced no output".to_string());
        }
        for (dst, src) in out.iter_mut().zip(produced) {
            dst.extend_from_slice(&src);
        }
    }

    for channel in &mut out {
        channel.drain(..delay.min(channel.len()));
        channel.truncate(expected);
    }
    Ok(out)
}

/// Second-order IIR section (RBJ cookbook), transposed direct form II.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// Butterworth (Q = 1/√2) low-pass at `cutoff_hz`.
    pub fn low_pass(sample_rate: u32, cutoff_hz: f32) -> Self {
        let fs = sample_rate as f64;
        let fc = (cutoff_hz as f64).clamp(1.0, fs * 0.49);
        let w0 = 2.0 * std::f64::consts::PI * fc / fs;
        let alpha = w0.sin() / (2.0 * std::f64::consts::FRAC_1_SQRT_2);
        let cos = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos) / 2.0 / a0,
            b1: (1.0 - cos) / a0,
            b2: (1.0 - cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn tick(&mut self, x: f32) -> f32 {
        let x = x as f64;
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y as f32
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples {
            *s = self.tick(*s);
        }
    }
}

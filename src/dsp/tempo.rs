use super::AudioBuffer;
use super::resample::sinc_resample;

/// Slow down (or speed up) by resampling to `rate / tempo_ratio` and keeping the original rate
/// label, like a turntable running slow. Pitch moves with tempo.
pub fn varispeed(buffer: AudioBuffer, tempo_ratio: f32) -> Result<AudioBuffer, String> {
    if (tempo_ratio - 1.0).abs() < f32::EPSILON {
        return Ok(buffer);
    }
    if tempo_ratio.is_nan() || tempo_ratio <= 0.0 {
        return Err(format!("tempo ratio {tempo_ratio} must be positive"));
    }
    let stretch = 1.0 / tempo_ratio as f64;
    let channels = sinc_resample(&buffer.channels, stretch)?;
    Ok(AudioBuffer::new(buffer.sample_rate, channels))
}

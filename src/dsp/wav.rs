use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use super::AudioBuffer;

/// Read any integer or float WAV into planar f32 in `[-1, 1]`.
pub fn read_wav(path: &Path) -> Result<AudioBuffer, hound::Error> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let frames = interleaved.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (dst, &sample) in planar.iter_mut().zip(frame) {
            dst.push(sample);
        }
    }
    Ok(AudioBuffer::new(spec.sample_rate, planar))
}

/// Largest interleaved sample count a 16-bit WAV can hold: the data chunk size is a `u32`
/// byte count.
const MAX_PCM16_SAMPLES: u32 = u32::MAX / 2;

/// Interleaved sample count for `frames` x `channels`, or `None` when it does not fit a WAV.
pub fn pcm16_sample_count(frames: usize, channels: usize) -> Option<u32> {
    frames
        .checked_mul(channels)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|&n| n <= MAX_PCM16_SAMPLES)
}

/// Write 16-bit PCM. Samples are clipped to `[-1, 1]` and rounded.
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> Result<(), hound::Error> {
    let total = pcm16_sample_count(buffer.frames(), buffer.channel_count())
        .ok_or(hound::Error::FormatError("too many samples for a 16-bit WAV"))?;
    let spec = WavSpec {
        channels: buffer.channel_count() as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    {
        let mut samples = writer.get_i16_writer(total);
        for i in 0..buffer.frames() {
            for channel in &buffer.channels {
                let v = (channel[i].clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                samples.write_sample(v);
            }
        }
        samples.flush()?;
    }
    writer.finalize()
}

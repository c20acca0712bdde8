use super::AudioBuffer;

/// Feed-forward peak compressor. Channels share one gain so the stereo image holds still.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    /// Recover the level taken off above threshold, assuming a full-scale input.
    pub auto_makeup: bool,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -18.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 80.0,
            auto_makeup: true,
        }
    }
}

impl CompressorSettings {
    fn makeup_db(&self) -> f32 {
        if !self.auto_makeup {
            return 0.0;
        }
        // Half the reduction a 0 dBFS peak would get.
        -self.threshold_db * (1.0 - 1.0 / self.ratio) * 0.5
    }
}

fn coefficient(ms: f32, sample_rate: u32) -> f32 {
    if ms <= 0.0 {
        return 0.0;
    }
    (-1.0 / (ms * 0.001 * sample_rate as f32)).exp()
}

fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(1e-9).log10()
}

pub fn compress(buffer: &mut AudioBuffer, settings: &CompressorSettings) {
    let attack = coefficient(settings.attack_ms, buffer.sample_rate);
    let release = coefficient(settings.release_ms, buffer.sample_rate);
    let ratio = settings.ratio.max(1.0);
    let makeup = settings.makeup_db();
    let mut envelope = 0.0f32;

    for i in 0..buffer.frames() {
        let level = buffer
            .channels
            .iter()
            .fold(0.0f32, |acc, c| acc.max(c[i].abs()));
        let coeff = if level > envelope { attack } else { release };
        envelope = coeff * envelope + (1.0 - coeff) * level;

        let over = gain_to_db(envelope) - settings.threshold_db;
        let reduction = if over > 0.0 { over * (1.0 - 1.0 / ratio) } else { 0.0 };
        let gain = db_to_gain(makeup - reduction);
        for channel in &mut buffer.channels {
            channel[i] *= gain;
        }
    }
}

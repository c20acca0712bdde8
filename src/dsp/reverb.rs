//! Freeverb-style room: eight damped feedback combs in parallel, then four allpasses in series,
//! per channel. Odd channels get slightly longer lines for stereo width.

use super::AudioBuffer;

const COMB_TUNINGS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNINGS: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
/// Tunings are in samples at this rate and scaled to the actual rate.
const TUNING_RATE: f64 = 44_100.0;

const INPUT_GAIN: f32 = 0.015;
const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;
const WET_SCALE: f32 = 3.0;
const DRY_SCALE: f32 = 2.0;
const ALLPASS_FEEDBACK: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbSettings {
    pub room_size: f32,
    pub damping: f32,
    pub wet_level: f32,
    pub dry_level: f32,
}

#[derive(Debug, Clone)]
struct Comb {
    buffer: Vec<f32>,
    index: usize,
    last: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
            last: 0.0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.index];
        self.last = output * (1.0 - damp) + self.last * damp;
        self.buffer[self.index] = input + self.last * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

#[derive(Debug, Clone)]
struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        self.buffer[self.index] = input + buffered * ALLPASS_FEEDBACK;
        self.index = (self.index + 1) % self.buffer.len();
        buffered - input
    }
}

#[derive(Debug, Clone)]
struct ChannelNetwork {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl ChannelNetwork {
    fn new(sample_rate: u32, spread: usize) -> Self {
        let scale = sample_rate as f64 / TUNING_RATE;
        let len = |tuning: usize| ((tuning + spread) as f64 * scale).round() as usize;
        Self {
            combs: COMB_TUNINGS.iter().map(|&t| Comb::new(len(t))).collect(),
            allpasses: ALLPASS_TUNINGS.iter().map(|&t| Allpass::new(len(t))).collect(),
        }
    }

    #[inline]
    fn tick(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let mut out = self
            .combs
            .iter_mut()
            .map(|c| c.tick(input, feedback, damp))
            .sum::<f32>();
        for allpass in &mut self.allpasses {
            out = allpass.tick(out);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct Reverb {
    networks: Vec<ChannelNetwork>,
    feedback: f32,
    damp: f32,
    wet: f32,
    dry: f32,
}

impl Reverb {
    pub fn new(sample_rate: u32, channels: usize, settings: ReverbSettings) -> Self {
        Self {
            networks: (0..channels)
                .map(|c| ChannelNetwork::new(sample_rate, (c % 2) * STEREO_SPREAD))
                .collect(),
            feedback: settings.room_size.clamp(0.0, 1.0) * ROOM_SCALE + ROOM_OFFSET,
            damp: settings.damping.clamp(0.0, 1.0) * DAMP_SCALE,
            wet: settings.wet_level.clamp(0.0, 1.0) * WET_SCALE,
            dry: settings.dry_level.clamp(0.0, 1.0) * DRY_SCALE,
        }
    }

    /// Mix the room into `buffer` in place. Length is unchanged; the tail past the last input
    /// sample is dropped.
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.wet == 0.0 {
            self.apply_dry(buffer);
            return;
        }
        let channels = buffer.channel_count();
        for i in 0..buffer.frames() {
            let input = buffer.channels.iter().map(|c| c[i]).sum::<f32>() * INPUT_GAIN;
            for c in 0..channels {
                let wet = self.networks[c].tick(input, self.feedback, self.damp);
                let dry = buffer.channels[c][i];
                buffer.channels[c][i] = wet * self.wet + dry * self.dry;
            }
        }
    }

    fn apply_dry(&self, buffer: &mut AudioBuffer) {
        for s in buffer.channels.iter_mut().flat_map(|c| c.iter_mut()) {
            *s *= self.dry;
        }
    }
}

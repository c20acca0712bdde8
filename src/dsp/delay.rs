use super::AudioBuffer;

const FEEDBACK: f32 = 0.35;
const MIX: f32 = 0.4;

/// Single-tap echo with feedback. `delay_ms == 0` leaves the buffer untouched; the length never
/// changes.
pub fn feedback_delay(buffer: &mut AudioBuffer, delay_ms: u32) {
    let delay = (delay_ms as u64 * buffer.sample_rate as u64 / 1000) as usize;
    if delay == 0 {
        return;
    }
    for channel in &mut buffer.channels {
        let mut line = vec![0.0f32; delay];
        let mut index = 0;
        for sample in channel.iter_mut() {
            let delayed = line[index];
            line[index] = *sample + delayed * FEEDBACK;
            index = (index + 1) % delay;
            *sample = *sample * (1.0 - MIX) + delayed * MIX;
        }
    }
}

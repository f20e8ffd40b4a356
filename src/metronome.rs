//! Metronome click renderer
//!
//! Stateless: the click at any frame is a function of the position, tempo
//! and meter alone, so seeking or splitting a block never shifts a click.

use std::f32::consts::PI;

/// Downbeat click frequency in Hz
pub const DOWNBEAT_HZ: f32 = 1200.0;
/// Other beats
pub const BEAT_HZ: f32 = 800.0;
/// Click length in samples
pub const CLICK_SAMPLES: u64 = 4000;
/// Peak click amplitude
pub const CLICK_GAIN: f32 = 0.6;

/// One click sample at `frame`, or 0.0 between clicks
#[inline]
pub fn click_sample(frame: u64, tempo_bpm: f64, beats_per_bar: u32, sample_rate: f32) -> f32 {
    let frames_per_beat = 60.0 / tempo_bpm.max(1.0) * sample_rate as f64;
    let beat = (frame as f64 / frames_per_beat).floor();
    let beat_start = (beat * frames_per_beat).floor() as u64;
    let pos = frame.saturating_sub(beat_start);
    if pos >= CLICK_SAMPLES {
        return 0.0;
    }

    let beat_in_bar = beat as u64 % beats_per_bar.max(1) as u64;
    let freq = if beat_in_bar == 0 { DOWNBEAT_HZ } else { BEAT_HZ };
    let t = pos as f32 / sample_rate;
    let envelope = (1.0 - pos as f32 / CLICK_SAMPLES as f32).powi(2);
    (2.0 * PI * freq * t).sin() * CLICK_GAIN * envelope
}

/// Add clicks for frames `start_frame..start_frame + left.len()` into the
/// buffers
pub fn render(
    left: &mut [f32],
    right: &mut [f32],
    start_frame: u64,
    tempo_bpm: f64,
    beats_per_bar: u32,
    sample_rate: f32,
) {
    for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
        let s = click_sample(start_frame + i as u64, tempo_bpm, beats_per_bar, sample_rate);
        *l += s;
        *r += s;
    }
}

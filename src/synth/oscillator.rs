//! Naive (non band-limited) oscillator waveforms

use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine = 0,
    Saw = 1,
    Square = 2,
    Triangle = 3,
}

impl From<f32> for Waveform {
    fn from(value: f32) -> Self {
        match value.round() as i32 {
            i32::MIN..=0 => Waveform::Sine,
            1 => Waveform::Saw,
            2 => Waveform::Square,
            _ => Waveform::Triangle,
        }
    }
}

impl Waveform {
    /// Sample at `phase` in [0, 1)
    #[inline]
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * 2.0 * PI).sin(),
            Waveform::Saw => 2.0 * phase - 1.0,
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Shared settings for one oscillator slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscSettings {
    pub waveform: Waveform,
    pub level: f32,
    /// Detune in cents
    pub detune: f32,
}

impl OscSettings {
    pub fn new(waveform: Waveform, level: f32, detune: f32) -> Self {
        Self {
            waveform,
            level,
            detune,
        }
    }

    /// Frequency multiplier from the detune
    #[inline]
    pub fn ratio(&self) -> f32 {
        2.0f32.powf(self.detune / 1200.0)
    }
}

/// MIDI note number to frequency (A4 = 440 Hz)
#[inline]
pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0f32.powf((note as f32 - 69.0) / 12.0)
}

//! Stereo delay effect
//!
//! Free-running (milliseconds) or tempo-synced to a note division, with
//! feedback and dry/wet mix. Reads are linearly interpolated so ramped
//! delay times glide instead of clicking.

use crate::effects::{Effect, EffectParamId, EffectType};

/// Longest delay in seconds (1 bar of 4/4 at 20 BPM needs 12 s)
const MAX_DELAY_SECONDS: f32 = 12.0;

/// Feedback actually applied never reaches unity
const MAX_EFFECTIVE_FEEDBACK: f32 = 0.98;

/// Delay time divisions (in beats)
const DELAY_DIVISIONS: [f32; 8] = [
    0.125, // 1/32
    0.25,  // 1/16
    0.5,   // 1/8
    1.0,   // 1/4
    2.0,   // 1/2
    4.0,   // 1 bar
    0.75,  // dotted 1/8
    1.5,   // dotted 1/4
];

/// Circular buffer for delay line
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    fn new(max_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; max_samples.max(2)],
            write_pos: 0,
        }
    }

    fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    /// Read `delay` samples back (fractional, at least 1)
    fn read(&self, delay: f32) -> f32 {
        let size = self.buffer.len();
        let delay = delay.clamp(1.0, (size - 1) as f32);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;
        let a = self.buffer[(self.write_pos + size - whole) % size];
        let b = self.buffer[(self.write_pos + size - whole - 1) % size];
        a + (b - a) * frac
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Stereo delay effect
pub struct DelayEffect {
    /// Sample rate in Hz
    sample_rate: f32,
    /// Tempo in BPM
    bpm: f64,
    /// Free delay time in ms (when sync is off)
    time_ms: f32,
    /// Tempo sync enabled
    sync: bool,
    /// Division index (maps to DELAY_DIVISIONS)
    division: usize,
    /// Feedback amount (0.0 - 1.0)
    feedback: f32,
    /// Dry/wet mix (0.0 = dry, 1.0 = wet)
    mix: f32,
    delay_l: DelayLine,
    delay_r: DelayLine,
    /// Current delay in samples
    delay_samples: f32,
}

impl DelayEffect {
    /// Create a new delay effect
    pub fn new(sample_rate: f32, bpm: f64) -> Self {
        let max_samples = (MAX_DELAY_SECONDS * sample_rate) as usize;
        let mut effect = Self {
            sample_rate,
            bpm,
            time_ms: 250.0,
            sync: false,
            division: 3, // 1/4 note default
            feedback: 0.4,
            mix: 0.3,
            delay_l: DelayLine::new(max_samples),
            delay_r: DelayLine::new(max_samples),
            delay_samples: 0.0,
        };
        effect.update_delay_samples();
        effect
    }

    /// Update delay time in samples based on current settings
    fn update_delay_samples(&mut self) {
        self.delay_samples = if self.sync {
            let beats = DELAY_DIVISIONS[self.division];
            let samples_per_beat = (60.0 / self.bpm.max(1.0)) * self.sample_rate as f64;
            (beats as f64 * samples_per_beat) as f32
        } else {
            (self.time_ms / 1000.0) * self.sample_rate
        };
    }

    pub fn delay_samples(&self) -> f32 {
        self.delay_samples
    }
}

impl Effect for DelayEffect {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let feedback = self.feedback.min(MAX_EFFECTIVE_FEEDBACK);
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let delayed_l = self.delay_l.read(self.delay_samples);
            let delayed_r = self.delay_r.read(self.delay_samples);

            // Write input + feedback to delay line
            self.delay_l.write(*l + delayed_l * feedback);
            self.delay_r.write(*r + delayed_r * feedback);

            // Mix dry and wet signals
            *l = *l * (1.0 - self.mix) + delayed_l * self.mix;
            *r = *r * (1.0 - self.mix) + delayed_r * self.mix;
        }
    }

    fn set_param(&mut self, id: EffectParamId, value: f32) {
        match id {
            EffectParamId::DelayTime => {
                self.time_ms = value.clamp(1.0, 2000.0);
                self.update_delay_samples();
            }
            EffectParamId::DelaySync => {
                self.sync = value >= 0.5;
                self.update_delay_samples();
            }
            EffectParamId::DelayDivision => {
                self.division = (value.max(0.0).round() as usize).min(DELAY_DIVISIONS.len() - 1);
                self.update_delay_samples();
            }
            EffectParamId::DelayFeedback => {
                self.feedback = value.clamp(0.0, 1.0);
            }
            EffectParamId::DelayMix => {
                self.mix = value.clamp(0.0, 1.0);
            }
            _ => {} // Ignore non-delay parameters
        }
    }

    fn get_param(&self, id: EffectParamId) -> f32 {
        match id {
            EffectParamId::DelayTime => self.time_ms,
            EffectParamId::DelaySync => {
                if self.sync {
                    1.0
                } else {
                    0.0
                }
            }
            EffectParamId::DelayDivision => self.division as f32,
            EffectParamId::DelayFeedback => self.feedback,
            EffectParamId::DelayMix => self.mix,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.delay_l.clear();
        self.delay_r.clear();
    }

    fn set_tempo(&mut self, bpm: f64) {
        if bpm != self.bpm {
            self.bpm = bpm;
            self.update_delay_samples();
        }
    }

    fn effect_type(&self) -> EffectType {
        EffectType::Delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_helpers::*;

    #[test]
    fn test_impulse_echoes_after_delay_time() {
        let mut delay = DelayEffect::new(48_000.0, 120.0);
        delay.set_param(EffectParamId::DelayTime, 10.0); // 480 samples
        delay.set_param(EffectParamId::DelayMix, 1.0);
        delay.set_param(EffectParamId::DelayFeedback, 0.0);

        let mut left = unit_impulse(2000);
        let mut right = unit_impulse(2000);
        delay.process(&mut left, &mut right);

        assert_eq!(left[0], 0.0);
        assert!((left[480] - 1.0).abs() < 1e-6);
        assert!(left[960].abs() < 1e-6);
    }

    #[test]
    fn test_tempo_sync_follows_bpm() {
        let mut delay = DelayEffect::new(48_000.0, 120.0);
        delay.set_param(EffectParamId::DelaySync, 1.0);
        delay.set_param(EffectParamId::DelayDivision, 3.0);
        assert_eq!(delay.delay_samples(), 24_000.0);
        delay.set_tempo(60.0);
        assert_eq!(delay.delay_samples(), 48_000.0);
    }

    #[test]
    fn test_full_feedback_stays_bounded() {
        let mut delay = DelayEffect::new(48_000.0, 120.0);
        delay.set_param(EffectParamId::DelayTime, 1.0);
        delay.set_param(EffectParamId::DelayFeedback, 1.0);
        let mut left = white_noise(48_000, 5);
        let mut right = white_noise(48_000, 6);
        delay.process(&mut left, &mut right);
        assert!(left.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_delay_contract() {
        let mut delay = DelayEffect::new(48_000.0, 120.0);
        assert_silence_stays_silent(&mut delay, 256);
        assert_reset_forgets_input(&mut delay);
        assert_params_within_defs(&delay);
    }
}

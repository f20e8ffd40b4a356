//! Brick-wall peak limiter
//!
//! No lookahead: gain drops instantly to whatever keeps the current sample
//! under the ceiling and recovers with the release time. The output is then
//! hard-clamped, so nothing ever leaves above the threshold. Used both as an
//! insert and as the always-on master limiter.

use super::{Effect, EffectParamId, EffectType};
use crate::mixer::db_to_linear;

/// Values below this are flushed to zero to avoid denormals
const DENORMAL_FLOOR: f32 = 1e-20;

pub struct Limiter {
    sample_rate: f32,
    threshold_db: f32,
    release_ms: f32,
    ceiling: f32,
    release_coeff: f32,
    gain: f32,
}

impl Limiter {
    pub fn new(sample_rate: f32) -> Self {
        let mut limiter = Self {
            sample_rate,
            threshold_db: -0.3,
            release_ms: 50.0,
            ceiling: 1.0,
            release_coeff: 0.0,
            gain: 1.0,
        };
        limiter.update_coefficients();
        limiter
    }

    pub fn with_threshold(sample_rate: f32, threshold_db: f32) -> Self {
        let mut limiter = Self::new(sample_rate);
        limiter.set_param(EffectParamId::LimiterThreshold, threshold_db);
        limiter
    }

    fn update_coefficients(&mut self) {
        self.ceiling = db_to_linear(self.threshold_db);
        let samples = (self.release_ms / 1000.0) * self.sample_rate;
        self.release_coeff = (-1.0 / samples.max(1.0)).exp();
    }

    /// Linear ceiling
    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    #[inline]
    fn sanitize(x: f32) -> f32 {
        if !x.is_finite() || x.abs() < DENORMAL_FLOOR {
            0.0
        } else {
            x
        }
    }
}

impl Effect for Limiter {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let ceiling = self.ceiling;
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let sl = Self::sanitize(*l);
            let sr = Self::sanitize(*r);
            let peak = sl.abs().max(sr.abs());

            let needed = if peak > ceiling { ceiling / peak } else { 1.0 };
            if needed < self.gain {
                self.gain = needed;
            } else {
                self.gain = 1.0 - self.release_coeff * (1.0 - self.gain);
                self.gain = self.gain.min(1.0);
            }
            if self.gain < DENORMAL_FLOOR {
                self.gain = DENORMAL_FLOOR;
            }

            *l = (sl * self.gain).clamp(-ceiling, ceiling);
            *r = (sr * self.gain).clamp(-ceiling, ceiling);
        }
    }

    fn set_param(&mut self, id: EffectParamId, value: f32) {
        match id {
            EffectParamId::LimiterThreshold => {
                self.threshold_db = value.clamp(-20.0, 0.0);
                self.update_coefficients();
            }
            EffectParamId::LimiterRelease => {
                self.release_ms = value.clamp(1.0, 1000.0);
                self.update_coefficients();
            }
            _ => {} // Ignore non-limiter parameters
        }
    }

    fn get_param(&self, id: EffectParamId) -> f32 {
        match id {
            EffectParamId::LimiterThreshold => self.threshold_db,
            EffectParamId::LimiterRelease => self.release_ms,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.gain = 1.0;
    }

    fn effect_type(&self) -> EffectType {
        EffectType::Limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_helpers::*;

    #[test]
    fn test_hot_signal_never_exceeds_ceiling() {
        let mut limiter = Limiter::new(48_000.0);
        let ceiling = db_to_linear(-0.3);
        let hot = db_to_linear(6.0);
        let mut left: Vec<f32> = sine_wave(48_000, 220.0, 48_000.0)
            .iter()
            .map(|s| s * hot)
            .collect();
        let mut right = white_noise(48_000, 11).iter().map(|s| s * hot).collect::<Vec<_>>();
        limiter.process(&mut left, &mut right);
        assert!(peak_level(&left) <= ceiling);
        assert!(peak_level(&right) <= ceiling);
    }

    #[test]
    fn test_non_finite_becomes_silence() {
        let mut limiter = Limiter::new(48_000.0);
        let mut left = vec![f32::NAN, f32::INFINITY, 0.5];
        let mut right = vec![f32::NEG_INFINITY, 0.0, 1e-30];
        limiter.process(&mut left, &mut right);
        assert_eq!(left[0], 0.0);
        assert_eq!(left[1], 0.0);
        assert_eq!(right[0], 0.0);
        assert_eq!(right[2], 0.0);
        assert!(left.iter().chain(right.iter()).all(|s| s.is_finite()));
    }

    #[test]
    fn test_quiet_signal_passes_unchanged() {
        let mut limiter = Limiter::new(48_000.0);
        let input = sine_wave(4800, 440.0, 48_000.0)
            .iter()
            .map(|s| s * 0.5)
            .collect::<Vec<_>>();
        let mut left = input.clone();
        let mut right = input.clone();
        limiter.process(&mut left, &mut right);
        assert_eq!(left, input);
    }

    #[test]
    fn test_gain_recovers_after_peak() {
        let mut limiter = Limiter::new(48_000.0);
        let mut left = vec![0.0; 48_000];
        left[0] = 4.0;
        for s in left.iter_mut().skip(1) {
            *s = 0.5;
        }
        let mut right = left.clone();
        limiter.process(&mut left, &mut right);
        assert!(left[10] < 0.5);
        assert!((left[47_999] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_limiter_contract() {
        let mut limiter = Limiter::new(48_000.0);
        assert_silence_stays_silent(&mut limiter, 256);
        assert_params_within_defs(&limiter);
    }
}

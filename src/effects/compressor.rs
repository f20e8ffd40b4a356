//! Feed-forward compressor with an RMS detector

use super::{Effect, EffectParamId, EffectType};
use crate::mixer::db_to_linear;

/// RMS averaging window in seconds
const RMS_WINDOW_SECONDS: f32 = 0.01;

/// One-pole coefficient for a time constant in milliseconds
fn time_coefficient(ms: f32, sample_rate: f32) -> f32 {
    let samples = (ms / 1000.0) * sample_rate;
    if samples <= 0.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

pub struct Compressor {
    sample_rate: f32,
    threshold_db: f32,
    ratio: f32,
    attack_ms: f32,
    release_ms: f32,
    makeup_db: f32,
    attack_coeff: f32,
    release_coeff: f32,
    rms_coeff: f32,
    /// Mean square of the detector input
    mean_square: f32,
    /// Current gain reduction in dB (<= 0)
    reduction_db: f32,
}

impl Compressor {
    pub fn new(sample_rate: f32) -> Self {
        let mut comp = Self {
            sample_rate,
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            makeup_db: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            rms_coeff: time_coefficient(RMS_WINDOW_SECONDS * 1000.0, sample_rate),
            mean_square: 0.0,
            reduction_db: 0.0,
        };
        comp.update_coefficients();
        comp
    }

    fn update_coefficients(&mut self) {
        self.attack_coeff = time_coefficient(self.attack_ms, self.sample_rate);
        self.release_coeff = time_coefficient(self.release_ms, self.sample_rate);
    }

    /// Current gain reduction in dB (0 or negative)
    pub fn gain_reduction_db(&self) -> f32 {
        self.reduction_db
    }

    #[inline]
    fn target_reduction(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        if over <= 0.0 {
            0.0
        } else {
            -over * (1.0 - 1.0 / self.ratio)
        }
    }
}

impl Effect for Compressor {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let makeup = db_to_linear(self.makeup_db);
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let peak_sq = (*l * *l).max(*r * *r);
            let sq = if peak_sq.is_finite() { peak_sq } else { 0.0 };
            self.mean_square = self.rms_coeff * self.mean_square + (1.0 - self.rms_coeff) * sq;

            let level_db = if self.mean_square > 1e-12 {
                10.0 * self.mean_square.log10()
            } else {
                -120.0
            };

            let target = self.target_reduction(level_db);
            // Reduction is negative: more negative means compressing harder
            let coeff = if target < self.reduction_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.reduction_db = coeff * self.reduction_db + (1.0 - coeff) * target;

            let gain = db_to_linear(self.reduction_db) * makeup;
            *l *= gain;
            *r *= gain;
        }
    }

    fn set_param(&mut self, id: EffectParamId, value: f32) {
        match id {
            EffectParamId::CompThreshold => self.threshold_db = value.clamp(-60.0, 0.0),
            EffectParamId::CompRatio => self.ratio = value.clamp(1.0, 20.0),
            EffectParamId::CompAttack => {
                self.attack_ms = value.clamp(0.1, 100.0);
                self.update_coefficients();
            }
            EffectParamId::CompRelease => {
                self.release_ms = value.clamp(10.0, 1000.0);
                self.update_coefficients();
            }
            EffectParamId::CompMakeup => self.makeup_db = value.clamp(0.0, 20.0),
            _ => {} // Ignore non-compressor parameters
        }
    }

    fn get_param(&self, id: EffectParamId) -> f32 {
        match id {
            EffectParamId::CompThreshold => self.threshold_db,
            EffectParamId::CompRatio => self.ratio,
            EffectParamId::CompAttack => self.attack_ms,
            EffectParamId::CompRelease => self.release_ms,
            EffectParamId::CompMakeup => self.makeup_db,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.mean_square = 0.0;
        self.reduction_db = 0.0;
    }

    fn effect_type(&self) -> EffectType {
        EffectType::Compressor
    }
}

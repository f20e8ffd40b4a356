//! 4-band parametric EQ: low shelf, two peaks, high shelf

use super::biquad::{BiquadState, Coefficients};
use super::{Effect, EffectParamId, EffectType};

#[derive(Debug, Clone, Copy)]
struct Band {
    freq: f32,
    gain_db: f32,
    q: f32,
}

pub struct ParametricEq {
    sample_rate: f32,
    low: Band,
    mid1: Band,
    mid2: Band,
    high: Band,
    coeffs: [Coefficients; 4],
    state_l: [BiquadState; 4],
    state_r: [BiquadState; 4],
}

impl ParametricEq {
    pub fn new(sample_rate: f32) -> Self {
        let mut eq = Self {
            sample_rate,
            low: Band {
                freq: 100.0,
                gain_db: 0.0,
                q: 0.707,
            },
            mid1: Band {
                freq: 500.0,
                gain_db: 0.0,
                q: 1.0,
            },
            mid2: Band {
                freq: 2000.0,
                gain_db: 0.0,
                q: 1.0,
            },
            high: Band {
                freq: 8000.0,
                gain_db: 0.0,
                q: 0.707,
            },
            coeffs: [Coefficients::IDENTITY; 4],
            state_l: [BiquadState::default(); 4],
            state_r: [BiquadState::default(); 4],
        };
        eq.update_coefficients();
        eq
    }

    fn update_coefficients(&mut self) {
        let sr = self.sample_rate;
        self.coeffs = [
            Coefficients::low_shelf(self.low.freq, self.low.gain_db, sr),
            Coefficients::peaking(self.mid1.freq, self.mid1.gain_db, self.mid1.q, sr),
            Coefficients::peaking(self.mid2.freq, self.mid2.gain_db, self.mid2.q, sr),
            Coefficients::high_shelf(self.high.freq, self.high.gain_db, sr),
        ];
    }

    fn is_flat(&self) -> bool {
        [self.low, self.mid1, self.mid2, self.high]
            .iter()
            .all(|b| b.gain_db == 0.0)
    }
}

impl Effect for ParametricEq {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.is_flat() {
            return;
        }
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            for band in 0..4 {
                *l = self.state_l[band].process(&self.coeffs[band], *l);
                *r = self.state_r[band].process(&self.coeffs[band], *r);
            }
        }
    }

    fn set_param(&mut self, id: EffectParamId, value: f32) {
        match id {
            EffectParamId::EqLowFreq => self.low.freq = value.clamp(20.0, 1000.0),
            EffectParamId::EqLowGain => self.low.gain_db = value.clamp(-12.0, 12.0),
            EffectParamId::EqMid1Freq => self.mid1.freq = value.clamp(100.0, 8000.0),
            EffectParamId::EqMid1Gain => self.mid1.gain_db = value.clamp(-12.0, 12.0),
            EffectParamId::EqMid1Q => self.mid1.q = value.clamp(0.5, 10.0),
            EffectParamId::EqMid2Freq => self.mid2.freq = value.clamp(200.0, 12_000.0),
            EffectParamId::EqMid2Gain => self.mid2.gain_db = value.clamp(-12.0, 12.0),
            EffectParamId::EqMid2Q => self.mid2.q = value.clamp(0.5, 10.0),
            EffectParamId::EqHighFreq => self.high.freq = value.clamp(2000.0, 20_000.0),
            EffectParamId::EqHighGain => self.high.gain_db = value.clamp(-12.0, 12.0),
            _ => return, // Ignore non-EQ parameters
        }
        self.update_coefficients();
    }

    fn get_param(&self, id: EffectParamId) -> f32 {
        match id {
            EffectParamId::EqLowFreq => self.low.freq,
            EffectParamId::EqLowGain => self.low.gain_db,
            EffectParamId::EqMid1Freq => self.mid1.freq,
            EffectParamId::EqMid1Gain => self.mid1.gain_db,
            EffectParamId::EqMid1Q => self.mid1.q,
            EffectParamId::EqMid2Freq => self.mid2.freq,
            EffectParamId::EqMid2Gain => self.mid2.gain_db,
            EffectParamId::EqMid2Q => self.mid2.q,
            EffectParamId::EqHighFreq => self.high.freq,
            EffectParamId::EqHighGain => self.high.gain_db,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.state_l = [BiquadState::default(); 4];
        self.state_r = [BiquadState::default(); 4];
    }

    fn effect_type(&self) -> EffectType {
        EffectType::Eq
    }
}

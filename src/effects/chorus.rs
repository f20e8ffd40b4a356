//! Stereo chorus: a short delay swept by a sine LFO, quadrature per side

use std::f32::consts::PI;

use super::{Effect, EffectParamId, EffectType};

/// Centre delay in milliseconds
const BASE_DELAY_MS: f32 = 12.0;
/// Sweep at full depth in milliseconds (either side of the centre)
const MAX_SWEEP_MS: f32 = 8.0;

pub struct ChorusEffect {
    sample_rate: f32,
    rate: f32,
    depth: f32,
    mix: f32,
    phase: f32,
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
}

impl ChorusEffect {
    pub fn new(sample_rate: f32) -> Self {
        let size = (((BASE_DELAY_MS + MAX_SWEEP_MS) / 1000.0) * sample_rate) as usize + 4;
        Self {
            sample_rate,
            rate: 1.0,
            depth: 0.5,
            mix: 0.5,
            phase: 0.0,
            buffer_l: vec![0.0; size],
            buffer_r: vec![0.0; size],
            write_pos: 0,
        }
    }

    #[inline]
    fn read(buffer: &[f32], write_pos: usize, delay: f32) -> f32 {
        let size = buffer.len();
        let delay = delay.clamp(1.0, (size - 2) as f32);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;
        let a = buffer[(write_pos + size - whole) % size];
        let b = buffer[(write_pos + size - whole - 1) % size];
        a + (b - a) * frac
    }
}

impl Effect for ChorusEffect {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let ms_to_samples = self.sample_rate / 1000.0;
        let base = BASE_DELAY_MS * ms_to_samples;
        let sweep = MAX_SWEEP_MS * ms_to_samples * self.depth;
        let phase_inc = self.rate / self.sample_rate;
        let size = self.buffer_l.len();

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            self.buffer_l[self.write_pos] = *l;
            self.buffer_r[self.write_pos] = *r;

            let angle = self.phase * 2.0 * PI;
            let delay_l = base + sweep * angle.sin();
            let delay_r = base + sweep * angle.cos();
            let wet_l = Self::read(&self.buffer_l, self.write_pos, delay_l);
            let wet_r = Self::read(&self.buffer_r, self.write_pos, delay_r);

            *l = *l * (1.0 - self.mix) + wet_l * self.mix;
            *r = *r * (1.0 - self.mix) + wet_r * self.mix;

            self.write_pos = (self.write_pos + 1) % size;
            self.phase = (self.phase + phase_inc).fract();
        }
    }

    fn set_param(&mut self, id: EffectParamId, value: f32) {
        match id {
            EffectParamId::ChorusRate => self.rate = value.clamp(0.1, 10.0),
            EffectParamId::ChorusDepth => self.depth = value.clamp(0.0, 1.0),
            EffectParamId::ChorusMix => self.mix = value.clamp(0.0, 1.0),
            _ => {} // Ignore non-chorus parameters
        }
    }

    fn get_param(&self, id: EffectParamId) -> f32 {
        match id {
            EffectParamId::ChorusRate => self.rate,
            EffectParamId::ChorusDepth => self.depth,
            EffectParamId::ChorusMix => self.mix,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
        self.phase = 0.0;
    }

    fn effect_type(&self) -> EffectType {
        EffectType::Chorus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_helpers::*;

    #[test]
    fn test_dry_mix_is_passthrough() {
        let mut chorus = ChorusEffect::new(48_000.0);
        chorus.set_param(EffectParamId::ChorusMix, 0.0);
        let input = sine_wave(2048, 440.0, 48_000.0);
        let mut left = input.clone();
        let mut right = input.clone();
        chorus.process(&mut left, &mut right);
        assert_eq!(left, input);
    }

    #[test]
    fn test_wet_signal_is_delayed() {
        let mut chorus = ChorusEffect::new(48_000.0);
        chorus.set_param(EffectParamId::ChorusMix, 1.0);
        chorus.set_param(EffectParamId::ChorusDepth, 0.0);
        let mut left = unit_impulse(2048);
        let mut right = unit_impulse(2048);
        chorus.process(&mut left, &mut right);
        // 12 ms at 48 kHz
        assert!((left[576] - 1.0).abs() < 1e-6);
        assert_eq!(left[0], 0.0);
    }

    #[test]
    fn test_chorus_contract() {
        let mut chorus = ChorusEffect::new(48_000.0);
        assert_silence_stays_silent(&mut chorus, 256);
        assert_reset_forgets_input(&mut chorus);
        assert_params_within_defs(&chorus);
    }
}

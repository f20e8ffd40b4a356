//! Signals, level meters and effect checks for the DSP unit tests

use std::f32::consts::TAU;

use super::{get_param_defs, Effect};

pub const TEST_RATE: f32 = 48_000.0;
pub const TEST_TEMPO: f64 = 120.0;

/// Full-scale sine starting at phase 0
pub fn sine_wave(len: usize, freq: f32, sample_rate: f32) -> Vec<f32> {
    let step = TAU * freq / sample_rate;
    (0..len).map(|n| (step * n as f32).sin()).collect()
}

pub fn dc_signal(len: usize, level: f32) -> Vec<f32> {
    vec![level; len]
}

/// 1.0 on the first sample, silence after
pub fn unit_impulse(len: usize) -> Vec<f32> {
    (0..len).map(|n| if n == 0 { 1.0 } else { 0.0 }).collect()
}

/// Deterministic noise in [-1, 1) from a 64-bit xorshift
pub fn white_noise(len: usize, seed: u64) -> Vec<f32> {
    let mut x = seed | 1;
    let mut next = move || {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        x
    };
    (0..len)
        .map(|_| ((next() >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0)
        .collect()
}

pub fn rms_level(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let energy: f32 = signal.iter().map(|s| s * s).sum();
    (energy / signal.len() as f32).sqrt()
}

pub fn peak_level(signal: &[f32]) -> f32 {
    signal.iter().fold(0.0, |m: f32, s| m.max(s.abs()))
}

fn stereo_peak(left: &[f32], right: &[f32]) -> f32 {
    peak_level(left).max(peak_level(right))
}

/// A block of digital silence must come out silent
pub fn assert_silence_stays_silent<E: Effect + ?Sized>(effect: &mut E, len: usize) {
    let (mut left, mut right) = (vec![0.0; len], vec![0.0; len]);
    effect.process(&mut left, &mut right);
    let peak = stereo_peak(&left, &right);
    assert!(peak < 1e-6, "{:?} turned silence into {}", effect.effect_type(), peak);
}

/// Every parameter the effect reports sits inside its definition
pub fn assert_params_within_defs(effect: &dyn Effect) {
    for def in get_param_defs(effect.effect_type()) {
        let value = effect.get_param(def.id);
        assert!(
            (def.min..=def.max).contains(&value),
            "{:?} = {} outside {}..={}",
            def.id,
            value,
            def.min,
            def.max
        );
    }
}

/// Drive a tone through, reset, and expect no tail
pub fn assert_reset_forgets_input<E: Effect + ?Sized>(effect: &mut E) {
    let mut left = sine_wave(1024, 440.0, TEST_RATE);
    let mut right = left.clone();
    effect.process(&mut left, &mut right);
    effect.reset();

    let (mut left, mut right) = (vec![0.0; 256], vec![0.0; 256]);
    effect.process(&mut left, &mut right);
    let peak = stereo_peak(&left, &right);
    assert!(peak < 1e-3, "{:?} still rings at {} after reset", effect.effect_type(), peak);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{create_effect, EffectSlot, EffectType};
    use crate::ids::EffectId;

    #[test]
    fn test_sine_peaks_a_quarter_period_in() {
        let signal = sine_wave(480, 100.0, TEST_RATE);
        assert!(signal[0].abs() < 1e-6);
        assert!((signal[120] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_levels() {
        assert!((rms_level(&dc_signal(64, -0.5)) - 0.5).abs() < 1e-6);
        let sine = sine_wave(48_000, 100.0, TEST_RATE);
        assert!((rms_level(&sine) - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.01);
        assert_eq!(peak_level(&unit_impulse(8)), 1.0);
        assert_eq!(rms_level(&[]), 0.0);
    }

    #[test]
    fn test_noise_is_bounded_and_repeatable() {
        let a = white_noise(4096, 9);
        assert_eq!(a, white_noise(4096, 9));
        assert!(a.iter().all(|s| (-1.0..1.0).contains(s)));
        assert!(rms_level(&a) > 0.3);
    }

    #[test]
    fn test_every_builtin_honours_contract() {
        for &ty in EffectType::builtin() {
            let slot = EffectSlot::new(EffectId(1), ty);
            let mut effect = create_effect(&slot, TEST_RATE, TEST_TEMPO).unwrap();
            assert_params_within_defs(&effect);
            assert_silence_stays_silent(&mut effect, 256);
        }
    }
}

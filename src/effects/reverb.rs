//! Freeverb-style reverb
//!
//! Eight parallel damped combs into four series allpasses per channel. The
//! right channel uses slightly longer lines for stereo width.

use crate::effects::{Effect, EffectParamId, EffectType};

/// Comb filter delay times in samples at 44.1 kHz
const COMB_DELAYS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass filter delay times in samples at 44.1 kHz
const ALLPASS_DELAYS: [usize; 4] = [556, 441, 341, 225];

/// Extra samples on the right channel
const STEREO_SPREAD: usize = 23;

/// Input attenuation so eight summed combs stay near unity
const INPUT_GAIN: f32 = 0.015;

/// Comb filter with lowpass damping in the feedback path
struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    filterstore: f32,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            pos: 0,
            filterstore: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.filterstore = output * (1.0 - damp) + self.filterstore * damp;
        self.buffer[self.pos] = input + self.filterstore * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filterstore = 0.0;
    }
}

/// Allpass filter for diffusion
struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let bufout = self.buffer[self.pos];
        let output = -input + bufout;
        self.buffer[self.pos] = input + bufout * 0.5;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// One channel of the reverb network
struct Tank {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Tank {
    fn new(sample_rate: f32, spread: usize) -> Self {
        let scale = |d: usize| (((d + spread) as f32) * sample_rate / 44_100.0) as usize;
        Self {
            combs: COMB_DELAYS.iter().map(|&d| CombFilter::new(scale(d))).collect(),
            allpasses: ALLPASS_DELAYS
                .iter()
                .map(|&d| AllpassFilter::new(scale(d)))
                .collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let mut out = 0.0;
        for comb in &mut self.combs {
            out += comb.process(input, feedback, damp);
        }
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllpassFilter::clear);
    }
}

/// Freeverb-style reverb effect
pub struct ReverbEffect {
    /// Room size (affects decay time)
    room_size: f32,
    /// Damping (high frequency absorption)
    damping: f32,
    /// Wet/dry mix (0.0 = dry, 1.0 = wet)
    mix: f32,
    left: Tank,
    right: Tank,
}

impl ReverbEffect {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            room_size: 0.5,
            damping: 0.5,
            mix: 0.3,
            left: Tank::new(sample_rate, 0),
            right: Tank::new(sample_rate, STEREO_SPREAD),
        }
    }

    /// Room size maps to comb feedback (decay time)
    fn feedback(&self) -> f32 {
        0.7 + self.room_size * 0.28
    }

    /// Damping is scaled down so a fully damped room still rings a little
    fn damp(&self) -> f32 {
        self.damping * 0.4
    }
}

impl Effect for ReverbEffect {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let feedback = self.feedback();
        let damp = self.damp();
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let input = (*l + *r) * INPUT_GAIN;
            let out_l = self.left.process(input, feedback, damp);
            let out_r = self.right.process(input, feedback, damp);
            *l = *l * (1.0 - self.mix) + out_l * self.mix;
            *r = *r * (1.0 - self.mix) + out_r * self.mix;
        }
    }

    fn set_param(&mut self, id: EffectParamId, value: f32) {
        match id {
            EffectParamId::ReverbRoomSize => self.room_size = value.clamp(0.0, 1.0),
            EffectParamId::ReverbDamping => self.damping = value.clamp(0.0, 1.0),
            EffectParamId::ReverbMix => self.mix = value.clamp(0.0, 1.0),
            _ => {} // Ignore non-reverb parameters
        }
    }

    fn get_param(&self, id: EffectParamId) -> f32 {
        match id {
            EffectParamId::ReverbRoomSize => self.room_size,
            EffectParamId::ReverbDamping => self.damping,
            EffectParamId::ReverbMix => self.mix,
            _ => 0.0,
        }
    }

    fn reset(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    fn effect_type(&self) -> EffectType {
        EffectType::Reverb
    }
}

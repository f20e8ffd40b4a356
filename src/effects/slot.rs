//! Audio-side effect slot
//!
//! Owns the processor plus one ramp per continuous parameter. Ramped values
//! are pushed into the processor every [`SMOOTHING_CHUNK`] frames, which is
//! fine-grained enough to be inaudible and keeps coefficient updates cheap.

use super::{get_param_defs, Effect, EffectParamId, EffectProcessor, EffectSlot, ParamKey};
use crate::ids::EffectId;
use crate::params::SmoothedValue;

/// Frames processed between parameter updates while a ramp is running
pub const SMOOTHING_CHUNK: usize = 32;

struct ParamRamp {
    id: EffectParamId,
    value: SmoothedValue,
}

pub struct EffectSlotRuntime {
    pub id: EffectId,
    processor: EffectProcessor,
    bypassed: bool,
    ramps: Vec<ParamRamp>,
}

impl EffectSlotRuntime {
    /// Build the runtime for a control-side slot. The processor must already
    /// carry the slot's parameter values.
    pub fn new(processor: EffectProcessor, slot: &EffectSlot, smoothing_frames: u32) -> Self {
        let ramps = get_param_defs(slot.effect_type)
            .into_iter()
            .filter(|def| def.smoothed)
            .map(|def| ParamRamp {
                id: def.id,
                value: SmoothedValue::new(slot.get_param(def.id), smoothing_frames),
            })
            .collect();
        Self {
            id: slot.id,
            processor,
            bypassed: slot.bypassed,
            ramps,
        }
    }

    pub fn processor(&self) -> &EffectProcessor {
        &self.processor
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        if self.bypassed && !bypassed {
            // Stale tails from before the bypass would otherwise leak through
            self.processor.reset();
        }
        self.bypassed = bypassed;
    }

    /// Apply a (clamped) parameter value. Continuous ones ramp.
    pub fn set_param(&mut self, key: ParamKey, value: f32) {
        match key {
            ParamKey::Builtin(id) => {
                match self.ramps.iter_mut().find(|r| r.id == id) {
                    Some(ramp) => ramp.value.set_target(value),
                    None => self.processor.set_param(id, value),
                }
            }
            ParamKey::Plugin(index) => {
                if let EffectProcessor::Hosted(hosted) = &mut self.processor {
                    hosted.queue(index as usize, value);
                }
            }
        }
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        self.processor.set_tempo(bpm);
    }

    /// Clear processor state and finish any running ramps
    pub fn reset(&mut self) {
        for ramp in &mut self.ramps {
            let target = ramp.value.target();
            ramp.value.reset(target);
            self.processor.set_param(ramp.id, target);
        }
        self.processor.reset();
    }

    fn is_smoothing(&self) -> bool {
        self.ramps.iter().any(|r| r.value.is_smoothing())
    }

    /// Run the processor over a stereo block (no-op when bypassed)
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.bypassed {
            return;
        }
        if !self.is_smoothing() {
            self.processor.process(left, right);
            return;
        }

        for (l, r) in left
            .chunks_mut(SMOOTHING_CHUNK)
            .zip(right.chunks_mut(SMOOTHING_CHUNK))
        {
            for ramp in &mut self.ramps {
                if ramp.value.is_smoothing() {
                    let v = ramp.value.skip(l.len() as u32);
                    self.processor.set_param(ramp.id, v);
                }
            }
            self.processor.process(l, r);
        }
    }
}

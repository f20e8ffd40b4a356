//! Hosted plugin seam
//!
//! A plugin is any [`PluginProcessor`] the embedding application hands the
//! engine. Parameter changes made on the control thread are parked in a
//! pending array and delivered at the start of the next `process` call.

use super::{Effect, EffectParamId, EffectType};

/// Upper bound on parameters a hosted plugin may expose
pub const MAX_PLUGIN_PARAMS: usize = 256;

/// Processing contract for an externally provided effect
pub trait PluginProcessor: Send {
    fn name(&self) -> &str;

    /// Number of normalized parameters (`param_0` .. `param_{n-1}`)
    fn param_count(&self) -> usize;

    /// Set a normalized (0..1) parameter
    fn set_param(&mut self, index: usize, value: f32);

    fn get_param(&self, index: usize) -> f32;

    /// Process stereo audio in place. Must not allocate or block.
    fn process(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Clear internal state
    fn reset(&mut self) {}
}

/// Audio-side wrapper around a plugin
pub struct HostedPlugin {
    plugin: Box<dyn PluginProcessor>,
    /// NaN marks "no change queued"
    pending: Vec<f32>,
    has_pending: bool,
}

impl HostedPlugin {
    pub fn new(plugin: Box<dyn PluginProcessor>) -> Self {
        let count = plugin.param_count().min(MAX_PLUGIN_PARAMS);
        Self {
            plugin,
            pending: vec![f32::NAN; count],
            has_pending: false,
        }
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn param_count(&self) -> usize {
        self.pending.len()
    }

    /// Queue a parameter change for the next process call
    pub fn queue(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.pending.get_mut(index) {
            *slot = value.clamp(0.0, 1.0);
            self.has_pending = true;
        }
    }

    /// Current plugin-side value of a parameter
    pub fn param(&self, index: usize) -> f32 {
        self.plugin.get_param(index)
    }

    fn flush_pending(&mut self) {
        if !self.has_pending {
            return;
        }
        for (index, value) in self.pending.iter_mut().enumerate() {
            if !value.is_nan() {
                self.plugin.set_param(index, *value);
                *value = f32::NAN;
            }
        }
        self.has_pending = false;
    }
}

impl Effect for HostedPlugin {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.flush_pending();
        self.plugin.process(left, right);
    }

    // Built-in parameter ids never address a plugin
    fn set_param(&mut self, _id: EffectParamId, _value: f32) {}

    fn get_param(&self, _id: EffectParamId) -> f32 {
        0.0
    }

    fn reset(&mut self) {
        self.plugin.reset();
    }

    fn effect_type(&self) -> EffectType {
        EffectType::HostedPlugin
    }
}

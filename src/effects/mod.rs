//! Built-in audio effects for track insert chains
//!
//! Effects process audio in-place after the track's source (clips or synth)
//! has written its buffer and before volume/pan is applied. The set of
//! processors is closed: [`EffectProcessor`] dispatches statically, and the
//! only trait object is the hosted plugin seam in [`hosted`].

pub mod biquad;
pub mod chorus;
pub mod compressor;
pub mod delay;
pub mod eq;
pub mod hosted;
pub mod limiter;
pub mod reverb;
pub mod slot;
#[cfg(test)]
pub mod test_helpers;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::EffectId;

pub use hosted::{HostedPlugin, PluginProcessor};
pub use slot::EffectSlotRuntime;

/// Effect types available on a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectType {
    /// 4-band parametric EQ (shelf, peak, peak, shelf)
    Eq,
    /// RMS compressor with makeup gain
    Compressor,
    /// Freeverb-style reverb
    Reverb,
    /// Stereo delay, free or tempo-synced
    Delay,
    /// Brick-wall peak limiter
    Limiter,
    /// LFO-modulated chorus
    Chorus,
    /// Externally provided processor
    HostedPlugin,
}

impl EffectType {
    /// Get display name for the effect type
    pub fn name(&self) -> &'static str {
        match self {
            EffectType::Eq => "EQ",
            EffectType::Compressor => "Compressor",
            EffectType::Reverb => "Reverb",
            EffectType::Delay => "Delay",
            EffectType::Limiter => "Limiter",
            EffectType::Chorus => "Chorus",
            EffectType::HostedPlugin => "Plugin",
        }
    }

    /// Built-in effect types (everything `create_effect` can build)
    pub fn builtin() -> &'static [EffectType] {
        &[
            EffectType::Eq,
            EffectType::Compressor,
            EffectType::Reverb,
            EffectType::Delay,
            EffectType::Limiter,
            EffectType::Chorus,
        ]
    }
}

/// Effect parameter identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectParamId {
    // EQ parameters
    EqLowFreq,
    EqLowGain,
    EqMid1Freq,
    EqMid1Gain,
    EqMid1Q,
    EqMid2Freq,
    EqMid2Gain,
    EqMid2Q,
    EqHighFreq,
    EqHighGain,

    // Compressor parameters
    CompThreshold,
    CompRatio,
    CompAttack,
    CompRelease,
    CompMakeup,

    // Reverb parameters
    ReverbRoomSize,
    ReverbDamping,
    ReverbMix,

    // Delay parameters
    DelayTime,
    DelaySync,
    DelayDivision,
    DelayFeedback,
    DelayMix,

    // Limiter parameters
    LimiterThreshold,
    LimiterRelease,

    // Chorus parameters
    ChorusRate,
    ChorusDepth,
    ChorusMix,
}

impl EffectParamId {
    /// Parameter name used by the control API
    pub fn name(&self) -> &'static str {
        match self {
            EffectParamId::EqLowFreq => "low_freq",
            EffectParamId::EqLowGain => "low_gain",
            EffectParamId::EqMid1Freq => "mid1_freq",
            EffectParamId::EqMid1Gain => "mid1_gain",
            EffectParamId::EqMid1Q => "mid1_q",
            EffectParamId::EqMid2Freq => "mid2_freq",
            EffectParamId::EqMid2Gain => "mid2_gain",
            EffectParamId::EqMid2Q => "mid2_q",
            EffectParamId::EqHighFreq => "high_freq",
            EffectParamId::EqHighGain => "high_gain",
            EffectParamId::CompThreshold | EffectParamId::LimiterThreshold => "threshold",
            EffectParamId::CompRatio => "ratio",
            EffectParamId::CompAttack => "attack",
            EffectParamId::CompRelease | EffectParamId::LimiterRelease => "release",
            EffectParamId::CompMakeup => "makeup",
            EffectParamId::ReverbRoomSize => "room_size",
            EffectParamId::ReverbDamping => "damping",
            EffectParamId::ReverbMix | EffectParamId::DelayMix | EffectParamId::ChorusMix => {
                "wet_dry"
            }
            EffectParamId::DelayTime => "time",
            EffectParamId::DelaySync => "sync",
            EffectParamId::DelayDivision => "division",
            EffectParamId::DelayFeedback => "feedback",
            EffectParamId::ChorusRate => "rate",
            EffectParamId::ChorusDepth => "depth",
        }
    }
}

/// Parameter definition: range, default and whether changes are ramped
#[derive(Debug, Clone)]
pub struct EffectParamDef {
    pub id: EffectParamId,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub unit: &'static str,
    /// Continuous parameters ramp; switches and indices jump
    pub smoothed: bool,
}

impl EffectParamDef {
    const fn continuous(id: EffectParamId, min: f32, max: f32, default: f32, unit: &'static str) -> Self {
        Self {
            id,
            min,
            max,
            default,
            unit,
            smoothed: true,
        }
    }

    const fn stepped(id: EffectParamId, min: f32, max: f32, default: f32) -> Self {
        Self {
            id,
            min,
            max,
            default,
            unit: "",
            smoothed: false,
        }
    }

    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }

    /// Format value for display
    pub fn format_value(&self, value: f32) -> String {
        if self.smoothed {
            format!("{:.2}{}", value, self.unit)
        } else {
            format!("{:.0}", value)
        }
    }
}

/// Get parameter definitions for an effect type
pub fn get_param_defs(effect_type: EffectType) -> Vec<EffectParamDef> {
    use EffectParamDef as D;
    use EffectParamId as P;
    match effect_type {
        EffectType::Eq => vec![
            D::continuous(P::EqLowFreq, 20.0, 1000.0, 100.0, "Hz"),
            D::continuous(P::EqLowGain, -12.0, 12.0, 0.0, "dB"),
            D::continuous(P::EqMid1Freq, 100.0, 8000.0, 500.0, "Hz"),
            D::continuous(P::EqMid1Gain, -12.0, 12.0, 0.0, "dB"),
            D::continuous(P::EqMid1Q, 0.5, 10.0, 1.0, ""),
            D::continuous(P::EqMid2Freq, 200.0, 12_000.0, 2000.0, "Hz"),
            D::continuous(P::EqMid2Gain, -12.0, 12.0, 0.0, "dB"),
            D::continuous(P::EqMid2Q, 0.5, 10.0, 1.0, ""),
            D::continuous(P::EqHighFreq, 2000.0, 20_000.0, 8000.0, "Hz"),
            D::continuous(P::EqHighGain, -12.0, 12.0, 0.0, "dB"),
        ],
        EffectType::Compressor => vec![
            D::continuous(P::CompThreshold, -60.0, 0.0, -20.0, "dB"),
            D::continuous(P::CompRatio, 1.0, 20.0, 4.0, ":1"),
            D::continuous(P::CompAttack, 0.1, 100.0, 10.0, "ms"),
            D::continuous(P::CompRelease, 10.0, 1000.0, 100.0, "ms"),
            D::continuous(P::CompMakeup, 0.0, 20.0, 0.0, "dB"),
        ],
        EffectType::Reverb => vec![
            D::continuous(P::ReverbRoomSize, 0.0, 1.0, 0.5, ""),
            D::continuous(P::ReverbDamping, 0.0, 1.0, 0.5, ""),
            D::continuous(P::ReverbMix, 0.0, 1.0, 0.3, ""),
        ],
        EffectType::Delay => vec![
            D::continuous(P::DelayTime, 1.0, 2000.0, 250.0, "ms"),
            D::stepped(P::DelaySync, 0.0, 1.0, 0.0),
            D::stepped(P::DelayDivision, 0.0, 7.0, 3.0),
            D::continuous(P::DelayFeedback, 0.0, 1.0, 0.4, ""),
            D::continuous(P::DelayMix, 0.0, 1.0, 0.3, ""),
        ],
        EffectType::Limiter => vec![
            D::continuous(P::LimiterThreshold, -20.0, 0.0, -0.3, "dB"),
            D::continuous(P::LimiterRelease, 1.0, 1000.0, 50.0, "ms"),
        ],
        EffectType::Chorus => vec![
            D::continuous(P::ChorusRate, 0.1, 10.0, 1.0, "Hz"),
            D::continuous(P::ChorusDepth, 0.0, 1.0, 0.5, ""),
            D::continuous(P::ChorusMix, 0.0, 1.0, 0.5, ""),
        ],
        EffectType::HostedPlugin => Vec::new(),
    }
}

/// Look up a built-in parameter by its API name
pub fn find_param(effect_type: EffectType, name: &str) -> Option<EffectParamDef> {
    get_param_defs(effect_type)
        .into_iter()
        .find(|def| def.id.name() == name)
}

/// Get default parameter values for an effect type
pub fn get_default_params(effect_type: EffectType) -> HashMap<EffectParamId, f32> {
    get_param_defs(effect_type)
        .into_iter()
        .map(|def| (def.id, def.default))
        .collect()
}

/// A resolved parameter target, small enough to send to the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKey {
    Builtin(EffectParamId),
    /// Normalized `param_N` of a hosted plugin
    Plugin(u32),
}

/// An effect instance on a track (control-side, serializable state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectSlot {
    pub id: EffectId,
    /// Type of effect
    pub effect_type: EffectType,
    /// Whether the effect is bypassed
    pub bypassed: bool,
    /// Built-in parameter values (param_id -> value)
    #[serde(default)]
    pub params: HashMap<EffectParamId, f32>,
    /// Hosted plugin parameters, normalized 0..1
    #[serde(default)]
    pub plugin_params: Vec<f32>,
    /// Hosted plugin name
    #[serde(default)]
    pub plugin_name: Option<String>,
    /// Opaque plugin state, stored and returned untouched
    #[serde(default, with = "crate::project::base64_blob")]
    pub plugin_state: Option<Vec<u8>>,
}

impl EffectSlot {
    /// Create a new effect slot with default parameters
    pub fn new(id: EffectId, effect_type: EffectType) -> Self {
        Self {
            id,
            effect_type,
            bypassed: false,
            params: get_default_params(effect_type),
            plugin_params: Vec::new(),
            plugin_name: None,
            plugin_state: None,
        }
    }

    /// Resolve a parameter name for this slot
    pub fn resolve(&self, name: &str) -> Option<(ParamKey, f32, f32)> {
        if self.effect_type == EffectType::HostedPlugin {
            let index: u32 = name.strip_prefix("param_")?.parse().ok()?;
            if (index as usize) < self.plugin_params.len() {
                return Some((ParamKey::Plugin(index), 0.0, 1.0));
            }
            return None;
        }
        find_param(self.effect_type, name).map(|def| (ParamKey::Builtin(def.id), def.min, def.max))
    }

    /// Get a parameter value
    pub fn get_param(&self, id: EffectParamId) -> f32 {
        self.params.get(&id).copied().unwrap_or(0.0)
    }

    /// Store a (clamped) value
    pub fn set_param(&mut self, key: ParamKey, value: f32) {
        match key {
            ParamKey::Builtin(id) => {
                self.params.insert(id, value);
            }
            ParamKey::Plugin(index) => {
                if let Some(slot) = self.plugin_params.get_mut(index as usize) {
                    *slot = value;
                }
            }
        }
    }
}

/// Trait for audio effect processors (implemented by EQ, delay, etc.)
///
/// Effects must be Send to work in the audio thread.
pub trait Effect: Send {
    /// Process stereo audio in-place
    fn process(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Set a parameter value
    fn set_param(&mut self, id: EffectParamId, value: f32);

    /// Get current parameter value
    fn get_param(&self, id: EffectParamId) -> f32;

    /// Reset internal state (delay lines, filter memories)
    fn reset(&mut self);

    /// Set tempo in BPM (for tempo-synced effects)
    fn set_tempo(&mut self, _bpm: f64) {}

    /// Get the effect type
    fn effect_type(&self) -> EffectType;
}

/// Every processor a slot can hold
pub enum EffectProcessor {
    Eq(eq::ParametricEq),
    Compressor(compressor::Compressor),
    Reverb(reverb::ReverbEffect),
    Delay(delay::DelayEffect),
    Limiter(limiter::Limiter),
    Chorus(chorus::ChorusEffect),
    Hosted(HostedPlugin),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            EffectProcessor::Eq($p) => $body,
            EffectProcessor::Compressor($p) => $body,
            EffectProcessor::Reverb($p) => $body,
            EffectProcessor::Delay($p) => $body,
            EffectProcessor::Limiter($p) => $body,
            EffectProcessor::Chorus($p) => $body,
            EffectProcessor::Hosted($p) => $body,
        }
    };
}

impl Effect for EffectProcessor {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        dispatch!(self, p => p.process(left, right))
    }

    fn set_param(&mut self, id: EffectParamId, value: f32) {
        dispatch!(self, p => p.set_param(id, value))
    }

    fn get_param(&self, id: EffectParamId) -> f32 {
        dispatch!(self, p => p.get_param(id))
    }

    fn reset(&mut self) {
        dispatch!(self, p => p.reset())
    }

    fn set_tempo(&mut self, bpm: f64) {
        dispatch!(self, p => p.set_tempo(bpm))
    }

    fn effect_type(&self) -> EffectType {
        dispatch!(self, p => p.effect_type())
    }
}

/// Create a built-in effect processor from an EffectSlot. Returns None for
/// hosted plugins, which are supplied by the caller.
pub fn create_effect(slot: &EffectSlot, sample_rate: f32, bpm: f64) -> Option<EffectProcessor> {
    let mut effect = match slot.effect_type {
        EffectType::Eq => EffectProcessor::Eq(eq::ParametricEq::new(sample_rate)),
        EffectType::Compressor => {
            EffectProcessor::Compressor(compressor::Compressor::new(sample_rate))
        }
        EffectType::Reverb => EffectProcessor::Reverb(reverb::ReverbEffect::new(sample_rate)),
        EffectType::Delay => EffectProcessor::Delay(delay::DelayEffect::new(sample_rate, bpm)),
        EffectType::Limiter => EffectProcessor::Limiter(limiter::Limiter::new(sample_rate)),
        EffectType::Chorus => EffectProcessor::Chorus(chorus::ChorusEffect::new(sample_rate)),
        EffectType::HostedPlugin => return None,
    };
    for (id, value) in &slot.params {
        effect.set_param(*id, *value);
    }
    Some(effect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_names_resolve_per_effect() {
        assert_eq!(
            find_param(EffectType::Compressor, "threshold").map(|d| d.id),
            Some(EffectParamId::CompThreshold)
        );
        assert_eq!(
            find_param(EffectType::Limiter, "threshold").map(|d| d.id),
            Some(EffectParamId::LimiterThreshold)
        );
        assert_eq!(
            find_param(EffectType::Delay, "wet_dry").map(|d| d.id),
            Some(EffectParamId::DelayMix)
        );
        assert!(find_param(EffectType::Reverb, "threshold").is_none());
    }

    #[test]
    fn test_defaults_are_within_range() {
        for &ty in EffectType::builtin() {
            for def in get_param_defs(ty) {
                assert!(def.default >= def.min && def.default <= def.max, "{:?}", def.id);
            }
        }
    }

    #[test]
    fn test_every_builtin_can_be_created() {
        for &ty in EffectType::builtin() {
            let slot = EffectSlot::new(EffectId(1), ty);
            let effect = create_effect(&slot, 48_000.0, 120.0).unwrap();
            assert_eq!(effect.effect_type(), ty);
        }
        let slot = EffectSlot::new(EffectId(1), EffectType::HostedPlugin);
        assert!(create_effect(&slot, 48_000.0, 120.0).is_none());
    }

    #[test]
    fn test_plugin_param_names() {
        let mut slot = EffectSlot::new(EffectId(3), EffectType::HostedPlugin);
        slot.plugin_params = vec![0.5; 4];
        assert_eq!(slot.resolve("param_3").map(|r| r.0), Some(ParamKey::Plugin(3)));
        assert!(slot.resolve("param_4").is_none());
        assert!(slot.resolve("gain").is_none());
    }

    #[test]
    fn test_format_value() {
        let def = find_param(EffectType::Eq, "low_freq").unwrap();
        assert_eq!(def.format_value(100.0), "100.00Hz");
        let def = find_param(EffectType::Delay, "division").unwrap();
        assert_eq!(def.format_value(3.0), "3");
    }
}

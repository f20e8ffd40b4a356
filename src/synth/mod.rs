//! Polyphonic subtractive synthesizer for MIDI tracks
//!
//! 16 fixed voices, each with three oscillators, a state-variable filter
//! swept by a shared LFO, and an ADSR envelope. Nothing here allocates after
//! construction.

pub mod envelope;
pub mod filter;
pub mod oscillator;

use envelope::{Adsr, Envelope};
use filter::{svf_coefficient, svf_damping, FilterMode, SvfState};
use oscillator::{midi_to_freq, OscSettings, Waveform};

/// Polyphony limit
pub const MAX_VOICES: usize = 16;

/// Fixed output scaling so a full chord does not slam the limiter
const OUTPUT_GAIN: f32 = 0.3;

/// Fade applied to a stolen voice before it retriggers
const STEAL_FADE_SECONDS: f32 = 0.002;

/// A synth parameter, resolved from its name on the control thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthParam {
    OscType(usize),
    OscLevel(usize),
    OscDetune(usize),
    FilterType,
    FilterCutoff,
    FilterResonance,
    LfoRate,
    LfoDepth,
    EnvAttack,
    EnvDecay,
    EnvSustain,
    EnvRelease,
    Volume,
}

impl SynthParam {
    pub fn from_name(name: &str) -> Option<Self> {
        let osc = |rest: &str| -> Option<(usize, String)> {
            let mut chars = rest.chars();
            let n = chars.next()?.to_digit(10)? as usize;
            if !(1..=3).contains(&n) {
                return None;
            }
            Some((n - 1, chars.as_str().to_string()))
        };

        if let Some(rest) = name.strip_prefix("osc") {
            let (idx, suffix) = osc(rest)?;
            return match suffix.as_str() {
                "_type" => Some(SynthParam::OscType(idx)),
                "_level" => Some(SynthParam::OscLevel(idx)),
                "_detune" => Some(SynthParam::OscDetune(idx)),
                _ => None,
            };
        }

        Some(match name {
            "filter_type" => SynthParam::FilterType,
            "filter_cutoff" => SynthParam::FilterCutoff,
            "filter_resonance" => SynthParam::FilterResonance,
            "lfo_rate" => SynthParam::LfoRate,
            "lfo_depth" => SynthParam::LfoDepth,
            "env_attack" => SynthParam::EnvAttack,
            "env_decay" => SynthParam::EnvDecay,
            "env_sustain" => SynthParam::EnvSustain,
            "env_release" => SynthParam::EnvRelease,
            "volume" => SynthParam::Volume,
            _ => return None,
        })
    }

    /// Valid range (min, max)
    pub fn range(self) -> (f32, f32) {
        match self {
            SynthParam::OscType(_) => (0.0, 3.0),
            SynthParam::OscLevel(_) => (0.0, 1.0),
            SynthParam::OscDetune(_) => (-1200.0, 1200.0),
            SynthParam::FilterType => (0.0, 2.0),
            SynthParam::FilterCutoff => (20.0, 20_000.0),
            SynthParam::FilterResonance => (0.0, 1.0),
            SynthParam::LfoRate => (0.1, 20.0),
            SynthParam::LfoDepth => (0.0, 1.0),
            SynthParam::EnvAttack | SynthParam::EnvDecay | SynthParam::EnvRelease => (0.001, 10.0),
            SynthParam::EnvSustain => (0.0, 1.0),
            SynthParam::Volume => (0.0, 1.0),
        }
    }

    pub fn clamp(self, value: f32) -> f32 {
        let (min, max) = self.range();
        value.clamp(min, max)
    }
    /// API name, the inverse of [`SynthParam::from_name`]
    pub fn name(self) -> String {
        match self {
            SynthParam::OscType(i) => format!("osc{}_type", i + 1),
            SynthParam::OscLevel(i) => format!("osc{}_level", i + 1),
            SynthParam::OscDetune(i) => format!("osc{}_detune", i + 1),
            SynthParam::FilterType => "filter_type".into(),
            SynthParam::FilterCutoff => "filter_cutoff".into(),
            SynthParam::FilterResonance => "filter_resonance".into(),
            SynthParam::LfoRate => "lfo_rate".into(),
            SynthParam::LfoDepth => "lfo_depth".into(),
            SynthParam::EnvAttack => "env_attack".into(),
            SynthParam::EnvDecay => "env_decay".into(),
            SynthParam::EnvSustain => "env_sustain".into(),
            SynthParam::EnvRelease => "env_release".into(),
            SynthParam::Volume => "volume".into(),
        }
    }

    /// Every parameter, oscillators first
    pub fn all() -> impl Iterator<Item = SynthParam> {
        (0..3)
            .flat_map(|i| {
                [
                    SynthParam::OscType(i),
                    SynthParam::OscLevel(i),
                    SynthParam::OscDetune(i),
                ]
            })
            .chain([
                SynthParam::FilterType,
                SynthParam::FilterCutoff,
                SynthParam::FilterResonance,
                SynthParam::LfoRate,
                SynthParam::LfoDepth,
                SynthParam::EnvAttack,
                SynthParam::EnvDecay,
                SynthParam::EnvSustain,
                SynthParam::EnvRelease,
                SynthParam::Volume,
            ])
    }
}

/// Settings shared by every voice
#[derive(Debug, Clone, PartialEq)]
pub struct SynthSettings {
    pub oscillators: [OscSettings; 3],
    pub filter_mode: FilterMode,
    pub cutoff: f32,
    pub resonance: f32,
    pub lfo_rate: f32,
    pub lfo_depth: f32,
    pub adsr: Adsr,
    pub volume: f32,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            oscillators: [
                OscSettings::new(Waveform::Saw, 0.8, 0.0),
                OscSettings::new(Waveform::Square, 0.4, 7.0),
                OscSettings::new(Waveform::Sine, 0.0, 0.0),
            ],
            filter_mode: FilterMode::LowPass,
            cutoff: 8000.0,
            resonance: 0.2,
            lfo_rate: 1.0,
            lfo_depth: 0.0,
            adsr: Adsr::default(),
            volume: 1.0,
        }
    }
}

impl SynthSettings {
    pub fn apply(&mut self, param: SynthParam, value: f32) {
        if !value.is_finite() {
            return;
        }
        let value = param.clamp(value);
        match param {
            SynthParam::OscType(i) => self.oscillators[i].waveform = Waveform::from(value),
            SynthParam::OscLevel(i) => self.oscillators[i].level = value,
            SynthParam::OscDetune(i) => self.oscillators[i].detune = value,
            SynthParam::FilterType => self.filter_mode = FilterMode::from(value),
            SynthParam::FilterCutoff => self.cutoff = value,
            SynthParam::FilterResonance => self.resonance = value,
            SynthParam::LfoRate => self.lfo_rate = value,
            SynthParam::LfoDepth => self.lfo_depth = value,
            SynthParam::EnvAttack => self.adsr.attack = value,
            SynthParam::EnvDecay => self.adsr.decay = value,
            SynthParam::EnvSustain => self.adsr.sustain = value,
            SynthParam::EnvRelease => self.adsr.release = value,
            SynthParam::Volume => self.volume = value,
        }
    }

    pub fn get(&self, param: SynthParam) -> f32 {
        match param {
            SynthParam::OscType(i) => self.oscillators[i].waveform as u32 as f32,
            SynthParam::OscLevel(i) => self.oscillators[i].level,
            SynthParam::OscDetune(i) => self.oscillators[i].detune,
            SynthParam::FilterType => self.filter_mode as u32 as f32,
            SynthParam::FilterCutoff => self.cutoff,
            SynthParam::FilterResonance => self.resonance,
            SynthParam::LfoRate => self.lfo_rate,
            SynthParam::LfoDepth => self.lfo_depth,
            SynthParam::EnvAttack => self.adsr.attack,
            SynthParam::EnvDecay => self.adsr.decay,
            SynthParam::EnvSustain => self.adsr.sustain,
            SynthParam::EnvRelease => self.adsr.release,
            SynthParam::Volume => self.volume,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingNote {
    pitch: u8,
    velocity: f32,
    released: bool,
}

#[derive(Debug, Clone, Default)]
struct Voice {
    note: u8,
    velocity: f32,
    /// Trigger sequence number; the smallest is the oldest
    seq: u64,
    phases: [f32; 3],
    env: Envelope,
    filter: SvfState,
    /// Remaining frames of a steal fade
    fade: u32,
    pending: Option<PendingNote>,
}

impl Voice {
    fn is_active(&self) -> bool {
        self.env.is_active() || self.pending.is_some()
    }

    fn start(&mut self, pitch: u8, velocity: f32) {
        self.note = pitch;
        self.velocity = velocity;
        self.phases = [0.0; 3];
        self.filter.reset();
        self.env.trigger();
    }

    /// The note this voice is (or is about to be) playing
    fn current_note(&self) -> u8 {
        self.pending.map(|p| p.pitch).unwrap_or(self.note)
    }
}

pub struct Synth {
    voices: [Voice; MAX_VOICES],
    settings: SynthSettings,
    sample_rate: f32,
    next_seq: u64,
    lfo_phase: f32,
    steal_fade_frames: u32,
}

impl Synth {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            voices: std::array::from_fn(|_| Voice::default()),
            settings: SynthSettings::default(),
            sample_rate,
            next_seq: 0,
            lfo_phase: 0.0,
            steal_fade_frames: ((STEAL_FADE_SECONDS * sample_rate).round() as u32).max(1),
        }
    }

    pub fn settings(&self) -> &SynthSettings {
        &self.settings
    }

    pub fn set_param(&mut self, param: SynthParam, value: f32) {
        self.settings.apply(param, value);
    }

    /// Replace every setting at once (used when a track is rebuilt)
    pub fn set_settings(&mut self, settings: SynthSettings) {
        self.settings = settings;
    }

    pub fn note_on(&mut self, pitch: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(pitch);
            return;
        }
        let velocity = velocity.min(127) as f32 / 127.0;
        self.next_seq += 1;
        let seq = self.next_seq;

        if let Some(voice) = self.voices.iter_mut().find(|v| !v.is_active()) {
            voice.seq = seq;
            voice.start(pitch, velocity);
            return;
        }

        // Steal the oldest voice; min_by_key keeps the first (lowest slot) on ties
        if let Some(voice) = self.voices.iter_mut().min_by_key(|v| v.seq) {
            voice.seq = seq;
            voice.pending = Some(PendingNote {
                pitch,
                velocity,
                released: false,
            });
            if voice.fade == 0 {
                voice.fade = self.steal_fade_frames;
            }
        }
    }

    pub fn note_off(&mut self, pitch: u8) {
        let adsr = self.settings.adsr;
        for voice in &mut self.voices {
            match voice.pending.as_mut() {
                Some(pending) if pending.pitch == pitch => pending.released = true,
                Some(_) => {}
                None if voice.note == pitch => voice.env.release(&adsr, self.sample_rate),
                None => {}
            }
        }
    }

    /// Release every sounding note
    pub fn all_notes_off(&mut self) {
        let adsr = self.settings.adsr;
        for voice in &mut self.voices {
            voice.pending = None;
            voice.fade = 0;
            voice.env.release(&adsr, self.sample_rate);
        }
    }

    /// Silence immediately and restart the LFO and voice ages
    pub fn reset(&mut self) {
        for voice in &mut self.voices {
            *voice = Voice::default();
        }
        self.next_seq = 0;
        self.lfo_phase = 0.0;
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// Notes held by active voices, in slot order
    pub fn active_notes(&self) -> impl Iterator<Item = u8> + '_ {
        self.voices
            .iter()
            .filter(|v| v.is_active())
            .map(Voice::current_note)
    }

    /// Add the synth output to both channels
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let sr = self.sample_rate;
        let settings = &self.settings;
        let damping = svf_damping(settings.resonance);
        let lfo_inc = settings.lfo_rate / sr;
        let gain = settings.volume * OUTPUT_GAIN;
        let fade_len = self.steal_fade_frames as f32;

        let mut ratios = [0.0f32; 3];
        for (r, osc) in ratios.iter_mut().zip(settings.oscillators.iter()) {
            *r = osc.ratio();
        }

        if !self.voices.iter().any(Voice::is_active) {
            // Keep the LFO running so it does not depend on voice activity
            self.lfo_phase = (self.lfo_phase + lfo_inc * left.len() as f32).fract();
            return;
        }

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let lfo = (self.lfo_phase * 2.0 * std::f32::consts::PI).sin();
            self.lfo_phase = (self.lfo_phase + lfo_inc).fract();
            let cutoff = settings.cutoff * 2.0f32.powf(settings.lfo_depth * 2.0 * lfo);
            let g = svf_coefficient(cutoff, sr);

            let mut mix = 0.0;
            for voice in self.voices.iter_mut() {
                if !voice.is_active() {
                    continue;
                }

                let mut fade_gain = 1.0;
                if voice.fade > 0 {
                    fade_gain = voice.fade as f32 / fade_len;
                    voice.fade -= 1;
                    if voice.fade == 0 {
                        if let Some(pending) = voice.pending.take() {
                            voice.start(pending.pitch, pending.velocity);
                            if pending.released {
                                voice.env.release(&settings.adsr, sr);
                            }
                        }
                    }
                }

                let env = voice.env.next_level(&settings.adsr, sr);
                if env <= 0.0 && !voice.env.is_active() {
                    continue;
                }

                let freq = midi_to_freq(voice.note);
                let mut osc_sum = 0.0;
                for (i, osc) in settings.oscillators.iter().enumerate() {
                    if osc.level > 0.0 {
                        osc_sum += osc.waveform.sample(voice.phases[i]) * osc.level;
                    }
                    voice.phases[i] = (voice.phases[i] + freq * ratios[i] / sr).fract();
                }

                let filtered = voice
                    .filter
                    .process(osc_sum, g, damping, settings.filter_mode);
                mix += filtered * env * voice.velocity * fade_gain;
            }

            let out = mix * gain;
            *l += out;
            *r += out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::test_helpers::peak_level;

    const SR: f32 = 48_000.0;

    fn render(synth: &mut Synth, frames: usize) -> Vec<f32> {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        synth.render(&mut left, &mut right);
        left
    }

    #[test]
    fn test_param_names() {
        assert_eq!(SynthParam::from_name("osc1_type"), Some(SynthParam::OscType(0)));
        assert_eq!(SynthParam::from_name("osc3_detune"), Some(SynthParam::OscDetune(2)));
        assert_eq!(SynthParam::from_name("filter_cutoff"), Some(SynthParam::FilterCutoff));
        assert_eq!(SynthParam::from_name("volume"), Some(SynthParam::Volume));
        assert_eq!(SynthParam::from_name("osc4_level"), None);
        assert_eq!(SynthParam::from_name("osc1_pitch"), None);
        assert_eq!(SynthParam::from_name("cutoff"), None);
    }

    #[test]
    fn test_every_param_name_round_trips() {
        let all: Vec<_> = SynthParam::all().collect();
        assert_eq!(all.len(), 19);
        for param in all {
            assert_eq!(SynthParam::from_name(&param.name()), Some(param));
        }
    }

    #[test]
    fn test_params_are_clamped() {
        let mut synth = Synth::new(SR);
        synth.set_param(SynthParam::FilterCutoff, 50_000.0);
        assert_eq!(synth.settings().cutoff, 20_000.0);
        synth.set_param(SynthParam::OscDetune(1), -5000.0);
        assert_eq!(synth.settings().get(SynthParam::OscDetune(1)), -1200.0);
        synth.set_param(SynthParam::Volume, f32::NAN);
        assert_eq!(synth.settings().volume, 1.0);
    }

    #[test]
    fn test_silent_without_notes() {
        let mut synth = Synth::new(SR);
        assert_eq!(peak_level(&render(&mut synth, 512)), 0.0);
    }

    #[test]
    fn test_note_sounds_then_releases() {
        let mut synth = Synth::new(SR);
        synth.note_on(60, 100);
        let out = render(&mut synth, 4800);
        assert!(peak_level(&out) > 0.01);
        assert_eq!(synth.active_voice_count(), 1);

        synth.note_off(60);
        // 0.2 s release
        render(&mut synth, 9600 + 100);
        assert_eq!(synth.active_voice_count(), 0);
    }

    #[test]
    fn test_polyphony_is_bounded_and_oldest_is_stolen() {
        let mut synth = Synth::new(SR);
        for pitch in 40..60 {
            synth.note_on(pitch, 100);
        }
        assert_eq!(synth.active_voice_count(), MAX_VOICES);

        // After the steal fade the four oldest notes are gone
        render(&mut synth, 256);
        let notes: Vec<u8> = synth.active_notes().collect();
        assert_eq!(notes.len(), MAX_VOICES);
        for pitch in 40..44 {
            assert!(!notes.contains(&pitch), "note {} should be stolen", pitch);
        }
        for pitch in 44..60 {
            assert!(notes.contains(&pitch), "note {} should sound", pitch);
        }
    }

    #[test]
    fn test_steal_tie_takes_lowest_slot() {
        let mut synth = Synth::new(SR);
        for pitch in 0..MAX_VOICES as u8 {
            synth.note_on(pitch + 40, 100);
        }
        // Identical ages after a reset of the counters
        for voice in synth.voices.iter_mut() {
            voice.seq = 1;
        }
        synth.note_on(90, 100);
        assert_eq!(synth.voices[0].current_note(), 90);
    }

    #[test]
    fn test_all_notes_off_releases_everything() {
        let mut synth = Synth::new(SR);
        for pitch in [60, 64, 67] {
            synth.note_on(pitch, 100);
        }
        render(&mut synth, 1000);
        synth.all_notes_off();
        render(&mut synth, 12_000);
        assert_eq!(synth.active_voice_count(), 0);
    }

    #[test]
    fn test_reset_is_deterministic() {
        let mut synth = Synth::new(SR);
        synth.set_param(SynthParam::LfoDepth, 0.5);
        synth.note_on(57, 90);
        let a = render(&mut synth, 2048);
        synth.reset();
        synth.note_on(57, 90);
        let b = render(&mut synth, 2048);
        assert_eq!(a, b);
    }
}

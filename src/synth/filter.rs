//! State Variable Filter used by each synth voice
//!
//! Chamberlin SVF with low-pass, high-pass and band-pass taps. Resonance
//! lowers the damping term; the coefficient is capped so the filter stays
//! stable at any cutoff.

/// Filter mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)] // LowPass/HighPass/BandPass are standard filter terminology
pub enum FilterMode {
    LowPass = 0,
    HighPass = 1,
    BandPass = 2,
}

impl From<f32> for FilterMode {
    fn from(value: f32) -> Self {
        match value.round() as i32 {
            i32::MIN..=0 => FilterMode::LowPass,
            1 => FilterMode::HighPass,
            _ => FilterMode::BandPass,
        }
    }
}

/// Damping at zero resonance (Butterworth-like)
const MAX_DAMPING: f32 = 1.414;
/// Damping at full resonance; never zero so the filter cannot self-oscillate
const MIN_DAMPING: f32 = 0.1;

/// Per-voice filter state
#[derive(Debug, Clone, Default)]
pub struct SvfState {
    low: f32,
    band: f32,
}

impl SvfState {
    pub fn reset(&mut self) {
        self.low = 0.0;
        self.band = 0.0;
    }

    /// Process one sample with coefficient `g` (see [`svf_coefficient`])
    #[inline]
    pub fn process(&mut self, input: f32, g: f32, damping: f32, mode: FilterMode) -> f32 {
        // Check for corrupted state and reset if needed
        if !self.band.is_finite() || !self.low.is_finite() {
            self.reset();
        }

        let high = input - damping * self.band - self.low;
        let band = self.band + g * high;
        let low = self.low + g * band;

        self.band = band;
        self.low = low;

        let output = match mode {
            FilterMode::LowPass => low,
            FilterMode::HighPass => high,
            FilterMode::BandPass => band,
        };

        if output.is_finite() {
            output
        } else {
            0.0
        }
    }
}

/// g = 2 * sin(pi * fc / fs), with fc clamped below Nyquist
#[inline]
pub fn svf_coefficient(cutoff: f32, sample_rate: f32) -> f32 {
    let cutoff = cutoff.clamp(20.0, sample_rate * 0.45);
    let omega = std::f32::consts::PI * cutoff / sample_rate;
    (2.0 * omega.sin()).min(1.0)
}

/// Map resonance 0..1 to the damping term
#[inline]
pub fn svf_damping(resonance: f32) -> f32 {
    let r = resonance.clamp(0.0, 1.0);
    MAX_DAMPING - (MAX_DAMPING - MIN_DAMPING) * r
}

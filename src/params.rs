//! Parameter store
//!
//! Control-rate values are written by the control thread and read by the
//! audio thread once per buffer. Every field is a single atomic, so a reader
//! never waits. `SmoothedValue` turns the step changes into short ramps on
//! the audio side.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// An `f32` stored in an `AtomicU32`
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// An `f64` stored in an `AtomicU64`
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Per-track mix parameters shared between the track model and its runtime
#[derive(Debug)]
pub struct TrackParams {
    /// Volume in dB (may be negative infinity)
    pub volume_db: AtomicF32,
    /// Pan position (-1.0 = left, 1.0 = right)
    pub pan: AtomicF32,
    pub mute: AtomicBool,
    pub solo: AtomicBool,
    pub armed: AtomicBool,
}

impl TrackParams {
    pub fn new(volume_db: f32, pan: f32) -> Self {
        Self {
            volume_db: AtomicF32::new(volume_db),
            pan: AtomicF32::new(pan),
            mute: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            armed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_soloed(&self) -> bool {
        self.solo.load(Ordering::Acquire)
    }
}

/// Tempo, meter and metronome settings
#[derive(Debug)]
pub struct GlobalParams {
    pub tempo_bpm: AtomicF64,
    pub beats_per_bar: AtomicU32,
    pub beat_unit: AtomicU32,
    pub metronome_enabled: AtomicBool,
    pub count_in_bars: AtomicU32,
}

/// Default tempo for a new engine
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Tempo limits in BPM
pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 300.0;

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            tempo_bpm: AtomicF64::new(DEFAULT_TEMPO),
            beats_per_bar: AtomicU32::new(4),
            beat_unit: AtomicU32::new(4),
            metronome_enabled: AtomicBool::new(true),
            count_in_bars: AtomicU32::new(2),
        }
    }
}

impl GlobalParams {
    pub fn tempo(&self) -> f64 {
        self.tempo_bpm.load()
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar.load(Ordering::Acquire).max(1)
    }

    pub fn metronome_enabled(&self) -> bool {
        self.metronome_enabled.load(Ordering::Acquire)
    }

    pub fn count_in_bars(&self) -> u32 {
        self.count_in_bars.load(Ordering::Acquire)
    }
}

/// Linear ramp toward a target over a fixed number of frames
#[derive(Debug, Clone)]
pub struct SmoothedValue {
    current: f32,
    target: f32,
    step: f32,
    remaining: u32,
    ramp_frames: u32,
}

impl SmoothedValue {
    pub fn new(value: f32, ramp_frames: u32) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
            ramp_frames,
        }
    }

    /// Start ramping toward `target`. Non-finite targets are ignored.
    pub fn set_target(&mut self, target: f32) {
        if !target.is_finite() || target == self.target {
            return;
        }
        self.target = target;
        if self.ramp_frames == 0 {
            self.current = target;
            self.remaining = 0;
            return;
        }
        self.remaining = self.ramp_frames;
        self.step = (target - self.current) / self.ramp_frames as f32;
    }

    /// Jump straight to `value`
    pub fn reset(&mut self, value: f32) {
        if value.is_finite() {
            self.current = value;
            self.target = value;
        }
        self.remaining = 0;
    }

    /// Advance one frame and return the new value
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            } else {
                self.current += self.step;
            }
        }
        self.current
    }

    /// Advance `frames` frames at once
    pub fn skip(&mut self, frames: u32) -> f32 {
        if frames >= self.remaining {
            self.current = self.target;
            self.remaining = 0;
        } else {
            self.current += self.step * frames as f32;
            self.remaining -= frames;
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_smoothing(&self) -> bool {
        self.remaining > 0
    }
}

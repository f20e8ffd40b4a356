//! Engine configuration
//!
//! Capacities here are what the audio graph pre-allocates. The control side
//! refuses requests that would exceed them.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Internal processing sample rate (all clips are resampled to it on load)
pub const ENGINE_SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Internal sample rate in Hz
    pub sample_rate: u32,
    /// Largest block rendered in one pass; bigger callbacks are split
    pub max_block_frames: usize,
    /// Tracks including Master
    pub max_tracks: usize,
    pub max_effects_per_track: usize,
    pub max_clips_per_track: usize,
    pub max_midi_clips_per_track: usize,
    /// MIDI events a single track can receive in one block
    pub max_events_per_block: usize,
    /// Slots in the control → audio command queue
    pub command_queue_capacity: usize,
    /// Seconds of input the capture ring holds before overrunning
    pub capture_ring_seconds: f32,
    /// Always-on master limiter ceiling in dBFS
    pub master_limiter_threshold_db: f32,
    /// Parameter ramp length in milliseconds
    pub smoothing_ms: f32,
    /// Where finished takes are written as WAV (none = keep in memory only)
    pub recordings_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: ENGINE_SAMPLE_RATE,
            max_block_frames: 1024,
            max_tracks: 64,
            max_effects_per_track: 16,
            max_clips_per_track: 256,
            max_midi_clips_per_track: 64,
            max_events_per_block: 512,
            command_queue_capacity: 1024,
            capture_ring_seconds: 30.0,
            master_limiter_threshold_db: -0.3,
            smoothing_ms: 15.0,
            recordings_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load a config file; missing fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Number of frames in one ramp of a smoothed parameter
    pub fn smoothing_frames(&self) -> u32 {
        ((self.smoothing_ms / 1000.0) * self.sample_rate as f32).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_tracks": 8}"#).unwrap();
        assert_eq!(config.max_tracks, 8);
        assert_eq!(config.sample_rate, ENGINE_SAMPLE_RATE);
        assert_eq!(config.master_limiter_threshold_db, -0.3);
    }

    #[test]
    fn smoothing_is_within_ten_to_twenty_ms() {
        let config = EngineConfig::default();
        let frames = config.smoothing_frames();
        assert!(frames >= 480 && frames <= 960, "got {}", frames);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"sample_rate": 44100, "smoothing_ms": 10.0}"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.smoothing_frames(), 441);
    }
}

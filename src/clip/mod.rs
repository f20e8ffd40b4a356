//! Clip store - decoded sample data and per-clip metadata
//!
//! Sample data is immutable once loaded and shared with the audio thread
//! through `Arc`. Every clip is converted to the engine rate on load.

pub mod decode;
pub mod peaks;
pub mod resample;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::error::{EngineError, Result};
use crate::ids::{ClipId, TrackId};

pub use peaks::compute_peaks;

/// Lowest and highest sample rates the engine will play
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Interleaved f32 sample data
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Whether the audio thread can play this buffer
    pub fn is_playable(&self) -> bool {
        self.channels > 0
            && self.frames() > 0
            && (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate)
    }

    /// Stereo frame at `frame`; mono is duplicated, extra channels ignored
    #[inline]
    pub fn stereo_frame(&self, frame: usize) -> (f32, f32) {
        let ch = self.channels as usize;
        let base = frame * ch;
        match ch {
            0 => (0.0, 0.0),
            1 => {
                let s = self.samples.get(base).copied().unwrap_or(0.0);
                (s, s)
            }
            _ => (
                self.samples.get(base).copied().unwrap_or(0.0),
                self.samples.get(base + 1).copied().unwrap_or(0.0),
            ),
        }
    }
}

/// A clip as the control thread sees it
#[derive(Debug, Clone)]
pub struct StoredClip {
    pub buffer: Arc<AudioBuffer>,
    pub name: String,
    /// File the clip was loaded from (None for recordings not yet written)
    pub source: Option<PathBuf>,
    /// Track whose timeline owns the clip
    pub owner: Option<TrackId>,
}

/// All loaded audio clips, addressed by id
#[derive(Debug, Default)]
pub struct ClipStore {
    clips: HashMap<ClipId, StoredClip>,
}

impl ClipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a file and convert it to `engine_rate`
    pub fn load_file(path: &Path, engine_rate: u32) -> Result<AudioBuffer> {
        let decoded = decode::decode_file(path)?;
        if decoded.sample_rate == engine_rate {
            return Ok(decoded);
        }
        info!(
            "Resampling {} from {} Hz to {} Hz",
            path.display(),
            decoded.sample_rate,
            engine_rate
        );
        resample::resample(&decoded, engine_rate).map_err(|e| EngineError::decode(path, e))
    }

    pub fn insert(&mut self, id: ClipId, clip: StoredClip) {
        self.clips.insert(id, clip);
    }

    pub fn get(&self, id: ClipId) -> Result<&StoredClip> {
        self.clips.get(&id).ok_or(EngineError::InvalidHandle {
            kind: "clip",
            id: id.raw(),
        })
    }

    pub fn get_mut(&mut self, id: ClipId) -> Result<&mut StoredClip> {
        self.clips.get_mut(&id).ok_or(EngineError::InvalidHandle {
            kind: "clip",
            id: id.raw(),
        })
    }

    pub fn contains(&self, id: ClipId) -> bool {
        self.clips.contains_key(&id)
    }

    pub fn remove(&mut self, id: ClipId) -> Option<StoredClip> {
        self.clips.remove(&id)
    }

    /// Clips in id order
    pub fn iter(&self) -> impl Iterator<Item = (ClipId, &StoredClip)> {
        let mut ids: Vec<ClipId> = self.clips.keys().copied().collect();
        ids.sort();
        ids.into_iter().map(move |id| (id, &self.clips[&id]))
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

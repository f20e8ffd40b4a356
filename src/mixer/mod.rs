//! Mixer model - tracks, gain staging and solo logic
//!
//! This is the control-thread view of every channel strip. The audio thread
//! sees the same volume/pan/mute/solo values through the shared
//! [`TrackParams`] atomics.

pub mod routing;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::{ClipId, EffectId, TrackId};
use crate::params::TrackParams;

pub use routing::{RoutingError, Send, SendGraph};

/// Highest allowed track volume in dB
pub const MAX_VOLUME_DB: f32 = 6.0;

/// Channel strip kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackType {
    Audio,
    Midi,
    Return,
    Group,
    Master,
}

impl TrackType {
    pub fn name(&self) -> &'static str {
        match self {
            TrackType::Audio => "Audio",
            TrackType::Midi => "MIDI",
            TrackType::Return => "Return",
            TrackType::Group => "Group",
            TrackType::Master => "Master",
        }
    }
}

/// Convert decibels to linear gain. Negative infinity is exactly silent.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    if db == f32::NEG_INFINITY {
        0.0
    } else {
        10.0f32.powf(db / 20.0)
    }
}

/// Convert linear gain to decibels (silence becomes negative infinity)
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Equal-power pan law: returns (left, right) gains
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Final mute state for mixing. Master is never silenced by another track's solo.
#[inline]
pub fn effective_mute(mute: bool, solo: bool, any_solo: bool, track_type: TrackType) -> bool {
    if track_type == TrackType::Master {
        return mute;
    }
    mute || (any_solo && !solo)
}

/// An audio clip placed on a track timeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipPlacement {
    pub clip_id: ClipId,
    /// Track-relative start in seconds
    pub start_time: f64,
    /// Gain trim in dB
    pub gain_db: f32,
}

/// A mixer track (channel strip)
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub track_type: TrackType,
    volume_db: f32,
    pan: f32,
    mute: bool,
    solo: bool,
    armed: bool,
    /// Effect chain in processing order
    pub effects: Vec<EffectId>,
    /// Audio clips ordered by start time
    pub clips: Vec<ClipPlacement>,
    /// MIDI clips placed on this track
    pub midi_clips: Vec<ClipId>,
    /// Shared with the audio thread
    params: Arc<TrackParams>,
}

impl Track {
    pub fn new(id: TrackId, name: &str, track_type: TrackType) -> Self {
        Self {
            id,
            name: name.to_string(),
            track_type,
            volume_db: 0.0,
            pan: 0.0,
            mute: false,
            solo: false,
            armed: false,
            effects: Vec::new(),
            clips: Vec::new(),
            midi_clips: Vec::new(),
            params: Arc::new(TrackParams::new(0.0, 0.0)),
        }
    }

    pub fn params(&self) -> &Arc<TrackParams> {
        &self.params
    }

    pub fn volume_db(&self) -> f32 {
        self.volume_db
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub fn is_soloed(&self) -> bool {
        self.solo
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Set volume in dB; values above +6 dB are clamped
    pub fn set_volume_db(&mut self, db: f32) {
        self.volume_db = db.min(MAX_VOLUME_DB);
        self.params.volume_db.store(self.volume_db);
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
        self.params.pan.store(self.pan);
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute = mute;
        self.params.mute.store(mute, Ordering::Release);
    }

    pub fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
        self.params.solo.store(solo, Ordering::Release);
    }

    pub fn set_armed(&mut self, armed: bool) {
        self.armed = armed;
        self.params.armed.store(armed, Ordering::Release);
    }

    /// Insert a clip keeping the timeline ordered by start time
    pub fn insert_clip(&mut self, placement: ClipPlacement) {
        let idx = self
            .clips
            .partition_point(|c| c.start_time <= placement.start_time);
        self.clips.insert(idx, placement);
    }

    pub fn remove_clip(&mut self, clip_id: ClipId) -> Option<ClipPlacement> {
        let idx = self.clips.iter().position(|c| c.clip_id == clip_id)?;
        Some(self.clips.remove(idx))
    }

    pub fn has_clip(&self, clip_id: ClipId) -> bool {
        self.clips.iter().any(|c| c.clip_id == clip_id) || self.midi_clips.contains(&clip_id)
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id,
            name: self.name.clone(),
            track_type: self.track_type,
            volume_db: self.volume_db,
            pan: self.pan,
            mute: self.mute,
            solo: self.solo,
            armed: self.armed,
            effects: self.effects.clone(),
            clips: self
                .clips
                .iter()
                .map(|c| c.clip_id)
                .chain(self.midi_clips.iter().copied())
                .collect(),
        }
    }
}

/// Read-only snapshot of a track for the UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    pub id: TrackId,
    pub name: String,
    pub track_type: TrackType,
    pub volume_db: f32,
    pub pan: f32,
    pub mute: bool,
    pub solo: bool,
    pub armed: bool,
    pub effects: Vec<EffectId>,
    pub clips: Vec<ClipId>,
}

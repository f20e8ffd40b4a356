//! MIDI clip model
//!
//! Clips store notes in beats so they follow tempo changes. The scheduler
//! turns them into frame-accurate events for the current block.

pub mod input;
pub mod recorder;
pub mod scheduler;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub use input::{input_port_names, InputNote, MidiInputDevice};
pub use recorder::MidiRecorder;
pub use scheduler::{schedule_clip, sort_events, SoundingNotes};

/// Length of a new clip in beats
pub const DEFAULT_CLIP_BEATS: f64 = 4.0;

/// A single note, positioned in beats relative to the clip start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MidiNote {
    pub pitch: u8,
    pub velocity: u8,
    pub start: f64,
    pub duration: f64,
}

impl MidiNote {
    pub fn new(pitch: u8, velocity: u8, start: f64, duration: f64) -> Result<Self> {
        if pitch > 127 {
            return Err(EngineError::invalid_state(format!("pitch {} out of range", pitch)));
        }
        if velocity > 127 {
            return Err(EngineError::invalid_state(format!(
                "velocity {} out of range",
                velocity
            )));
        }
        if !start.is_finite() || start < 0.0 {
            return Err(EngineError::invalid_state("note start must be >= 0"));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(EngineError::invalid_state("note duration must be > 0"));
        }
        Ok(Self {
            pitch,
            velocity,
            start,
            duration,
        })
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Note data shared with the audio thread (immutable once sent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiClipData {
    /// Ordered by start
    pub notes: Vec<MidiNote>,
    /// Total clip length in beats
    pub duration: f64,
    /// Pattern length in beats; the pattern repeats while `duration` allows
    pub loop_length: f64,
}

impl Default for MidiClipData {
    fn default() -> Self {
        Self {
            notes: Vec::new(),
            duration: DEFAULT_CLIP_BEATS,
            loop_length: DEFAULT_CLIP_BEATS,
        }
    }
}

impl MidiClipData {
    pub fn is_looped(&self) -> bool {
        self.duration > self.loop_length
    }

    /// Insert keeping notes ordered by start. An unlooped clip grows to the
    /// next whole bar when the note ends past it.
    pub fn add_note(&mut self, note: MidiNote, beats_per_bar: u32) {
        let idx = self.notes.partition_point(|n| n.start <= note.start);
        self.notes.insert(idx, note);

        if !self.is_looped() && note.end() > self.duration {
            let bar = beats_per_bar.max(1) as f64;
            let grown = (note.end() / bar).ceil() * bar;
            self.duration = grown;
            self.loop_length = grown;
        }
    }

    pub fn set_length(&mut self, duration: f64, loop_length: f64) -> Result<()> {
        if !(duration.is_finite() && duration > 0.0) {
            return Err(EngineError::invalid_state("clip duration must be > 0"));
        }
        if !(loop_length.is_finite() && loop_length > 0.0) {
            return Err(EngineError::invalid_state("loop length must be > 0"));
        }
        self.duration = duration;
        self.loop_length = loop_length;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    /// Every note as it sounds, after loop expansion and truncation.
    /// Returns `(start, end, pitch, velocity)` in clip beats.
    pub fn expanded_notes(&self) -> Vec<(f64, f64, u8, u8)> {
        let mut out = Vec::new();
        let loops = self.loop_count();
        for k in 0..loops {
            let offset = k as f64 * self.loop_length;
            for note in &self.notes {
                if let Some((start, end)) = self.note_span(note, offset) {
                    out.push((start, end, note.pitch, note.velocity));
                }
            }
        }
        out
    }

    /// Number of loop iterations that fit in the clip
    pub fn loop_count(&self) -> usize {
        if self.loop_length <= 0.0 || self.duration <= 0.0 {
            return 0;
        }
        (self.duration / self.loop_length).ceil() as usize
    }

    /// Where `note` sounds in iteration starting at `offset` beats, if at all
    #[inline]
    pub(crate) fn note_span(&self, note: &MidiNote, offset: f64) -> Option<(f64, f64)> {
        if note.start >= self.loop_length {
            return None;
        }
        let start = offset + note.start;
        if start >= self.duration {
            return None;
        }
        let end = (offset + note.end().min(self.loop_length)).min(self.duration);
        Some((start, end))
    }
}

/// A note event for one block, positioned by frame offset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    pub offset: u32,
    pub kind: MidiEventKind,
    pub pitch: u8,
    pub velocity: u8,
    /// Timeline beat where a scheduled note ends. Live notes have none.
    pub until: Option<f64>,
}

/// Note-off sorts before note-on at the same frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MidiEventKind {
    NoteOff,
    NoteOn,
}

impl MidiEvent {
    pub fn note_on(offset: u32, pitch: u8, velocity: u8) -> Self {
        Self {
            offset,
            kind: MidiEventKind::NoteOn,
            pitch,
            velocity,
            until: None,
        }
    }

    /// A clip note that must be released once the playhead passes `until`
    pub fn scheduled_note_on(offset: u32, pitch: u8, velocity: u8, until: f64) -> Self {
        Self {
            until: Some(until),
            ..Self::note_on(offset, pitch, velocity)
        }
    }

    pub fn note_off(offset: u32, pitch: u8) -> Self {
        Self {
            offset,
            kind: MidiEventKind::NoteOff,
            pitch,
            velocity: 0,
            until: None,
        }
    }
}

//! Live MIDI note capture for an armed MIDI track

use std::collections::HashMap;

use super::{MidiClipData, MidiNote};

/// Shortest recorded note in beats (a note-on with an immediate note-off)
const MIN_NOTE_BEATS: f64 = 1.0 / 64.0;

#[derive(Debug, Clone, Copy)]
struct HeldNote {
    start_frame: u64,
    velocity: u8,
}

#[derive(Debug, Clone, Copy)]
struct RecordedNote {
    pitch: u8,
    velocity: u8,
    start_frame: u64,
    end_frame: u64,
}

/// Collects note-on/note-off pairs, timestamped relative to the take start
#[derive(Debug, Default)]
pub struct MidiRecorder {
    held: HashMap<u8, HeldNote>,
    notes: Vec<RecordedNote>,
    /// Quantize grid as a 1/N note (0 = off)
    quantize_division: u32,
}

impl MidiRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grid for quantizing note starts: 0 = off, otherwise 1/N note
    pub fn set_quantize(&mut self, division: u32) {
        self.quantize_division = division;
    }

    pub fn quantize(&self) -> u32 {
        self.quantize_division
    }

    /// Forget everything from a previous take
    pub fn begin(&mut self) {
        self.held.clear();
        self.notes.clear();
    }

    pub fn note_on(&mut self, pitch: u8, velocity: u8, frame: u64) {
        // A retrigger without note-off closes the previous note
        self.note_off(pitch, frame);
        self.held.insert(
            pitch,
            HeldNote {
                start_frame: frame,
                velocity,
            },
        );
    }

    pub fn note_off(&mut self, pitch: u8, frame: u64) {
        if let Some(held) = self.held.remove(&pitch) {
            self.notes.push(RecordedNote {
                pitch,
                velocity: held.velocity,
                start_frame: held.start_frame,
                end_frame: frame.max(held.start_frame),
            });
        }
    }

    pub fn note_count(&self) -> usize {
        self.notes.len() + self.held.len()
    }

    /// Close held notes at `end_frame` and build a clip. Returns None for an
    /// empty take.
    pub fn finish(
        &mut self,
        end_frame: u64,
        frames_per_beat: f64,
        beats_per_bar: u32,
    ) -> Option<MidiClipData> {
        let held: Vec<u8> = self.held.keys().copied().collect();
        for pitch in held {
            self.note_off(pitch, end_frame);
        }
        if self.notes.is_empty() || frames_per_beat <= 0.0 {
            return None;
        }

        let grid = if self.quantize_division > 0 {
            Some(4.0 / self.quantize_division as f64)
        } else {
            None
        };

        let mut clip = MidiClipData::default();
        let mut notes = std::mem::take(&mut self.notes);
        notes.sort_by_key(|n| (n.start_frame, n.pitch));
        for rec in notes {
            let mut start = rec.start_frame as f64 / frames_per_beat;
            let mut duration =
                ((rec.end_frame - rec.start_frame) as f64 / frames_per_beat).max(MIN_NOTE_BEATS);
            if let Some(grid) = grid {
                start = (start / grid).round() * grid;
                duration = ((duration / grid).round() * grid).max(grid);
            }
            if let Ok(note) = MidiNote::new(rec.pitch, rec.velocity.min(127), start, duration) {
                clip.add_note(note, beats_per_bar);
            }
        }
        Some(clip)
    }
}

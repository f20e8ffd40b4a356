//! Beat-to-frame MIDI scheduling
//!
//! Runs on the audio thread. Events are written into a caller-owned vector
//! whose capacity was reserved up front; events that do not fit are counted
//! as dropped instead of growing the vector.

use super::{MidiClipData, MidiEvent};

/// Push the events of `clip` that fall in `[block_start, block_start + block_len)`.
///
/// `clip_start_frame` is the absolute frame of the clip's beat 0 and
/// `frames_per_beat` comes from the current tempo. Returns the number of
/// events dropped because `out` was full.
pub fn schedule_clip(
    clip: &MidiClipData,
    clip_start_frame: f64,
    frames_per_beat: f64,
    block_start: u64,
    block_len: u32,
    out: &mut Vec<MidiEvent>,
) -> usize {
    if frames_per_beat <= 0.0 || clip.loop_length <= 0.0 || clip.notes.is_empty() {
        return 0;
    }

    let block_end = block_start + block_len as u64;
    let first_beat = (block_start as f64 - clip_start_frame) / frames_per_beat;
    let last_beat = (block_end as f64 - clip_start_frame) / frames_per_beat;
    if last_beat < 0.0 || first_beat > clip.duration + 1.0 {
        return 0;
    }

    // Only iterations that can touch this block (one either side for rounding)
    let loops = clip.loop_count() as i64;
    let k_lo = ((first_beat / clip.loop_length).floor() as i64 - 1).max(0);
    let k_hi = ((last_beat / clip.loop_length).floor() as i64 + 1).min(loops - 1);

    let mut dropped = 0;
    let mut push = |frame: u64, event: MidiEvent| {
        if frame < block_start || frame >= block_end {
            return;
        }
        let event = MidiEvent {
            offset: (frame - block_start) as u32,
            ..event
        };
        if out.len() < out.capacity() {
            out.push(event);
        } else {
            dropped += 1;
        }
    };

    let to_frame = |beat: f64| -> Option<u64> {
        let frame = (clip_start_frame + beat * frames_per_beat).round();
        (frame >= 0.0).then_some(frame as u64)
    };

    let clip_start_beat = clip_start_frame / frames_per_beat;
    for k in k_lo..=k_hi {
        let offset = k as f64 * clip.loop_length;
        for note in &clip.notes {
            let Some((start, end)) = clip.note_span(note, offset) else {
                continue;
            };
            let start_frame = to_frame(start);
            if let Some(frame) = start_frame {
                let until = clip_start_beat + end;
                push(
                    frame,
                    MidiEvent::scheduled_note_on(0, note.pitch, note.velocity, until),
                );
            }
            // A note shorter than a frame still ends one frame after it starts
            let end_frame = match (start_frame, to_frame(end)) {
                (Some(on), Some(off)) => Some(off.max(on + 1)),
                (_, off) => off,
            };
            if let Some(frame) = end_frame {
                push(frame, MidiEvent::note_off(0, note.pitch));
            }
        }
    }

    dropped
}

/// Order by frame offset, note-off first on ties. Sorts in place.
pub fn sort_events(events: &mut [MidiEvent]) {
    events.sort_unstable_by_key(|e| (e.offset, e.kind, e.pitch));
}

/// A clip note the synth is holding and the beat it must end on
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sounding {
    pitch: u8,
    until: f64,
}

/// Clip notes currently held by a track's synth.
///
/// A note-off can be skipped when the tempo rises past it, or when its clip
/// is edited or removed mid-note. Expiring against the playhead at every
/// block start releases those notes anyway. One entry per pitch, so the
/// storage reserved up front is never outgrown.
#[derive(Debug)]
pub struct SoundingNotes {
    notes: Vec<Sounding>,
}

impl Default for SoundingNotes {
    fn default() -> Self {
        Self {
            notes: Vec::with_capacity(128),
        }
    }
}

impl SoundingNotes {
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Track the note started by `event`. Live notes are ignored.
    pub fn note_on(&mut self, event: &MidiEvent) {
        let Some(until) = event.until else {
            return;
        };
        let has_room = self.notes.len() < self.notes.capacity();
        match self.notes.iter_mut().find(|n| n.pitch == event.pitch) {
            Some(held) => held.until = until,
            None if has_room => self.notes.push(Sounding {
                pitch: event.pitch,
                until,
            }),
            None => {}
        }
    }

    pub fn note_off(&mut self, pitch: u8) {
        self.notes.retain(|n| n.pitch != pitch);
    }

    /// Hand every note ending at or before `beat` to `release` and forget it
    pub fn expire(&mut self, beat: f64, mut release: impl FnMut(u8)) {
        self.notes.retain(|n| {
            if n.until <= beat {
                release(n.pitch);
                false
            } else {
                true
            }
        });
    }

    /// Hand every held note to `release` and forget them all
    pub fn release_all(&mut self, mut release: impl FnMut(u8)) {
        for note in self.notes.drain(..) {
            release(note.pitch);
        }
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }
}

//! Audio-side track: source (clips or synth), effect chain and channel strip
//!
//! Every buffer a track touches is allocated when the runtime is built on the
//! control thread. Rendering only indexes into them.

use std::sync::Arc;

use basedrop::{Handle, Owned};

use crate::clip::AudioBuffer;
use crate::config::EngineConfig;
use crate::effects::{EffectSlotRuntime, ParamKey};
use crate::ids::{ClipId, EffectId, TrackId};
use crate::midi::{
    schedule_clip, sort_events, MidiClipData, MidiEvent, MidiEventKind, SoundingNotes,
};
use crate::mixer::{db_to_linear, effective_mute, pan_gains, TrackType};
use crate::params::{SmoothedValue, TrackParams};
use crate::synth::{Synth, SynthParam, SynthSettings};

/// An audio clip as the audio thread plays it
#[derive(Debug, Clone)]
pub struct PlacedClip {
    pub clip_id: ClipId,
    pub buffer: Arc<AudioBuffer>,
    /// Timeline position in engine frames
    pub start_frame: u64,
    /// Linear gain trim
    pub gain: f32,
}

impl PlacedClip {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.buffer.frames() as u64
    }
}

/// A MIDI clip as the audio thread schedules it
#[derive(Debug, Clone)]
pub struct PlacedMidiClip {
    pub clip_id: ClipId,
    /// Timeline position in beats
    pub start_beat: f64,
    pub data: Arc<MidiClipData>,
}

/// Per-block values shared by every track
#[derive(Debug, Clone, Copy)]
pub struct BlockContext {
    /// Playhead at the first frame of the block
    pub playhead: u64,
    /// Whether clips play in this block
    pub rolling: bool,
    pub frames_per_beat: f64,
    pub any_solo: bool,
}

/// Strip parameters read once per callback so every block agrees
#[derive(Debug, Clone, Copy)]
struct StripLatch {
    gain: f32,
    pan: f32,
    muted: bool,
    soloed: bool,
}

impl StripLatch {
    fn read(params: &TrackParams) -> Self {
        Self {
            gain: db_to_linear(params.volume_db.load()),
            pan: params.pan.load(),
            muted: params.is_muted(),
            soloed: params.is_soloed(),
        }
    }
}

pub struct TrackRuntime {
    pub id: TrackId,
    pub track_type: TrackType,
    params: Arc<TrackParams>,
    clips: Owned<Vec<PlacedClip>>,
    midi_clips: Owned<Vec<PlacedMidiClip>>,
    synth: Option<Synth>,
    effects: Vec<Owned<EffectSlotRuntime>>,
    /// Scheduled plus live events for the current block
    events: Vec<MidiEvent>,
    /// Live notes waiting for the next block
    live: Vec<MidiEvent>,
    /// Clip notes the synth is holding
    sounding: SoundingNotes,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    strip: StripLatch,
    gain: SmoothedValue,
    pan: SmoothedValue,
    mute_gain: SmoothedValue,
}

impl TrackRuntime {
    pub fn new(
        id: TrackId,
        track_type: TrackType,
        params: Arc<TrackParams>,
        config: &EngineConfig,
        gc: &Handle,
    ) -> Self {
        let ramp = config.smoothing_frames();
        let synth = (track_type == TrackType::Midi).then(|| Synth::new(config.sample_rate as f32));
        let strip = StripLatch::read(&params);
        Self {
            id,
            track_type,
            params,
            clips: Owned::new(gc, Vec::new()),
            midi_clips: Owned::new(gc, Vec::new()),
            synth,
            effects: Vec::with_capacity(config.max_effects_per_track),
            events: Vec::with_capacity(config.max_events_per_block),
            live: Vec::with_capacity(config.max_events_per_block),
            sounding: SoundingNotes::default(),
            left: vec![0.0; config.max_block_frames],
            right: vec![0.0; config.max_block_frames],
            strip,
            gain: SmoothedValue::new(strip.gain, ramp),
            pan: SmoothedValue::new(strip.pan, ramp),
            mute_gain: SmoothedValue::new(if strip.muted { 0.0 } else { 1.0 }, ramp),
        }
    }

    /// Take this callback's volume, pan, mute and solo from the shared params
    pub fn latch(&mut self) {
        self.strip = StripLatch::read(&self.params);
    }

    /// Solo as of the last latch
    pub fn is_soloed(&self) -> bool {
        self.strip.soloed
    }

    pub fn has_synth(&self) -> bool {
        self.synth.is_some()
    }

    pub fn synth(&self) -> Option<&Synth> {
        self.synth.as_ref()
    }

    /// Load settings before the runtime is sent to the audio thread
    pub fn set_synth_settings(&mut self, settings: &SynthSettings) {
        if let Some(synth) = self.synth.as_mut() {
            synth.set_settings(settings.clone());
        }
    }

    pub fn set_synth_param(&mut self, param: SynthParam, value: f32) {
        if let Some(synth) = self.synth.as_mut() {
            synth.set_param(param, value);
        }
    }

    /// Swap in a new clip list and hand back the old one
    pub fn replace_clips(&mut self, clips: Owned<Vec<PlacedClip>>) -> Owned<Vec<PlacedClip>> {
        std::mem::replace(&mut self.clips, clips)
    }

    /// Swap in a new MIDI clip list and hand back the old one. Notes the
    /// old list started are released since their note-offs may be gone.
    pub fn replace_midi_clips(
        &mut self,
        clips: Owned<Vec<PlacedMidiClip>>,
    ) -> Owned<Vec<PlacedMidiClip>> {
        if let Some(synth) = self.synth.as_mut() {
            self.sounding.release_all(|pitch| synth.note_off(pitch));
        }
        std::mem::replace(&mut self.midi_clips, clips)
    }

    /// Clip notes still held by the synth
    pub fn sounding_notes(&self) -> usize {
        self.sounding.len()
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Effect ids in processing order
    pub fn effect_ids(&self) -> impl Iterator<Item = EffectId> + '_ {
        self.effects.iter().map(|e| e.id)
    }

    /// Insert at `index` (clamped). A full chain hands the slot back.
    pub fn insert_effect(
        &mut self,
        index: usize,
        slot: Owned<EffectSlotRuntime>,
    ) -> Result<(), Owned<EffectSlotRuntime>> {
        if self.effects.len() == self.effects.capacity() {
            return Err(slot);
        }
        let index = index.min(self.effects.len());
        self.effects.insert(index, slot);
        Ok(())
    }

    pub fn remove_effect(&mut self, id: EffectId) -> Option<Owned<EffectSlotRuntime>> {
        let idx = self.effects.iter().position(|e| e.id == id)?;
        Some(self.effects.remove(idx))
    }

    pub fn move_effect(&mut self, id: EffectId, index: usize) {
        if let Some(slot) = self.remove_effect(id) {
            let index = index.min(self.effects.len());
            self.effects.insert(index, slot);
        }
    }

    fn effect_mut(&mut self, id: EffectId) -> Option<&mut EffectSlotRuntime> {
        self.effects
            .iter_mut()
            .find(|e| e.id == id)
            .map(|e| &mut **e)
    }

    pub fn set_effect_param(&mut self, id: EffectId, key: ParamKey, value: f32) {
        if let Some(slot) = self.effect_mut(id) {
            slot.set_param(key, value);
        }
    }

    pub fn set_effect_bypassed(&mut self, id: EffectId, bypassed: bool) {
        if let Some(slot) = self.effect_mut(id) {
            slot.set_bypassed(bypassed);
        }
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        for slot in &mut self.effects {
            slot.set_tempo(bpm);
        }
    }

    /// Queue a live note for the next block. Returns false if it was dropped.
    pub fn queue_live(&mut self, event: MidiEvent) -> bool {
        if self.synth.is_none() {
            return true;
        }
        if self.live.len() < self.live.capacity() {
            self.live.push(event);
            true
        } else {
            false
        }
    }

    /// Release every sounding note (pause, seek, stop)
    pub fn release_notes(&mut self) {
        self.live.clear();
        self.sounding.clear();
        if let Some(synth) = self.synth.as_mut() {
            synth.all_notes_off();
        }
    }

    /// Silence the synth, clear effect tails and settle the strip ramps on
    /// the current parameter values
    pub fn reset(&mut self) {
        self.live.clear();
        self.sounding.clear();
        if let Some(synth) = self.synth.as_mut() {
            synth.reset();
        }
        for slot in &mut self.effects {
            slot.reset();
        }
        self.latch();
        self.gain.reset(self.strip.gain);
        self.pan.reset(self.strip.pan);
        self.mute_gain.reset(if self.strip.muted { 0.0 } else { 1.0 });
    }

    /// Write the track source into `left`/`right`. Returns how many MIDI
    /// events were dropped.
    pub fn render_source(&mut self, ctx: &BlockContext, frames: usize) -> usize {
        let left = &mut self.left[..frames];
        let right = &mut self.right[..frames];
        left.fill(0.0);
        right.fill(0.0);

        if ctx.rolling {
            render_clips(&self.clips, ctx.playhead, left, right);
        }

        let Some(synth) = self.synth.as_mut() else {
            return 0;
        };

        if ctx.frames_per_beat > 0.0 {
            let beat = ctx.playhead as f64 / ctx.frames_per_beat;
            self.sounding.expire(beat, |pitch| synth.note_off(pitch));
        }

        self.events.clear();
        let mut dropped = 0;
        if ctx.rolling {
            for clip in self.midi_clips.iter() {
                dropped += schedule_clip(
                    &clip.data,
                    clip.start_beat * ctx.frames_per_beat,
                    ctx.frames_per_beat,
                    ctx.playhead,
                    frames as u32,
                    &mut self.events,
                );
            }
        }
        for event in self.live.drain(..) {
            if self.events.len() < self.events.capacity() {
                self.events.push(event);
            } else {
                dropped += 1;
            }
        }
        sort_events(&mut self.events);

        let mut pos = 0;
        for event in &self.events {
            let at = (event.offset as usize).min(frames);
            if at > pos {
                synth.render(&mut left[pos..at], &mut right[pos..at]);
                pos = at;
            }
            match event.kind {
                MidiEventKind::NoteOn => {
                    self.sounding.note_on(event);
                    synth.note_on(event.pitch, event.velocity);
                }
                MidiEventKind::NoteOff => {
                    self.sounding.note_off(event.pitch);
                    synth.note_off(event.pitch);
                }
            }
        }
        if pos < frames {
            synth.render(&mut left[pos..], &mut right[pos..]);
        }
        dropped
    }

    /// Effect chain, then smoothed gain, equal-power pan and mute gain
    pub fn process_strip(&mut self, ctx: &BlockContext, frames: usize) {
        let left = &mut self.left[..frames];
        let right = &mut self.right[..frames];

        for slot in &mut self.effects {
            slot.process(left, right);
        }

        let strip = self.strip;
        self.gain.set_target(strip.gain);
        self.pan.set_target(strip.pan);
        let muted = effective_mute(strip.muted, strip.soloed, ctx.any_solo, self.track_type);
        self.mute_gain.set_target(if muted { 0.0 } else { 1.0 });

        let (mut pan_l, mut pan_r) = pan_gains(self.pan.value());
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let g = self.gain.next_value() * self.mute_gain.next_value();
            if self.pan.is_smoothing() {
                (pan_l, pan_r) = pan_gains(self.pan.next_value());
            }
            *l *= g * pan_l;
            *r *= g * pan_r;
        }
    }
}

/// Add every clip overlapping `[playhead, playhead + len)`
fn render_clips(clips: &[PlacedClip], playhead: u64, left: &mut [f32], right: &mut [f32]) {
    let block_end = playhead + left.len() as u64;
    for clip in clips {
        if clip.start_frame >= block_end {
            // Sorted by start: nothing later can overlap
            break;
        }
        if !clip.buffer.is_playable() || clip.end_frame() <= playhead {
            continue;
        }
        let from = clip.start_frame.max(playhead);
        let to = clip.end_frame().min(block_end);
        for frame in from..to {
            let (sl, sr) = clip.buffer.stereo_frame((frame - clip.start_frame) as usize);
            let i = (frame - playhead) as usize;
            left[i] += sl * clip.gain;
            right[i] += sr * clip.gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;
    use crate::midi::MidiNote;

    fn config() -> EngineConfig {
        EngineConfig {
            max_block_frames: 256,
            ..EngineConfig::default()
        }
    }

    fn ctx(playhead: u64) -> BlockContext {
        BlockContext {
            playhead,
            rolling: true,
            frames_per_beat: 24_000.0,
            any_solo: false,
        }
    }

    fn audio_track(gc: &Collector) -> TrackRuntime {
        TrackRuntime::new(
            TrackId(1),
            TrackType::Audio,
            Arc::new(TrackParams::new(0.0, 0.0)),
            &config(),
            &gc.handle(),
        )
    }

    #[test]
    fn test_clip_plays_from_its_start_frame() {
        let gc = Collector::new();
        let mut track = audio_track(&gc);
        let buffer = Arc::new(AudioBuffer::new(vec![0.5; 100], 1, 48_000));
        track.replace_clips(Owned::new(&gc.handle(), vec![PlacedClip {
            clip_id: ClipId(2),
            buffer,
            start_frame: 10,
            gain: 1.0,
        }]));

        track.render_source(&ctx(0), 256);
        assert_eq!(track.left[9], 0.0);
        assert_eq!(track.left[10], 0.5);
        assert_eq!(track.right[109], 0.5);
        assert_eq!(track.left[110], 0.0);
    }

    #[test]
    fn test_malformed_clip_is_skipped() {
        let gc = Collector::new();
        let mut track = audio_track(&gc);
        let buffer = Arc::new(AudioBuffer::new(vec![0.5; 100], 1, 1_000));
        track.replace_clips(Owned::new(&gc.handle(), vec![PlacedClip {
            clip_id: ClipId(2),
            buffer,
            start_frame: 0,
            gain: 1.0,
        }]));
        track.render_source(&ctx(0), 64);
        assert!(track.left[..64].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_center_pan_is_equal_power() {
        let gc = Collector::new();
        let mut track = audio_track(&gc);
        track.left[..8].fill(1.0);
        track.right[..8].fill(1.0);
        track.process_strip(&ctx(0), 8);
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((track.left[0] - expected).abs() < 1e-6);
        assert!((track.right[7] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_mute_ramps_down() {
        let gc = Collector::new();
        let params = Arc::new(TrackParams::new(0.0, 0.0));
        let mut track = TrackRuntime::new(
            TrackId(1),
            TrackType::Audio,
            params.clone(),
            &config(),
            &gc.handle(),
        );
        params.mute.store(true, std::sync::atomic::Ordering::Release);

        let ramp = config().smoothing_frames() as usize;
        let mut first = None;
        let mut done = 0;
        while done < ramp + 256 {
            track.left.fill(1.0);
            track.right.fill(1.0);
            track.latch();
            track.process_strip(&ctx(0), 256);
            first.get_or_insert(track.left[0]);
            done += 256;
        }
        assert!(first.unwrap() > 0.5);
        assert_eq!(track.left[255], 0.0);
    }

    #[test]
    fn test_midi_clip_drives_synth() {
        let gc = Collector::new();
        let mut track = TrackRuntime::new(
            TrackId(3),
            TrackType::Midi,
            Arc::new(TrackParams::new(0.0, 0.0)),
            &config(),
            &gc.handle(),
        );
        let mut data = MidiClipData::default();
        data.add_note(MidiNote::new(60, 100, 0.0, 1.0).unwrap(), 4);
        track.replace_midi_clips(Owned::new(&gc.handle(), vec![PlacedMidiClip {
            clip_id: ClipId(4),
            start_beat: 0.0,
            data: Arc::new(data),
        }]));

        track.render_source(&ctx(0), 256);
        assert_eq!(track.synth().unwrap().active_voice_count(), 1);
        assert!(track.left[..256].iter().any(|s| *s != 0.0));
    }

    fn midi_track(gc: &Collector, notes: &[(u8, f64, f64)]) -> TrackRuntime {
        let mut track = TrackRuntime::new(
            TrackId(3),
            TrackType::Midi,
            Arc::new(TrackParams::new(0.0, 0.0)),
            &config(),
            &gc.handle(),
        );
        let mut data = MidiClipData::default();
        for &(pitch, start, duration) in notes {
            data.add_note(MidiNote::new(pitch, 100, start, duration).unwrap(), 4);
        }
        track.replace_midi_clips(Owned::new(&gc.handle(), vec![PlacedMidiClip {
            clip_id: ClipId(4),
            start_beat: 0.0,
            data: Arc::new(data),
        }]));
        track
    }

    /// Render `frames` from `from` in 256-frame blocks, returning the playhead
    fn run(track: &mut TrackRuntime, from: u64, frames: u64, frames_per_beat: f64) -> u64 {
        let mut pos = from;
        while pos < from + frames {
            let block = BlockContext {
                frames_per_beat,
                ..ctx(pos)
            };
            track.render_source(&block, 256);
            pos += 256;
        }
        pos
    }

    #[test]
    fn test_tempo_rise_mid_note_still_releases_it() {
        let gc = Collector::new();
        let mut track = midi_track(&gc, &[(60, 0.0, 2.0)]);
        let pos = run(&mut track, 0, 30_208, 24_000.0);
        assert_eq!(track.sounding_notes(), 1);
        // Beat 2 at 240 BPM is frame 24_000, behind the playhead
        run(&mut track, pos, 480_000, 12_000.0);
        assert_eq!(track.sounding_notes(), 0);
        assert_eq!(track.synth().unwrap().active_voice_count(), 0);
    }

    #[test]
    fn test_removing_clip_mid_note_releases_it() {
        let gc = Collector::new();
        let mut track = midi_track(&gc, &[(60, 0.0, 2.0)]);
        let pos = run(&mut track, 0, 12_032, 24_000.0);
        assert_eq!(track.synth().unwrap().active_voice_count(), 1);
        track.replace_midi_clips(Owned::new(&gc.handle(), Vec::new()));
        assert_eq!(track.sounding_notes(), 0);
        run(&mut track, pos, 96_000, 24_000.0);
        assert_eq!(track.synth().unwrap().active_voice_count(), 0);
    }

    #[test]
    fn test_sub_frame_note_is_released() {
        let gc = Collector::new();
        let mut track = midi_track(&gc, &[(60, 1.0, 1e-6)]);
        run(&mut track, 0, 480_000, 24_000.0);
        assert_eq!(track.sounding_notes(), 0);
        assert_eq!(track.synth().unwrap().active_voice_count(), 0);
    }

    #[test]
    fn test_strip_uses_latched_params() {
        let gc = Collector::new();
        let params = Arc::new(TrackParams::new(0.0, 0.0));
        let mut track = TrackRuntime::new(
            TrackId(1),
            TrackType::Audio,
            params.clone(),
            &config(),
            &gc.handle(),
        );
        params.mute.store(true, std::sync::atomic::Ordering::Release);
        params.volume_db.store(-60.0);

        // Not latched yet: the whole callback still sees the old values
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        for _ in 0..8 {
            track.left.fill(1.0);
            track.right.fill(1.0);
            track.process_strip(&ctx(0), 256);
            assert!((track.left[255] - expected).abs() < 1e-6);
        }
        assert!(!track.is_soloed());
        params.solo.store(true, std::sync::atomic::Ordering::Release);
        assert!(!track.is_soloed());
        track.latch();
        assert!(track.is_soloed());
    }

    #[test]
    fn test_live_notes_play_when_stopped() {
        let gc = Collector::new();
        let mut track = TrackRuntime::new(
            TrackId(3),
            TrackType::Midi,
            Arc::new(TrackParams::new(0.0, 0.0)),
            &config(),
            &gc.handle(),
        );
        assert!(track.queue_live(MidiEvent::note_on(0, 64, 90)));
        let stopped = BlockContext {
            rolling: false,
            ..ctx(0)
        };
        track.render_source(&stopped, 128);
        assert_eq!(track.synth().unwrap().active_voice_count(), 1);
        track.release_notes();
        track.render_source(&stopped, 256);
    }

    #[test]
    fn test_effect_chain_capacity_is_enforced() {
        use crate::effects::{create_effect, EffectSlot, EffectType};
        let gc = Collector::new();
        let cfg = EngineConfig {
            max_effects_per_track: 1,
            ..config()
        };
        let mut track = TrackRuntime::new(
            TrackId(1),
            TrackType::Audio,
            Arc::new(TrackParams::new(0.0, 0.0)),
            &cfg,
            &gc.handle(),
        );
        let make = |id| {
            let slot = EffectSlot::new(EffectId(id), EffectType::Delay);
            let processor = create_effect(&slot, 48_000.0, 120.0).unwrap();
            Owned::new(&gc.handle(), EffectSlotRuntime::new(processor, &slot, 480))
        };
        assert!(track.insert_effect(0, make(5)).is_ok());
        assert!(track.insert_effect(0, make(6)).is_err());
        assert_eq!(track.effect_ids().collect::<Vec<_>>(), vec![EffectId(5)]);
    }
}

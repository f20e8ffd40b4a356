//! The audio graph: everything that runs inside the audio callback
//!
//! `process` applies queued commands, then renders the callback in
//! sub-blocks no longer than `max_block_frames`. A sub-block also ends
//! exactly where a count-in does, so the switch to Recording lands on the
//! right frame whatever the device buffer size.
//!
//! Nothing here blocks, allocates or logs. Objects the graph lets go of are
//! `basedrop::Owned`, so dropping them only queues the free for the engine's
//! collector.

use std::sync::Arc;

use basedrop::Owned;
use crossbeam_channel::Receiver;

use super::command::EngineCommand;
use super::track_runtime::{BlockContext, TrackRuntime};
use crate::config::EngineConfig;
use crate::diagnostics::Counters;
use crate::effects::limiter::Limiter;
use crate::effects::Effect;
use crate::ids::TrackId;
use crate::metronome;
use crate::midi::MidiEvent;
use crate::params::GlobalParams;
use crate::recorder::CaptureProducer;
use crate::transport::{TransportClock, TransportShared, TransportState};

/// Shared state the graph reads and publishes
pub struct EngineShared {
    pub globals: Arc<GlobalParams>,
    pub transport: Arc<TransportShared>,
    pub counters: Arc<Counters>,
}

pub struct AudioGraph {
    sample_rate: u32,
    max_block: usize,
    commands: Receiver<EngineCommand>,
    /// Non-master tracks in creation order
    tracks: Vec<Owned<TrackRuntime>>,
    master: Owned<TrackRuntime>,
    limiter: Limiter,
    clock: TransportClock,
    shared: EngineShared,
    capture: CaptureProducer,
    /// Silence used as input when no device input is connected
    silent_input: Vec<f32>,
    tempo: f64,
}

impl AudioGraph {
    pub fn new(
        config: &EngineConfig,
        master: Owned<TrackRuntime>,
        commands: Receiver<EngineCommand>,
        shared: EngineShared,
        capture: CaptureProducer,
    ) -> Self {
        let max_block = config.max_block_frames.max(1);
        let tempo = shared.globals.tempo();
        Self {
            sample_rate: config.sample_rate,
            max_block,
            commands,
            tracks: Vec::with_capacity(config.max_tracks),
            master,
            limiter: Limiter::with_threshold(
                config.sample_rate as f32,
                config.master_limiter_threshold_db,
            ),
            clock: TransportClock::new(),
            shared,
            capture,
            silent_input: vec![0.0; max_block * 2],
            tempo,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> TransportState {
        self.clock.state()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len() + 1
    }

    /// Render one callback.
    ///
    /// `output` is interleaved stereo. `input`, if present, is interleaved
    /// stereo of the same length and is what gets recorded.
    pub fn process(&mut self, input: Option<&[f32]>, output: &mut [f32]) {
        self.apply_commands();

        self.master.latch();
        for track in &mut self.tracks {
            track.latch();
        }

        let tempo = self.shared.globals.tempo();
        if tempo != self.tempo {
            self.tempo = tempo;
            self.master.set_tempo(tempo);
            for track in &mut self.tracks {
                track.set_tempo(tempo);
            }
        }

        let total = output.len() / 2;
        let mut done = 0;
        while done < total {
            let mut n = (total - done).min(self.max_block);
            if let Some(remaining) = self.clock.frames_until_transition() {
                if remaining > 0 {
                    n = n.min(remaining as usize);
                }
            }
            let range = done * 2..(done + n) * 2;
            let block_input = input.and_then(|i| i.get(range.clone()));
            self.render_block(block_input, &mut output[range], n);
            self.clock.advance(n as u64);
            done += n;
        }

        self.clock.publish(&self.shared.transport);
        Counters::add(&self.shared.counters.buffers_rendered, 1);
    }

    fn render_block(&mut self, input: Option<&[f32]>, output: &mut [f32], frames: usize) {
        let state = self.clock.state();
        let globals = &self.shared.globals;
        let beats_per_bar = globals.beats_per_bar();
        let frames_per_beat = 60.0 / self.tempo * self.sample_rate as f64;
        let ctx = BlockContext {
            playhead: self.clock.playhead(),
            rolling: state.is_rolling(),
            frames_per_beat,
            any_solo: self.tracks.iter().any(|t| t.is_soloed()),
        };

        let master = &mut *self.master;
        let bus_l = &mut master.left[..frames];
        let bus_r = &mut master.right[..frames];
        bus_l.fill(0.0);
        bus_r.fill(0.0);

        let mut dropped = 0;
        for track in &mut self.tracks {
            dropped += track.render_source(&ctx, frames);
            track.process_strip(&ctx, frames);
            for (b, s) in bus_l.iter_mut().zip(&track.left[..frames]) {
                *b += *s;
            }
            for (b, s) in bus_r.iter_mut().zip(&track.right[..frames]) {
                *b += *s;
            }
        }
        Counters::add(&self.shared.counters.dropped_events, dropped as u64);

        self.master.process_strip(&ctx, frames);

        let click_from = match state {
            TransportState::CountingIn => Some(self.clock.count_in_elapsed()),
            s if s.is_rolling() && globals.metronome_enabled() => Some(ctx.playhead),
            _ => None,
        };
        let master = &mut *self.master;
        let (left, right) = (&mut master.left[..frames], &mut master.right[..frames]);
        if let Some(start) = click_from {
            metronome::render(
                left,
                right,
                start,
                self.tempo,
                beats_per_bar,
                self.sample_rate as f32,
            );
        }

        self.limiter.process(left, right);

        for (i, frame) in output.chunks_exact_mut(2).enumerate() {
            frame[0] = left[i];
            frame[1] = right[i];
        }

        if state == TransportState::Recording {
            let captured = input.unwrap_or(&self.silent_input[..frames * 2]);
            self.capture
                .push(self.clock.session(), ctx.playhead, captured);
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    fn track_mut(&mut self, id: TrackId) -> Option<&mut TrackRuntime> {
        if self.master.id == id {
            return Some(&mut *self.master);
        }
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .map(|t| &mut **t)
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Transport(cmd) => {
                if self.clock.apply(cmd) {
                    self.master.release_notes();
                    for track in &mut self.tracks {
                        track.release_notes();
                    }
                }
            }
            EngineCommand::Reset => {
                self.master.reset();
                for track in &mut self.tracks {
                    track.reset();
                }
                self.limiter.reset();
            }
            EngineCommand::AddTrack(mut track) => {
                if self.tracks.len() < self.tracks.capacity() {
                    track.set_tempo(self.tempo);
                    self.tracks.push(track);
                }
            }
            EngineCommand::RemoveTrack(id) => {
                if let Some(idx) = self.tracks.iter().position(|t| t.id == id) {
                    self.tracks.remove(idx);
                }
            }
            EngineCommand::SetClips { track, clips } => {
                if let Some(t) = self.track_mut(track) {
                    t.replace_clips(clips);
                }
            }
            EngineCommand::SetMidiClips { track, clips } => {
                if let Some(t) = self.track_mut(track) {
                    t.replace_midi_clips(clips);
                }
            }
            EngineCommand::InsertEffect { track, index, slot } => {
                let tempo = self.tempo;
                if let Some(t) = self.track_mut(track) {
                    let mut slot = slot;
                    slot.set_tempo(tempo);
                    // A full chain hands the slot back and it is dropped
                    let _ = t.insert_effect(index, slot);
                }
            }
            EngineCommand::RemoveEffect { track, effect } => {
                if let Some(t) = self.track_mut(track) {
                    t.remove_effect(effect);
                }
            }
            EngineCommand::MoveEffect {
                track,
                effect,
                index,
            } => {
                if let Some(t) = self.track_mut(track) {
                    t.move_effect(effect, index);
                }
            }
            EngineCommand::SetEffectParam {
                track,
                effect,
                key,
                value,
            } => {
                if let Some(t) = self.track_mut(track) {
                    t.set_effect_param(effect, key, value);
                }
            }
            EngineCommand::SetEffectBypass {
                track,
                effect,
                bypassed,
            } => {
                if let Some(t) = self.track_mut(track) {
                    t.set_effect_bypassed(effect, bypassed);
                }
            }
            EngineCommand::SetSynthParam {
                track,
                param,
                value,
            } => {
                if let Some(t) = self.track_mut(track) {
                    t.set_synth_param(param, value);
                }
            }
            EngineCommand::NoteOn {
                track,
                pitch,
                velocity,
            } => self.queue_live(track, MidiEvent::note_on(0, pitch, velocity)),
            EngineCommand::NoteOff { track, pitch } => {
                self.queue_live(track, MidiEvent::note_off(0, pitch))
            }
        }
    }

    fn queue_live(&mut self, track: TrackId, event: MidiEvent) {
        let dropped = self
            .track_mut(track)
            .map(|t| !t.queue_live(event))
            .unwrap_or(false);
        if dropped {
            Counters::add(&self.shared.counters.dropped_events, 1);
        }
    }
}

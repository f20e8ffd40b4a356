//! Engine control surface
//!
//! [`Engine`] lives on the control thread. Every call validates against the
//! control-side model, then sends the audio thread what it needs through the
//! bounded command queue. Nothing here ever waits for the audio thread; the
//! change is heard from the start of the next buffer.
//!
//! ```text
//! Engine (control) ──EngineCommand──▶ AudioGraph (audio callback)
//!        ◀──basedrop Collector (deferred drops)
//!        ◀──TransportShared / Counters (atomics)
//!        ◀──CaptureChunk (rtrb ring)
//! ```

pub mod command;
pub mod graph;
mod snapshot;
pub mod track_runtime;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use basedrop::{Collector, Handle, Owned};
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info, warn};
use serde::Serialize;

use crate::clip::{compute_peaks, ClipStore, StoredClip};
use crate::config::EngineConfig;
use crate::diagnostics::{Counters, DiagnosticsReport, EventLog};
use crate::effects::{
    create_effect, get_param_defs, EffectProcessor, EffectSlot, EffectSlotRuntime, EffectType,
    HostedPlugin, PluginProcessor,
};
use crate::error::{EngineError, Result};
use crate::ids::{ClipId, EffectId, IdAllocator, TrackId};
use crate::midi::{InputNote, MidiClipData, MidiInputDevice, MidiNote, MidiRecorder};
use crate::mixer::{db_to_linear, ClipPlacement, Send, SendGraph, Track, TrackInfo, TrackType};
use crate::params::{GlobalParams, MAX_TEMPO, MIN_TEMPO};
use crate::project::ProjectMeta;
use crate::recorder::{capture_channel, Recorder};
use crate::synth::{SynthParam, SynthSettings};
use crate::transport::{count_in_frames, Transport, TransportCommand, TransportShared, TransportState};

pub use command::EngineCommand;
pub use graph::{AudioGraph, EngineShared};
pub use track_runtime::{PlacedClip, PlacedMidiClip, TrackRuntime};

/// Count-in lengths the engine accepts, in bars
pub const COUNT_IN_CHOICES: [u32; 4] = [0, 1, 2, 4];

/// Quantize grids accepted for MIDI recording (1/N note, 0 = off)
pub const QUANTIZE_CHOICES: [u32; 7] = [0, 1, 2, 4, 8, 16, 32];

/// A MIDI clip as the control thread keeps it
#[derive(Debug, Clone)]
struct MidiClipEntry {
    name: String,
    data: MidiClipData,
    owner: Option<TrackId>,
    /// Timeline position in beats
    start_beat: f64,
}

#[derive(Debug, Clone)]
struct EffectEntry {
    track: TrackId,
    slot: EffectSlot,
}

/// What the current take records onto
#[derive(Debug, Clone, Copy)]
struct RecordingTarget {
    session: u32,
    /// Best known playhead frame of the take start
    start_frame: u64,
    audio_track: Option<TrackId>,
    midi_track: Option<TrackId>,
}

/// One effect parameter as shown to a user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectParamInfo {
    pub name: String,
    pub value: f32,
    pub min: f32,
    pub max: f32,
    /// Value formatted with its unit
    pub display: String,
}

/// Read-only view of an effect
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectInfo {
    pub id: EffectId,
    pub track: TrackId,
    pub effect_type: EffectType,
    pub bypassed: bool,
    pub plugin_name: Option<String>,
    pub params: Vec<EffectParamInfo>,
}

pub struct Engine {
    config: EngineConfig,
    commands: Sender<EngineCommand>,
    /// Frees whatever the audio thread drops
    collector: Collector,
    gc: Handle,
    globals: Arc<GlobalParams>,
    transport_shared: Arc<TransportShared>,
    counters: Arc<Counters>,
    transport: Transport,
    /// Creation order, Master first
    tracks: Vec<Track>,
    master: TrackId,
    clips: ClipStore,
    midi_clips: HashMap<ClipId, MidiClipEntry>,
    effects: HashMap<EffectId, EffectEntry>,
    synth_settings: HashMap<TrackId, SynthSettings>,
    sends: SendGraph,
    recorder: Recorder,
    midi_recorder: MidiRecorder,
    recording: Option<RecordingTarget>,
    ids: IdAllocator,
    meta: ProjectMeta,
    events: EventLog,
    seen_overloads: u64,
    seen_overruns: u64,
    /// Hardware keyboard, when one is connected
    midi_input: Option<MidiInputDevice>,
}

fn no_track(id: TrackId) -> EngineError {
    EngineError::InvalidHandle {
        kind: "track",
        id: id.raw(),
    }
}

fn no_clip(id: ClipId) -> EngineError {
    EngineError::InvalidHandle {
        kind: "clip",
        id: id.raw(),
    }
}

fn no_effect(id: EffectId) -> EngineError {
    EngineError::InvalidHandle {
        kind: "effect",
        id: id.raw(),
    }
}

fn check_finite(value: f64, what: &str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EngineError::invalid_state(format!("{} must be a finite number", what)))
    }
}

impl Engine {
    /// Create an engine and the audio graph it drives. The graph goes to the
    /// audio callback (see [`crate::audio`]) or is rendered offline.
    pub fn new(config: EngineConfig) -> (Engine, AudioGraph) {
        let queue = command::command_queue(config.command_queue_capacity);
        let collector = Collector::new();
        let gc = collector.handle();
        let globals = Arc::new(GlobalParams::default());
        let transport_shared = Arc::new(TransportShared::default());
        let counters = Arc::new(Counters::default());
        let (capture, mut recorder) =
            capture_channel(config.capture_ring_seconds, config.sample_rate);
        recorder.set_recordings_dir(config.recordings_dir.clone());

        let mut ids = IdAllocator::new();
        let master_id = ids.track();
        let master = Track::new(master_id, "Master", TrackType::Master);
        let master_runtime = TrackRuntime::new(
            master_id,
            TrackType::Master,
            master.params().clone(),
            &config,
            &gc,
        );

        let graph = AudioGraph::new(
            &config,
            Owned::new(&gc, master_runtime),
            queue.rx,
            EngineShared {
                globals: globals.clone(),
                transport: transport_shared.clone(),
                counters: counters.clone(),
            },
            capture,
        );

        info!(
            "Engine ready at {} Hz, {} frame blocks",
            config.sample_rate, config.max_block_frames
        );

        let engine = Engine {
            config,
            commands: queue.tx,
            collector,
            gc,
            globals,
            transport_shared,
            counters,
            transport: Transport::new(),
            tracks: vec![master],
            master: master_id,
            clips: ClipStore::new(),
            midi_clips: HashMap::new(),
            effects: HashMap::new(),
            synth_settings: HashMap::new(),
            sends: SendGraph::new(),
            recorder,
            midi_recorder: MidiRecorder::new(),
            recording: None,
            ids,
            meta: ProjectMeta::new("Untitled"),
            events: EventLog::new(),
            seen_overloads: 0,
            seen_overruns: 0,
            midi_input: None,
        };
        (engine, graph)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Counters the audio callback shares with the control side
    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    fn send(&mut self, command: EngineCommand) -> Result<()> {
        self.collect_retired();
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => EngineError::QueueFull,
            TrySendError::Disconnected(_) => EngineError::Disconnected,
        })
    }

    /// Free whatever the audio thread let go of
    fn collect_retired(&mut self) {
        self.collector.collect();
    }

    /// Allocations the audio side holds or has dropped but not yet freed
    pub fn live_allocations(&self) -> usize {
        self.collector.alloc_count()
    }

    /// Housekeeping: collect retired objects, drain captured audio, fold in
    /// transport changes the audio thread made and surface new overloads.
    /// Call it regularly (a UI tick is fine).
    pub fn pump(&mut self) {
        self.collect_retired();
        self.recorder.drain();
        self.transport.observe(self.transport_shared.state());

        if let Some(target) = self.recording.as_mut() {
            if target.session == self.transport_shared.recording_session() {
                target.start_frame = self.transport_shared.record_start_frame();
            }
        }

        let overloads = self.counters.overloads.load(Ordering::Relaxed);
        if overloads > self.seen_overloads {
            let new = overloads - self.seen_overloads;
            self.seen_overloads = overloads;
            warn!("{} audio overload(s)", new);
            self.events.warn(format!(
                "{} audio overload(s); try a larger buffer size",
                new
            ));
        }
        let overruns = self.recorder.overruns();
        if overruns > self.seen_overruns {
            let new = overruns - self.seen_overruns;
            self.seen_overruns = overruns;
            warn!("Recording ring overran {} time(s)", new);
            self.events
                .warn(format!("Recording lost {} chunk(s) of input", new));
        }

        let notes = self
            .midi_input
            .as_ref()
            .map(MidiInputDevice::drain)
            .unwrap_or_default();
        for note in notes {
            if let Err(err) = self.play_input_note(note) {
                warn!("Dropped MIDI input note: {}", err);
            }
        }
    }

    /// Clear synth voices, effect tails and parameter ramps on the audio
    /// side at the start of the next buffer
    pub fn reset_audio_state(&mut self) -> Result<()> {
        self.send(EngineCommand::Reset)
    }

    pub fn diagnostics(&self) -> DiagnosticsReport {
        DiagnosticsReport::collect(&self.counters, self.recorder.overruns())
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub(crate) fn event_log_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    fn frames_per_beat(&self) -> f64 {
        60.0 / self.globals.tempo() * self.config.sample_rate as f64
    }

    fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds * self.globals.tempo() / 60.0
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    pub fn play(&mut self) -> Result<()> {
        self.pump();
        let mut next = self.transport;
        if next.play()? {
            self.send(EngineCommand::Transport(TransportCommand::Play))?;
        }
        self.transport = next;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.pump();
        let mut next = self.transport;
        if next.pause()? {
            self.send(EngineCommand::Transport(TransportCommand::Pause))?;
        }
        self.transport = next;
        Ok(())
    }

    /// Stop from any state and rewind. A take in progress is kept if it
    /// captured anything.
    pub fn stop(&mut self) -> Result<()> {
        self.pump();
        let end_frame = self.transport_shared.playhead_frames();
        let take_start = self.take_start();
        self.send(EngineCommand::Transport(TransportCommand::Stop))?;
        self.transport.stop();
        self.transport_shared.store_playhead(0);

        if let Some(target) = self.recording.take() {
            if let Some(clip) = self.finish_recording(target, take_start, end_frame)? {
                debug!("Stop committed the take as {}", clip);
            }
        }
        Ok(())
    }

    /// Move the playhead. Negative positions clamp to zero.
    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        check_finite(seconds, "seek position")?;
        self.pump();
        self.transport.check_seek()?;
        let frame = (seconds.max(0.0) * self.config.sample_rate as f64).round() as u64;
        self.send(EngineCommand::Transport(TransportCommand::Seek { frame }))?;
        self.transport_shared.store_playhead(frame);
        Ok(())
    }

    /// Start a take. From Stopped this counts in first when count-in is on;
    /// from Playing it punches in immediately.
    pub fn start_recording(&mut self) -> Result<()> {
        self.pump();
        let bars = self.globals.count_in_bars();
        let mut next = self.transport;
        let state = next.start_recording(bars)?;
        let count_in = if state == TransportState::CountingIn {
            count_in_frames(
                bars,
                self.globals.beats_per_bar(),
                self.globals.tempo(),
                self.config.sample_rate,
            )
        } else {
            0
        };

        let armed = self
            .tracks
            .iter()
            .find(|t| t.is_armed() && matches!(t.track_type, TrackType::Audio | TrackType::Midi));
        let (audio_track, midi_track) = match armed {
            Some(t) if t.track_type == TrackType::Midi => (None, Some(t.id)),
            Some(t) => (Some(t.id), None),
            None => (None, None),
        };

        let start_frame = self.transport_shared.playhead_frames();
        let session = self.recorder.begin(audio_track, start_frame);
        let command = TransportCommand::StartRecording {
            session,
            count_in_frames: count_in,
        };
        if let Err(e) = self.send(EngineCommand::Transport(command)) {
            self.recorder.cancel();
            return Err(e);
        }

        self.midi_recorder.begin();
        self.transport = next;
        self.recording = Some(RecordingTarget {
            session,
            start_frame,
            audio_track,
            midi_track,
        });
        info!(
            "Recording session {} started ({}, count-in {} frames)",
            session,
            state.name(),
            count_in
        );
        self.events.info(format!("Recording started (take {})", session));
        Ok(())
    }

    /// End the take. Returns the new clip, or None when nothing was captured.
    /// The playhead returns to where the take began.
    pub fn stop_recording(&mut self) -> Result<Option<ClipId>> {
        self.pump();
        let mut next = self.transport;
        next.stop_recording()?;
        let end_frame = self.transport_shared.playhead_frames();
        let take_start = self.take_start();
        self.send(EngineCommand::Transport(TransportCommand::StopRecording {
            return_to: take_start,
        }))?;
        self.transport = next;
        self.transport_shared.store_playhead(take_start);

        match self.recording.take() {
            Some(target) => self.finish_recording(target, take_start, end_frame),
            None => Ok(None),
        }
    }

    fn take_start(&self) -> u64 {
        let captured = self
            .recorder
            .session()
            .filter(|s| s.frames() > 0)
            .map(|s| s.start_frame);
        captured
            .or(self.recording.map(|r| r.start_frame))
            .unwrap_or(0)
    }

    fn finish_recording(
        &mut self,
        target: RecordingTarget,
        take_start: u64,
        end_frame: u64,
    ) -> Result<Option<ClipId>> {
        if let Some(track) = target.midi_track {
            self.recorder.cancel();
            let fpb = self.frames_per_beat();
            let bpb = self.globals.beats_per_bar();
            let Some(data) =
                self.midi_recorder
                    .finish(end_frame.saturating_sub(take_start), fpb, bpb)
            else {
                debug!("MIDI take {} had no notes", target.session);
                return Ok(None);
            };
            let id = self.ids.clip();
            let notes = data.notes.len();
            self.midi_clips.insert(
                id,
                MidiClipEntry {
                    name: format!("Take {}", target.session),
                    data,
                    owner: None,
                    start_beat: 0.0,
                },
            );
            if self.track_index(track).is_ok() {
                if let Err(e) = self.place_midi_clip(track, id, take_start as f64 / fpb) {
                    warn!("Recorded MIDI clip {} left unplaced: {}", id, e);
                    self.events.warn(format!("Recorded MIDI left unplaced: {}", e));
                }
            }
            info!("MIDI take recorded as {} ({} notes)", id, notes);
            self.events.info(format!("Recorded {} MIDI notes", notes));
            return Ok(Some(id));
        }

        let Some(take) = self.recorder.finish(self.config.sample_rate) else {
            return Ok(None);
        };
        let id = self.ids.clip();
        let source = self.recorder.persist(&take);
        let seconds = take.buffer.duration_secs();
        self.clips.insert(
            id,
            StoredClip {
                buffer: Arc::new(take.buffer),
                name: format!("Take {}", take.session),
                source,
                owner: None,
            },
        );
        if let Some(track) = take.track.filter(|t| self.track_index(*t).is_ok()) {
            let start = take.start_frame as f64 / self.config.sample_rate as f64;
            if let Err(e) = self.place_clip(track, id, start) {
                warn!("Recorded clip {} left unplaced: {}", id, e);
                self.events.warn(format!("Recording left unplaced: {}", e));
            }
        }
        info!("Take recorded as {} ({:.2} s)", id, seconds);
        self.events.info(format!("Recorded {:.2} s", seconds));
        Ok(Some(id))
    }

    /// Block until recorded takes have been written to disk
    pub fn flush_recordings(&mut self) {
        self.recorder.wait_for_writes();
    }

    /// Frames captured so far in the current take
    pub fn recorded_frames(&mut self) -> usize {
        self.recorder.drain();
        self.recorder.session().map(|s| s.frames()).unwrap_or(0)
    }

    pub fn get_playhead(&self) -> f64 {
        self.transport_shared.playhead_frames() as f64 / self.config.sample_rate as f64
    }

    pub fn get_state(&self) -> TransportState {
        let mut transport = self.transport;
        transport.observe(self.transport_shared.state());
        transport.state()
    }

    // ------------------------------------------------------------------
    // Tracks
    // ------------------------------------------------------------------

    fn track_index(&self, id: TrackId) -> Result<usize> {
        self.tracks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| no_track(id))
    }

    fn track(&self, id: TrackId) -> Result<&Track> {
        self.tracks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| no_track(id))
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| no_track(id))
    }

    pub fn master_track_id(&self) -> TrackId {
        self.master
    }

    /// Every track in creation order, Master first
    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id).collect()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn create_track(&mut self, track_type: TrackType) -> Result<TrackId> {
        if track_type == TrackType::Master {
            return Err(EngineError::invalid_state(
                "a project has exactly one Master track",
            ));
        }
        let n = self
            .tracks
            .iter()
            .filter(|t| t.track_type == track_type)
            .count()
            + 1;
        let id = self.ids.track();
        let track = Track::new(id, &format!("{} {}", track_type.name(), n), track_type);
        if track_type == TrackType::Midi {
            self.synth_settings.insert(id, SynthSettings::default());
        }
        if let Err(e) = self.spawn_track(track) {
            self.synth_settings.remove(&id);
            return Err(e);
        }
        info!("Created {} track {}", track_type.name(), id);
        Ok(id)
    }

    /// Build a track's audio side from its control-side state and hand it to
    /// the graph. Hosted plugins are not rebuilt here.
    fn spawn_track(&mut self, track: Track) -> Result<()> {
        if self.tracks.len() >= self.config.max_tracks {
            return Err(EngineError::AllocationDenied(format!(
                "track limit of {} reached",
                self.config.max_tracks
            )));
        }
        let mut runtime = TrackRuntime::new(
            track.id,
            track.track_type,
            track.params().clone(),
            &self.config,
            &self.gc,
        );
        if let Some(settings) = self.synth_settings.get(&track.id) {
            runtime.set_synth_settings(settings);
        }
        for effect in &track.effects {
            let Some(entry) = self.effects.get(effect) else {
                continue;
            };
            let Some(slot) = self.build_effect(&entry.slot) else {
                continue;
            };
            if runtime.insert_effect(usize::MAX, slot).is_err() {
                warn!("Effect chain of {} is full", track.id);
            }
        }
        runtime.replace_clips(Owned::new(&self.gc, self.placed_clips(&track)));
        runtime.replace_midi_clips(Owned::new(&self.gc, self.placed_midi_clips(&track)));

        self.send(EngineCommand::AddTrack(Owned::new(&self.gc, runtime)))?;
        self.tracks.push(track);
        Ok(())
    }

    pub fn delete_track(&mut self, id: TrackId) -> Result<()> {
        if id == self.master {
            return Err(EngineError::invalid_state(
                "the Master track cannot be deleted",
            ));
        }
        let idx = self.track_index(id)?;
        if self
            .recording
            .is_some_and(|r| r.audio_track == Some(id) || r.midi_track == Some(id))
        {
            return Err(EngineError::invalid_state(format!(
                "{} is recording",
                id
            )));
        }
        self.send(EngineCommand::RemoveTrack(id))?;

        let track = self.tracks.remove(idx);
        for effect in &track.effects {
            self.effects.remove(effect);
        }
        for placement in &track.clips {
            self.clips.remove(placement.clip_id);
        }
        for clip in &track.midi_clips {
            self.midi_clips.remove(clip);
        }
        self.synth_settings.remove(&id);
        self.sends.remove_track(id);
        info!("Deleted track {} ({})", id, track.name);
        Ok(())
    }

    /// Volume in dB; above +6 clamps, negative infinity is silence
    pub fn set_track_volume(&mut self, id: TrackId, volume_db: f32) -> Result<()> {
        if volume_db.is_nan() {
            return Err(EngineError::invalid_state("volume must be a number"));
        }
        self.track_mut(id)?.set_volume_db(volume_db);
        Ok(())
    }

    pub fn set_track_pan(&mut self, id: TrackId, pan: f32) -> Result<()> {
        if pan.is_nan() {
            return Err(EngineError::invalid_state("pan must be a number"));
        }
        self.track_mut(id)?.set_pan(pan);
        Ok(())
    }

    pub fn set_track_mute(&mut self, id: TrackId, mute: bool) -> Result<()> {
        self.track_mut(id)?.set_mute(mute);
        Ok(())
    }

    pub fn set_track_solo(&mut self, id: TrackId, solo: bool) -> Result<()> {
        self.track_mut(id)?.set_solo(solo);
        Ok(())
    }

    /// Arm an Audio or MIDI track for recording
    pub fn set_track_armed(&mut self, id: TrackId, armed: bool) -> Result<()> {
        let track = self.track_mut(id)?;
        if armed && !matches!(track.track_type, TrackType::Audio | TrackType::Midi) {
            return Err(EngineError::invalid_state(format!(
                "{} tracks cannot be armed",
                track.track_type.name()
            )));
        }
        track.set_armed(armed);
        Ok(())
    }

    pub fn set_track_name(&mut self, id: TrackId, name: &str) -> Result<()> {
        self.track_mut(id)?.name = name.to_string();
        Ok(())
    }

    pub fn get_track_info(&self, id: TrackId) -> Result<TrackInfo> {
        Ok(self.track(id)?.info())
    }

    /// Record a send to a Return track. Sends are stored and validated but
    /// not mixed.
    pub fn add_send(&mut self, from: TrackId, target: TrackId, level_db: f32) -> Result<()> {
        self.track(from)?;
        if self.track(target)?.track_type != TrackType::Return {
            return Err(EngineError::invalid_state("sends must target a Return track"));
        }
        self.sends
            .add_send(from, Send::new(target, level_db))
            .map_err(|e| EngineError::invalid_state(e.to_string()))
    }

    pub fn remove_send(&mut self, from: TrackId, target: TrackId) -> bool {
        self.sends.remove_send(from, target)
    }

    pub fn sends_from(&self, track: TrackId) -> &[Send] {
        self.sends.sends_from(track)
    }

    // ------------------------------------------------------------------
    // Audio clips
    // ------------------------------------------------------------------

    /// Decode a file into the clip store (converted to the engine rate)
    pub fn load_audio_file(&mut self, path: &Path) -> Result<ClipId> {
        let buffer = ClipStore::load_file(path, self.config.sample_rate)?;
        let id = self.ids.clip();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("Clip {}", id.raw()));
        info!(
            "Loaded {} as {} ({:.2} s, {} ch)",
            path.display(),
            id,
            buffer.duration_secs(),
            buffer.channels
        );
        self.clips.insert(
            id,
            StoredClip {
                buffer: Arc::new(buffer),
                name,
                source: Some(path.to_path_buf()),
                owner: None,
            },
        );
        Ok(id)
    }

    fn placed_clips(&self, track: &Track) -> Vec<PlacedClip> {
        let rate = self.config.sample_rate as f64;
        track
            .clips
            .iter()
            .filter_map(|p| {
                let stored = self.clips.get(p.clip_id).ok()?;
                Some(PlacedClip {
                    clip_id: p.clip_id,
                    buffer: stored.buffer.clone(),
                    start_frame: (p.start_time * rate).round() as u64,
                    gain: db_to_linear(p.gain_db),
                })
            })
            .collect()
    }

    fn sync_clips(&mut self, track: TrackId) -> Result<()> {
        let clips = self.placed_clips(self.track(track)?);
        self.send(EngineCommand::SetClips {
            track,
            clips: Owned::new(&self.gc, clips),
        })
    }

    fn place_clip(&mut self, track: TrackId, clip: ClipId, start_time: f64) -> Result<()> {
        check_finite(start_time, "clip start")?;
        let start_time = start_time.max(0.0);
        if let Some(owner) = self.clips.get(clip)?.owner {
            if owner != track {
                return Err(EngineError::invalid_state(format!(
                    "{} is already on {}",
                    clip, owner
                )));
            }
        }
        let max_clips = self.config.max_clips_per_track;
        let t = self.track_mut(track)?;
        if t.track_type != TrackType::Audio {
            return Err(EngineError::invalid_state(format!(
                "audio clips cannot go on a {} track",
                t.track_type.name()
            )));
        }
        let gain_db = match t.remove_clip(clip) {
            Some(previous) => previous.gain_db,
            None if t.clips.len() >= max_clips => {
                return Err(EngineError::AllocationDenied(format!(
                    "{} already holds {} clips",
                    track, max_clips
                )))
            }
            None => 0.0,
        };
        t.insert_clip(ClipPlacement {
            clip_id: clip,
            start_time,
            gain_db,
        });
        self.clips.get_mut(clip)?.owner = Some(track);
        self.sync_clips(track)
    }

    /// Place a clip on an Audio track at `start_time` seconds
    pub fn add_clip_to_track(&mut self, track: TrackId, clip: ClipId, start_time: f64) -> Result<()> {
        self.place_clip(track, clip, start_time)
    }

    fn clip_owner(&self, clip: ClipId) -> Result<TrackId> {
        self.clips.get(clip)?.owner.ok_or_else(|| {
            EngineError::invalid_state(format!("{} is not on a track", clip))
        })
    }

    /// Move an audio or MIDI clip already on `track` to `start_time` seconds
    pub fn set_clip_start_time(&mut self, track: TrackId, clip: ClipId, start_time: f64) -> Result<()> {
        self.track(track)?;
        let owner = match self.midi_clips.get(&clip) {
            Some(entry) => entry.owner,
            None => self.clips.get(clip)?.owner,
        };
        if owner != Some(track) {
            return Err(EngineError::invalid_state(format!("{} is not on {}", clip, track)));
        }
        if self.midi_clips.contains_key(&clip) {
            check_finite(start_time, "clip start")?;
            let start_beat = self.seconds_to_beats(start_time);
            return self.place_midi_clip(track, clip, start_beat);
        }
        self.place_clip(track, clip, start_time)
    }

    /// Per-clip gain trim in dB
    pub fn set_clip_gain(&mut self, clip: ClipId, gain_db: f32) -> Result<()> {
        if gain_db.is_nan() {
            return Err(EngineError::invalid_state("gain must be a number"));
        }
        let owner = self.clip_owner(clip)?;
        let placement = self
            .track_mut(owner)?
            .clips
            .iter_mut()
            .find(|c| c.clip_id == clip)
            .ok_or_else(|| no_clip(clip))?;
        placement.gain_db = gain_db.min(crate::mixer::MAX_VOLUME_DB);
        self.sync_clips(owner)
    }

    /// Take an audio or MIDI clip off a track. The clip stays loaded.
    pub fn remove_clip_from_track(&mut self, track: TrackId, clip: ClipId) -> Result<()> {
        if let Some(entry) = self.midi_clips.get(&clip) {
            if entry.owner != Some(track) {
                return Err(EngineError::invalid_state(format!("{} is not on {}", clip, track)));
            }
            self.track_mut(track)?.midi_clips.retain(|c| *c != clip);
            if let Some(entry) = self.midi_clips.get_mut(&clip) {
                entry.owner = None;
            }
            return self.sync_midi_clips(track);
        }

        if self.track_mut(track)?.remove_clip(clip).is_none() {
            return Err(EngineError::invalid_state(format!("{} is not on {}", clip, track)));
        }
        self.clips.get_mut(clip)?.owner = None;
        self.sync_clips(track)
    }

    /// Remove a clip from its track and forget it
    pub fn delete_clip(&mut self, clip: ClipId) -> Result<()> {
        let owner = if let Some(entry) = self.midi_clips.get(&clip) {
            entry.owner
        } else {
            self.clips.get(clip)?.owner
        };
        if let Some(track) = owner {
            self.remove_clip_from_track(track, clip)?;
        }
        if self.midi_clips.remove(&clip).is_none() {
            self.clips.remove(clip);
        }
        debug!("Deleted {}", clip);
        Ok(())
    }

    /// Min/max pairs across `resolution` buckets
    pub fn get_waveform_peaks(&self, clip: ClipId, resolution: usize) -> Result<Vec<[f32; 2]>> {
        Ok(compute_peaks(&self.clips.get(clip)?.buffer, resolution))
    }

    /// Length in seconds. MIDI clips follow the current tempo.
    pub fn get_clip_duration(&self, clip: ClipId) -> Result<f64> {
        if let Some(entry) = self.midi_clips.get(&clip) {
            return Ok(entry.data.duration * 60.0 / self.globals.tempo());
        }
        Ok(self.clips.get(clip)?.buffer.duration_secs())
    }

    /// End of the last audio or MIDI clip on any track, in seconds at the
    /// current tempo. 0 for an empty project.
    pub fn project_duration(&self) -> f64 {
        let seconds_per_beat = 60.0 / self.globals.tempo();
        let mut end = 0.0f64;
        for track in &self.tracks {
            for placement in &track.clips {
                if let Ok(stored) = self.clips.get(placement.clip_id) {
                    end = end.max(placement.start_time + stored.buffer.duration_secs());
                }
            }
            for clip in &track.midi_clips {
                if let Some(entry) = self.midi_clips.get(clip) {
                    end = end.max((entry.start_beat + entry.data.duration) * seconds_per_beat);
                }
            }
        }
        end
    }

    pub fn clip_name(&self, clip: ClipId) -> Result<&str> {
        if let Some(entry) = self.midi_clips.get(&clip) {
            return Ok(&entry.name);
        }
        Ok(&self.clips.get(clip)?.name)
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    fn effect_entry(&self, id: EffectId) -> Result<&EffectEntry> {
        self.effects.get(&id).ok_or_else(|| no_effect(id))
    }

    fn effect_entry_mut(&mut self, id: EffectId) -> Result<&mut EffectEntry> {
        self.effects.get_mut(&id).ok_or_else(|| no_effect(id))
    }

    fn build_effect(&self, slot: &EffectSlot) -> Option<Owned<EffectSlotRuntime>> {
        let processor = create_effect(
            slot,
            self.config.sample_rate as f32,
            self.globals.tempo(),
        )?;
        let runtime = EffectSlotRuntime::new(processor, slot, self.config.smoothing_frames());
        Some(Owned::new(&self.gc, runtime))
    }

    fn check_effect_capacity(&self, track: TrackId) -> Result<()> {
        let max = self.config.max_effects_per_track;
        if self.track(track)?.effects.len() >= max {
            return Err(EngineError::AllocationDenied(format!(
                "{} already has {} effects",
                track, max
            )));
        }
        Ok(())
    }

    fn insert_effect(&mut self, track: TrackId, slot: EffectSlot, processor: EffectProcessor) -> Result<()> {
        let runtime = EffectSlotRuntime::new(processor, &slot, self.config.smoothing_frames());
        let index = self.track(track)?.effects.len();
        self.send(EngineCommand::InsertEffect {
            track,
            index,
            slot: Owned::new(&self.gc, runtime),
        })?;
        self.track_mut(track)?.effects.push(slot.id);
        info!("Added {} ({}) to {}", slot.effect_type.name(), slot.id, track);
        self.effects.insert(slot.id, EffectEntry { track, slot });
        Ok(())
    }

    /// Append a built-in effect to a track's chain
    pub fn add_effect_to_track(&mut self, track: TrackId, effect_type: EffectType) -> Result<EffectId> {
        if effect_type == EffectType::HostedPlugin {
            return Err(EngineError::invalid_state(
                "hosted plugins are added with add_hosted_plugin",
            ));
        }
        self.check_effect_capacity(track)?;
        let id = self.ids.effect();
        let slot = EffectSlot::new(id, effect_type);
        let processor = create_effect(&slot, self.config.sample_rate as f32, self.globals.tempo())
            .ok_or_else(|| EngineError::invalid_state("effect has no built-in processor"))?;
        self.insert_effect(track, slot, processor)?;
        Ok(id)
    }

    /// Append an externally provided processor to a track's chain
    pub fn add_hosted_plugin(
        &mut self,
        track: TrackId,
        plugin: Box<dyn PluginProcessor>,
    ) -> Result<EffectId> {
        self.check_effect_capacity(track)?;
        let id = self.ids.effect();
        let hosted = HostedPlugin::new(plugin);
        let mut slot = EffectSlot::new(id, EffectType::HostedPlugin);
        slot.plugin_name = Some(hosted.name().to_string());
        slot.plugin_params = (0..hosted.param_count()).map(|i| hosted.param(i)).collect();
        self.insert_effect(track, slot, EffectProcessor::Hosted(hosted))?;
        Ok(id)
    }

    pub fn remove_effect(&mut self, effect: EffectId) -> Result<()> {
        let track = self.effect_entry(effect)?.track;
        self.send(EngineCommand::RemoveEffect { track, effect })?;
        self.track_mut(track)?.effects.retain(|e| *e != effect);
        self.effects.remove(&effect);
        debug!("Removed {} from {}", effect, track);
        Ok(())
    }

    /// Move an effect to `index` in its chain (clamped to the end)
    pub fn move_effect(&mut self, effect: EffectId, index: usize) -> Result<()> {
        let track = self.effect_entry(effect)?.track;
        self.send(EngineCommand::MoveEffect {
            track,
            effect,
            index,
        })?;
        let chain = &mut self.track_mut(track)?.effects;
        chain.retain(|e| *e != effect);
        let index = index.min(chain.len());
        chain.insert(index, effect);
        Ok(())
    }

    /// Set a parameter by name. Values are clamped to the parameter range.
    pub fn set_effect_parameter(&mut self, effect: EffectId, name: &str, value: f32) -> Result<()> {
        let entry = self.effect_entry(effect)?;
        let track = entry.track;
        let Some((key, min, max)) = entry.slot.resolve(name) else {
            return Err(EngineError::InvalidParameter {
                target: entry.slot.effect_type.name().to_string(),
                name: name.to_string(),
            });
        };
        if !value.is_finite() {
            return Err(EngineError::invalid_state(format!("{} must be a finite number", name)));
        }
        let value = value.clamp(min, max);
        self.send(EngineCommand::SetEffectParam {
            track,
            effect,
            key,
            value,
        })?;
        self.effect_entry_mut(effect)?.slot.set_param(key, value);
        Ok(())
    }

    pub fn set_effect_bypassed(&mut self, effect: EffectId, bypassed: bool) -> Result<()> {
        let track = self.effect_entry(effect)?.track;
        self.send(EngineCommand::SetEffectBypass {
            track,
            effect,
            bypassed,
        })?;
        self.effect_entry_mut(effect)?.slot.bypassed = bypassed;
        Ok(())
    }

    pub fn get_effect_info(&self, effect: EffectId) -> Result<EffectInfo> {
        let entry = self.effect_entry(effect)?;
        let slot = &entry.slot;
        let params = if slot.effect_type == EffectType::HostedPlugin {
            slot.plugin_params
                .iter()
                .enumerate()
                .map(|(i, value)| EffectParamInfo {
                    name: format!("param_{}", i),
                    value: *value,
                    min: 0.0,
                    max: 1.0,
                    display: format!("{:.2}", value),
                })
                .collect()
        } else {
            get_param_defs(slot.effect_type)
                .into_iter()
                .map(|def| {
                    let value = slot.get_param(def.id);
                    EffectParamInfo {
                        name: def.id.name().to_string(),
                        value,
                        min: def.min,
                        max: def.max,
                        display: def.format_value(value),
                    }
                })
                .collect()
        };
        Ok(EffectInfo {
            id: effect,
            track: entry.track,
            effect_type: slot.effect_type,
            bypassed: slot.bypassed,
            plugin_name: slot.plugin_name.clone(),
            params,
        })
    }

    /// Store an opaque state blob for a hosted plugin
    pub fn set_plugin_state(&mut self, effect: EffectId, state: Vec<u8>) -> Result<()> {
        let entry = self.effect_entry_mut(effect)?;
        if entry.slot.effect_type != EffectType::HostedPlugin {
            return Err(EngineError::invalid_state(format!(
                "{} is not a hosted plugin",
                effect
            )));
        }
        entry.slot.plugin_state = Some(state);
        Ok(())
    }

    pub fn plugin_state(&self, effect: EffectId) -> Result<Option<&[u8]>> {
        Ok(self.effect_entry(effect)?.slot.plugin_state.as_deref())
    }

    // ------------------------------------------------------------------
    // MIDI
    // ------------------------------------------------------------------

    fn midi_entry(&self, clip: ClipId) -> Result<&MidiClipEntry> {
        self.midi_clips.get(&clip).ok_or_else(|| no_clip(clip))
    }

    fn midi_entry_mut(&mut self, clip: ClipId) -> Result<&mut MidiClipEntry> {
        self.midi_clips.get_mut(&clip).ok_or_else(|| no_clip(clip))
    }

    fn placed_midi_clips(&self, track: &Track) -> Vec<PlacedMidiClip> {
        track
            .midi_clips
            .iter()
            .filter_map(|id| {
                let entry = self.midi_clips.get(id)?;
                Some(PlacedMidiClip {
                    clip_id: *id,
                    start_beat: entry.start_beat,
                    data: Arc::new(entry.data.clone()),
                })
            })
            .collect()
    }

    fn sync_midi_clips(&mut self, track: TrackId) -> Result<()> {
        let clips = self.placed_midi_clips(self.track(track)?);
        self.send(EngineCommand::SetMidiClips {
            track,
            clips: Owned::new(&self.gc, clips),
        })
    }

    /// Resend a clip's notes if it is on a track
    fn sync_midi_clip(&mut self, clip: ClipId) -> Result<()> {
        match self.midi_entry(clip)?.owner {
            Some(track) => self.sync_midi_clips(track),
            None => Ok(()),
        }
    }

    /// New empty clip, 4 beats long
    pub fn create_midi_clip(&mut self) -> ClipId {
        let id = self.ids.clip();
        self.midi_clips.insert(
            id,
            MidiClipEntry {
                name: format!("MIDI {}", id.raw()),
                data: MidiClipData::default(),
                owner: None,
                start_beat: 0.0,
            },
        );
        id
    }

    /// Add a note; times are in seconds at the current tempo
    pub fn add_note_to_clip(
        &mut self,
        clip: ClipId,
        pitch: u8,
        velocity: u8,
        start: f64,
        duration: f64,
    ) -> Result<()> {
        let note = MidiNote::new(
            pitch,
            velocity,
            self.seconds_to_beats(start),
            self.seconds_to_beats(duration),
        )?;
        let bpb = self.globals.beats_per_bar();
        self.midi_entry_mut(clip)?.data.add_note(note, bpb);
        self.sync_midi_clip(clip)
    }

    pub fn clear_midi_clip(&mut self, clip: ClipId) -> Result<()> {
        self.midi_entry_mut(clip)?.data.clear();
        self.sync_midi_clip(clip)
    }

    /// Clip length and loop length in beats
    pub fn set_midi_clip_length(&mut self, clip: ClipId, duration: f64, loop_length: f64) -> Result<()> {
        self.midi_entry_mut(clip)?
            .data
            .set_length(duration, loop_length)?;
        self.sync_midi_clip(clip)
    }

    pub fn midi_clip(&self, clip: ClipId) -> Result<&MidiClipData> {
        Ok(&self.midi_entry(clip)?.data)
    }

    fn place_midi_clip(&mut self, track: TrackId, clip: ClipId, start_beat: f64) -> Result<()> {
        check_finite(start_beat, "clip start")?;
        if let Some(owner) = self.midi_entry(clip)?.owner {
            if owner != track {
                return Err(EngineError::invalid_state(format!(
                    "{} is already on {}",
                    clip, owner
                )));
            }
        }
        let max = self.config.max_midi_clips_per_track;
        let t = self.track_mut(track)?;
        if t.track_type != TrackType::Midi {
            return Err(EngineError::invalid_state(format!(
                "MIDI clips cannot go on a {} track",
                t.track_type.name()
            )));
        }
        if !t.midi_clips.contains(&clip) {
            if t.midi_clips.len() >= max {
                return Err(EngineError::AllocationDenied(format!(
                    "{} already holds {} MIDI clips",
                    track, max
                )));
            }
            t.midi_clips.push(clip);
        }
        let entry = self.midi_entry_mut(clip)?;
        entry.owner = Some(track);
        entry.start_beat = start_beat.max(0.0);
        self.sync_midi_clips(track)
    }

    /// Place a MIDI clip on a MIDI track at `start` seconds
    pub fn add_midi_clip_to_track(&mut self, track: TrackId, clip: ClipId, start: f64) -> Result<()> {
        check_finite(start, "clip start")?;
        let start_beat = self.seconds_to_beats(start);
        self.place_midi_clip(track, clip, start_beat)
    }

    /// Armed MIDI track, else the first MIDI track
    fn note_target(&self) -> Result<TrackId> {
        let midi = || self.tracks.iter().filter(|t| t.track_type == TrackType::Midi);
        midi()
            .find(|t| t.is_armed())
            .or_else(|| midi().next())
            .map(|t| t.id)
            .ok_or_else(|| EngineError::invalid_state("there is no MIDI track to play"))
    }

    /// Frame relative to the take start when `track` is recording MIDI
    fn midi_record_frame(&self, track: TrackId) -> Option<u64> {
        let target = self.recording?;
        if target.midi_track != Some(track)
            || self.transport.state() != TransportState::Recording
            || self.transport_shared.recording_session() != target.session
        {
            return None;
        }
        Some(
            self.transport_shared
                .playhead_frames()
                .saturating_sub(target.start_frame),
        )
    }

    /// Play a note live. Velocity 0 is a note-off.
    pub fn send_note_on(&mut self, pitch: u8, velocity: u8) -> Result<()> {
        if pitch > 127 || velocity > 127 {
            return Err(EngineError::invalid_state("pitch and velocity must be 0..127"));
        }
        if velocity == 0 {
            return self.send_note_off(pitch);
        }
        self.pump();
        let track = self.note_target()?;
        self.send(EngineCommand::NoteOn {
            track,
            pitch,
            velocity,
        })?;
        if let Some(frame) = self.midi_record_frame(track) {
            self.midi_recorder.note_on(pitch, velocity, frame);
        }
        Ok(())
    }

    pub fn send_note_off(&mut self, pitch: u8) -> Result<()> {
        if pitch > 127 {
            return Err(EngineError::invalid_state("pitch must be 0..127"));
        }
        self.pump();
        let track = self.note_target()?;
        self.send(EngineCommand::NoteOff { track, pitch })?;
        if let Some(frame) = self.midi_record_frame(track) {
            self.midi_recorder.note_off(pitch, frame);
        }
        Ok(())
    }

    /// Play a note from a MIDI controller the same way as `send_note_on`
    pub fn play_input_note(&mut self, note: InputNote) -> Result<()> {
        match note {
            InputNote::On { pitch, velocity } => self.send_note_on(pitch, velocity),
            InputNote::Off { pitch } => self.send_note_off(pitch),
        }
    }

    /// Open a MIDI input port (first match on `port_match`, else the first
    /// port). Its notes are played on every `pump`. Returns the port name.
    pub fn connect_midi_input(&mut self, port_match: Option<&str>) -> Result<String> {
        self.disconnect_midi_input();
        let device = MidiInputDevice::connect(port_match)?;
        let name = device.name().to_string();
        self.events.info(format!("MIDI input: {}", name));
        self.midi_input = Some(device);
        Ok(name)
    }

    pub fn disconnect_midi_input(&mut self) {
        if let Some(device) = self.midi_input.take() {
            info!("MIDI input '{}' closed", device.name());
        }
    }

    pub fn midi_input_name(&self) -> Option<&str> {
        self.midi_input.as_ref().map(MidiInputDevice::name)
    }

    /// Set a synth parameter on a MIDI track by name
    pub fn set_synth_parameter(&mut self, track: TrackId, name: &str, value: f32) -> Result<()> {
        let param = SynthParam::from_name(name).ok_or_else(|| EngineError::InvalidParameter {
            target: "synth".to_string(),
            name: name.to_string(),
        })?;
        if self.track(track)?.track_type != TrackType::Midi {
            return Err(EngineError::invalid_state(format!("{} has no synth", track)));
        }
        if !value.is_finite() {
            return Err(EngineError::invalid_state(format!("{} must be a finite number", name)));
        }
        let value = param.clamp(value);
        self.send(EngineCommand::SetSynthParam {
            track,
            param,
            value,
        })?;
        self.synth_settings
            .entry(track)
            .or_default()
            .apply(param, value);
        Ok(())
    }

    pub fn synth_settings(&self, track: TrackId) -> Option<&SynthSettings> {
        self.synth_settings.get(&track)
    }

    /// Quantize grid for recorded MIDI, as a 1/N note (0 = off)
    pub fn set_midi_quantize(&mut self, division: u32) -> Result<()> {
        if !QUANTIZE_CHOICES.contains(&division) {
            return Err(EngineError::invalid_state(format!(
                "unsupported quantize grid 1/{}",
                division
            )));
        }
        self.midi_recorder.set_quantize(division);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tempo and metronome
    // ------------------------------------------------------------------

    /// Tempo in BPM, clamped to 20..300
    pub fn set_tempo(&mut self, bpm: f64) -> Result<()> {
        check_finite(bpm, "tempo")?;
        let bpm = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
        self.globals.tempo_bpm.store(bpm);
        debug!("Tempo set to {:.2}", bpm);
        Ok(())
    }

    pub fn get_tempo(&self) -> f64 {
        self.globals.tempo()
    }

    pub fn set_metronome_enabled(&mut self, enabled: bool) {
        self.globals
            .metronome_enabled
            .store(enabled, Ordering::Release);
    }

    pub fn metronome_enabled(&self) -> bool {
        self.globals.metronome_enabled()
    }

    pub fn set_count_in_bars(&mut self, bars: u32) -> Result<()> {
        if !COUNT_IN_CHOICES.contains(&bars) {
            return Err(EngineError::invalid_state(format!(
                "count-in must be 0, 1, 2 or 4 bars (got {})",
                bars
            )));
        }
        self.globals.count_in_bars.store(bars, Ordering::Release);
        Ok(())
    }

    pub fn count_in_bars(&self) -> u32 {
        self.globals.count_in_bars()
    }

    pub fn set_time_signature(&mut self, beats_per_bar: u32, beat_unit: u32) -> Result<()> {
        if !(1..=16).contains(&beats_per_bar) {
            return Err(EngineError::invalid_state(format!(
                "{} beats per bar is out of range",
                beats_per_bar
            )));
        }
        if !matches!(beat_unit, 1 | 2 | 4 | 8 | 16) {
            return Err(EngineError::invalid_state(format!(
                "beat unit {} is not a power of two",
                beat_unit
            )));
        }
        self.globals
            .beats_per_bar
            .store(beats_per_bar, Ordering::Release);
        self.globals.beat_unit.store(beat_unit, Ordering::Release);
        Ok(())
    }

    /// (beats per bar, beat unit)
    pub fn time_signature(&self) -> (u32, u32) {
        (
            self.globals.beats_per_bar(),
            self.globals.beat_unit.load(Ordering::Acquire),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::hosted::tests::GainPlugin;

    fn engine() -> (Engine, AudioGraph) {
        Engine::new(EngineConfig {
            max_block_frames: 256,
            ..EngineConfig::default()
        })
    }

    fn render(graph: &mut AudioGraph, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        for chunk in out.chunks_mut(512) {
            graph.process(None, chunk);
        }
        out
    }

    #[test]
    fn test_master_exists_and_is_unique() {
        let (mut engine, _graph) = engine();
        let master = engine.master_track_id();
        assert_eq!(engine.track_ids(), vec![master]);
        assert!(matches!(
            engine.create_track(TrackType::Master),
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            engine.delete_track(master),
            Err(EngineError::InvalidState(_))
        ));
        assert_eq!(engine.track_count(), 1);
    }

    #[test]
    fn test_track_names_count_per_type() {
        let (mut engine, _graph) = engine();
        engine.create_track(TrackType::Audio).unwrap();
        let second = engine.create_track(TrackType::Audio).unwrap();
        let midi = engine.create_track(TrackType::Midi).unwrap();
        assert_eq!(engine.get_track_info(second).unwrap().name, "Audio 2");
        assert_eq!(engine.get_track_info(midi).unwrap().name, "MIDI 1");
    }

    #[test]
    fn test_volume_clamps_and_rejects_nan() {
        let (mut engine, _graph) = engine();
        let track = engine.create_track(TrackType::Audio).unwrap();
        engine.set_track_volume(track, 12.0).unwrap();
        assert_eq!(engine.get_track_info(track).unwrap().volume_db, 6.0);
        assert!(engine.set_track_volume(track, f32::NAN).is_err());
        engine.set_track_pan(track, -3.0).unwrap();
        assert_eq!(engine.get_track_info(track).unwrap().pan, -1.0);
    }

    #[test]
    fn test_unknown_handles() {
        let (mut engine, _graph) = engine();
        assert!(matches!(
            engine.set_track_mute(TrackId(999), true),
            Err(EngineError::InvalidHandle { kind: "track", .. })
        ));
        assert!(matches!(
            engine.remove_effect(EffectId(999)),
            Err(EngineError::InvalidHandle { kind: "effect", .. })
        ));
        assert!(matches!(
            engine.get_clip_duration(ClipId(999)),
            Err(EngineError::InvalidHandle { kind: "clip", .. })
        ));
    }

    #[test]
    fn test_effect_parameter_validation() {
        let (mut engine, _graph) = engine();
        let track = engine.create_track(TrackType::Audio).unwrap();
        let delay = engine.add_effect_to_track(track, EffectType::Delay).unwrap();

        assert!(matches!(
            engine.set_effect_parameter(delay, "warp", 1.0),
            Err(EngineError::InvalidParameter { .. })
        ));
        engine.set_effect_parameter(delay, "feedback", 7.0).unwrap();
        let info = engine.get_effect_info(delay).unwrap();
        let feedback = info.params.iter().find(|p| p.name == "feedback").unwrap();
        assert_eq!(feedback.value, 1.0);
    }

    #[test]
    fn test_move_effect_reorders_chain() {
        let (mut engine, _graph) = engine();
        let track = engine.create_track(TrackType::Audio).unwrap();
        let eq = engine.add_effect_to_track(track, EffectType::Eq).unwrap();
        let comp = engine.add_effect_to_track(track, EffectType::Compressor).unwrap();
        engine.move_effect(comp, 0).unwrap();
        assert_eq!(engine.get_track_info(track).unwrap().effects, vec![comp, eq]);
    }

    #[test]
    fn test_effect_capacity_is_denied() {
        let (mut engine, _graph) = Engine::new(EngineConfig {
            max_effects_per_track: 2,
            ..EngineConfig::default()
        });
        let track = engine.create_track(TrackType::Audio).unwrap();
        engine.add_effect_to_track(track, EffectType::Eq).unwrap();
        engine.add_effect_to_track(track, EffectType::Reverb).unwrap();
        assert!(matches!(
            engine.add_effect_to_track(track, EffectType::Chorus),
            Err(EngineError::AllocationDenied(_))
        ));
    }

    #[test]
    fn test_hosted_plugin_params_and_state() {
        let (mut engine, mut graph) = engine();
        let track = engine.create_track(TrackType::Audio).unwrap();
        let plugin = engine
            .add_hosted_plugin(track, Box::new(GainPlugin { gain: 0.5 }))
            .unwrap();
        engine.set_effect_parameter(plugin, "param_0", 2.0).unwrap();
        assert!(engine.set_effect_parameter(plugin, "param_1", 0.5).is_err());

        engine.set_plugin_state(plugin, vec![1, 2, 3]).unwrap();
        assert_eq!(engine.plugin_state(plugin).unwrap(), Some(&[1u8, 2, 3][..]));

        let info = engine.get_effect_info(plugin).unwrap();
        assert_eq!(info.params[0].value, 1.0);
        render(&mut graph, 256);
    }

    #[test]
    fn test_clip_cannot_sit_on_two_tracks() {
        let (mut engine, _graph) = engine();
        let a = engine.create_track(TrackType::Audio).unwrap();
        let b = engine.create_track(TrackType::Audio).unwrap();
        let midi = engine.create_midi_clip();
        let synth_track = engine.create_track(TrackType::Midi).unwrap();
        engine.add_midi_clip_to_track(synth_track, midi, 0.0).unwrap();
        assert!(engine.add_midi_clip_to_track(a, midi, 0.0).is_err());

        let clip = engine.ids.clip();
        engine.clips.insert(
            clip,
            StoredClip {
                buffer: Arc::new(crate::clip::AudioBuffer::new(vec![0.1; 480], 1, 48_000)),
                name: "test".into(),
                source: None,
                owner: None,
            },
        );
        engine.add_clip_to_track(a, clip, 0.5).unwrap();
        assert!(matches!(
            engine.add_clip_to_track(b, clip, 0.0),
            Err(EngineError::InvalidState(_))
        ));
        engine.set_clip_start_time(a, clip, 1.0).unwrap();
        assert_eq!(engine.get_track_info(a).unwrap().clips, vec![clip]);
        assert!(matches!(
            engine.set_clip_start_time(b, clip, 2.0),
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(
            engine.set_clip_start_time(TrackId(9_999), clip, 2.0),
            Err(EngineError::InvalidHandle { kind: "track", .. })
        ));
        engine.delete_clip(clip).unwrap();
        assert!(engine.get_track_info(a).unwrap().clips.is_empty());
    }

    #[test]
    fn test_note_needs_a_midi_track() {
        let (mut engine, _graph) = engine();
        assert!(engine.send_note_on(60, 100).is_err());
        engine.create_track(TrackType::Midi).unwrap();
        engine.send_note_on(60, 100).unwrap();
        engine.send_note_on(60, 0).unwrap();
    }

    #[test]
    fn test_controller_notes_follow_the_live_note_path() {
        let (mut engine, _graph) = engine();
        let on = InputNote::On { pitch: 64, velocity: 90 };
        assert!(engine.play_input_note(on).is_err());
        engine.create_track(TrackType::Midi).unwrap();
        engine.play_input_note(on).unwrap();
        engine.play_input_note(InputNote::Off { pitch: 64 }).unwrap();
        assert!(engine.midi_input_name().is_none());
    }

    #[test]
    fn test_project_duration_tracks_last_clip_and_tempo() {
        let (mut engine, _graph) = engine();
        assert_eq!(engine.project_duration(), 0.0);
        let track = engine.create_track(TrackType::Midi).unwrap();
        let clip = engine.create_midi_clip();
        engine.add_midi_clip_to_track(track, clip, 1.0).unwrap();
        // Two beats in, four beats long, at 120 BPM
        assert!((engine.project_duration() - 3.0).abs() < 1e-9);
        engine.set_tempo(60.0).unwrap();
        assert!((engine.project_duration() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_synth_parameter_names() {
        let (mut engine, _graph) = engine();
        let midi = engine.create_track(TrackType::Midi).unwrap();
        let audio = engine.create_track(TrackType::Audio).unwrap();
        engine.set_synth_parameter(midi, "filter_cutoff", 99_999.0).unwrap();
        assert_eq!(engine.synth_settings(midi).unwrap().cutoff, 20_000.0);
        assert!(matches!(
            engine.set_synth_parameter(midi, "wobble", 1.0),
            Err(EngineError::InvalidParameter { .. })
        ));
        assert!(engine.set_synth_parameter(audio, "volume", 0.5).is_err());
    }

    #[test]
    fn test_tempo_and_meter_limits() {
        let (mut engine, _graph) = engine();
        engine.set_tempo(1000.0).unwrap();
        assert_eq!(engine.get_tempo(), 300.0);
        engine.set_tempo(1.0).unwrap();
        assert_eq!(engine.get_tempo(), 20.0);
        assert!(engine.set_tempo(f64::NAN).is_err());
        assert!(engine.set_count_in_bars(3).is_err());
        engine.set_count_in_bars(4).unwrap();
        engine.set_time_signature(3, 4).unwrap();
        assert_eq!(engine.time_signature(), (3, 4));
        assert!(engine.set_time_signature(3, 5).is_err());
    }

    #[test]
    fn test_transport_round_trip_through_graph() {
        let (mut engine, mut graph) = engine();
        assert!(engine.pause().is_err());
        engine.play().unwrap();
        render(&mut graph, 4800);
        assert!((engine.get_playhead() - 0.1).abs() < 1e-9);
        engine.pause().unwrap();
        render(&mut graph, 4800);
        assert!((engine.get_playhead() - 0.1).abs() < 1e-9);
        engine.stop().unwrap();
        assert_eq!(engine.get_playhead(), 0.0);
        render(&mut graph, 256);
        assert_eq!(engine.get_state(), TransportState::Stopped);
    }

    #[test]
    fn test_full_queue_reports_queue_full() {
        let (mut engine, _graph) = Engine::new(EngineConfig {
            command_queue_capacity: 2,
            ..EngineConfig::default()
        });
        engine.create_track(TrackType::Audio).unwrap();
        engine.create_track(TrackType::Audio).unwrap();
        assert!(matches!(
            engine.create_track(TrackType::Audio),
            Err(EngineError::QueueFull)
        ));
        assert_eq!(engine.track_count(), 3);
    }

    #[test]
    fn test_dropped_graph_reports_disconnected() {
        let (mut engine, graph) = engine();
        drop(graph);
        assert!(matches!(
            engine.create_track(TrackType::Audio),
            Err(EngineError::Disconnected)
        ));
    }

    #[test]
    fn test_sends_must_target_return_tracks() {
        let (mut engine, _graph) = engine();
        let a = engine.create_track(TrackType::Audio).unwrap();
        let b = engine.create_track(TrackType::Audio).unwrap();
        let ret = engine.create_track(TrackType::Return).unwrap();
        assert!(engine.add_send(a, b, 0.0).is_err());
        engine.add_send(a, ret, -6.0).unwrap();
        assert_eq!(engine.sends_from(a).len(), 1);
        assert!(engine.remove_send(a, ret));
    }
}

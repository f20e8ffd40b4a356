//! Project snapshot and restore for [`Engine`]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use super::{Engine, EffectEntry, EngineCommand, MidiClipEntry};
use crate::clip::{AudioBuffer, ClipStore, StoredClip};
use crate::effects::EffectType;
use crate::error::{EngineError, Result};
use crate::ids::{ClipId, TrackId};
use crate::mixer::{Track, TrackType};
use crate::project::{
    AudioClipSnapshot, MidiClipSnapshot, ProjectMeta, ProjectSnapshot, SendSnapshot,
    TrackSnapshot, PROJECT_VERSION,
};
use crate::synth::{SynthParam, SynthSettings};

fn synth_to_map(settings: &SynthSettings) -> BTreeMap<String, f32> {
    SynthParam::all()
        .map(|p| (p.name(), settings.get(p)))
        .collect()
}

fn synth_from_map(map: &BTreeMap<String, f32>) -> SynthSettings {
    let mut settings = SynthSettings::default();
    for (name, value) in map {
        match SynthParam::from_name(name) {
            Some(param) => settings.apply(param, param.clamp(*value)),
            None => warn!("Ignoring unknown synth parameter '{}'", name),
        }
    }
    settings
}

impl Engine {
    pub fn project_name(&self) -> &str {
        &self.meta.name
    }

    pub fn set_project_name(&mut self, name: &str) {
        self.meta.name = name.to_string();
    }

    pub(crate) fn clip_buffer(&self, clip: ClipId) -> Result<Arc<AudioBuffer>> {
        Ok(self.clips.get(clip)?.buffer.clone())
    }

    pub(crate) fn set_clip_source(&mut self, clip: ClipId, path: PathBuf) -> Result<()> {
        self.clips.get_mut(clip)?.source = Some(path);
        Ok(())
    }

    /// Capture the whole control-side model as a serializable document.
    /// Audio clip paths point at their current source files.
    pub fn snapshot(&self) -> ProjectSnapshot {
        let tracks = self
            .tracks
            .iter()
            .map(|t| TrackSnapshot {
                id: t.id,
                name: t.name.clone(),
                track_type: t.track_type,
                volume_db: Some(t.volume_db()).filter(|db| db.is_finite()),
                pan: t.pan(),
                mute: t.is_muted(),
                solo: t.is_soloed(),
                armed: t.is_armed(),
                effects: t
                    .effects
                    .iter()
                    .filter_map(|id| self.effects.get(id).map(|e| e.slot.clone()))
                    .collect(),
                clips: t.clips.clone(),
                midi_clips: t.midi_clips.clone(),
                synth: self.synth_settings.get(&t.id).map(synth_to_map),
            })
            .collect();

        let audio_clips = self
            .clips
            .iter()
            .map(|(id, clip)| AudioClipSnapshot {
                id,
                name: clip.name.clone(),
                file: clip.source.clone(),
            })
            .collect();

        let mut midi_clips: Vec<MidiClipSnapshot> = self
            .midi_clips
            .iter()
            .map(|(id, entry)| MidiClipSnapshot {
                id: *id,
                name: entry.name.clone(),
                start_beat: entry.start_beat,
                data: entry.data.clone(),
            })
            .collect();
        midi_clips.sort_by_key(|c| c.id);

        let sends = self
            .tracks
            .iter()
            .flat_map(|t| {
                self.sends.sends_from(t.id).iter().map(move |s| SendSnapshot {
                    from: t.id,
                    target: s.target,
                    level_db: s.level_db,
                })
            })
            .collect();

        let (beats_per_bar, beat_unit) = self.time_signature();
        ProjectSnapshot {
            id: self.meta.id,
            version: PROJECT_VERSION,
            name: self.meta.name.clone(),
            created_at: self.meta.created_at,
            modified_at: Utc::now(),
            tempo: self.get_tempo(),
            beats_per_bar,
            beat_unit,
            metronome_enabled: self.metronome_enabled(),
            count_in_bars: self.count_in_bars(),
            midi_quantize: self.midi_recorder.quantize(),
            tracks,
            audio_clips,
            midi_clips,
            sends,
        }
    }

    /// Rebuild a snapshot into this engine, which must be freshly created.
    /// Relative clip paths resolve against `base_dir`. Missing audio files
    /// and hosted plugins are skipped with a warning.
    pub fn restore(&mut self, snapshot: &ProjectSnapshot, base_dir: &Path) -> Result<()> {
        if self.tracks.len() > 1 || !self.clips.is_empty() || !self.midi_clips.is_empty() {
            return Err(EngineError::invalid_state(
                "a project can only be restored into an empty engine",
            ));
        }

        self.meta = ProjectMeta {
            id: snapshot.id,
            name: snapshot.name.clone(),
            created_at: snapshot.created_at,
        };
        self.set_tempo(snapshot.tempo)?;
        self.set_time_signature(snapshot.beats_per_bar, snapshot.beat_unit)?;
        self.set_metronome_enabled(snapshot.metronome_enabled);
        self.set_count_in_bars(snapshot.count_in_bars)?;
        self.set_midi_quantize(snapshot.midi_quantize)?;

        let max_id = snapshot
            .tracks
            .iter()
            .map(|t| t.id.raw())
            .chain(snapshot.tracks.iter().flat_map(|t| t.effects.iter().map(|e| e.id.raw())))
            .chain(snapshot.audio_clips.iter().map(|c| c.id.raw()))
            .chain(snapshot.midi_clips.iter().map(|c| c.id.raw()))
            .max()
            .unwrap_or(0);
        self.ids.reserve_past(max_id);

        for clip in &snapshot.audio_clips {
            self.restore_audio_clip(clip, base_dir);
        }
        for clip in &snapshot.midi_clips {
            self.midi_clips.insert(
                clip.id,
                MidiClipEntry {
                    name: clip.name.clone(),
                    data: clip.data.clone(),
                    owner: None,
                    start_beat: clip.start_beat,
                },
            );
        }

        // Snapshot ids of the saved Master map onto this engine's Master
        let saved_master = snapshot
            .tracks
            .iter()
            .find(|t| t.track_type == TrackType::Master)
            .map(|t| t.id);
        let master = self.master;
        let remap = |id: TrackId| {
            if Some(id) == saved_master {
                master
            } else {
                id
            }
        };

        for saved in &snapshot.tracks {
            if saved.track_type == TrackType::Master {
                self.restore_master(saved)?;
                continue;
            }
            let mut track = Track::new(saved.id, &saved.name, saved.track_type);
            track.set_volume_db(saved.volume_db.unwrap_or(f32::NEG_INFINITY));
            track.set_pan(saved.pan);
            track.set_mute(saved.mute);
            track.set_solo(saved.solo);
            track.set_armed(saved.armed);
            self.restore_effects(&mut track, &saved.effects);

            if saved.track_type == TrackType::Audio {
                for placement in &saved.clips {
                    if let Ok(stored) = self.clips.get_mut(placement.clip_id) {
                        stored.owner = Some(track.id);
                        track.insert_clip(*placement);
                    }
                }
            }
            if saved.track_type == TrackType::Midi {
                for clip in &saved.midi_clips {
                    if let Some(entry) = self.midi_clips.get_mut(clip) {
                        entry.owner = Some(track.id);
                        track.midi_clips.push(*clip);
                    }
                }
                let settings = saved
                    .synth
                    .as_ref()
                    .map(synth_from_map)
                    .unwrap_or_default();
                self.synth_settings.insert(track.id, settings);
            }
            self.spawn_track(track)?;
        }

        for send in &snapshot.sends {
            if let Err(e) = self.add_send(remap(send.from), remap(send.target), send.level_db) {
                warn!("Dropping send {} -> {}: {}", send.from, send.target, e);
            }
        }

        info!(
            "Restored '{}': {} tracks, {} audio clips, {} MIDI clips",
            snapshot.name,
            self.tracks.len(),
            self.clips.len(),
            self.midi_clips.len()
        );
        Ok(())
    }

    fn restore_audio_clip(&mut self, clip: &AudioClipSnapshot, base_dir: &Path) {
        let Some(file) = clip.file.as_ref() else {
            warn!("{} '{}' has no audio file", clip.id, clip.name);
            return;
        };
        let path = if file.is_absolute() {
            file.clone()
        } else {
            base_dir.join(file)
        };
        match ClipStore::load_file(&path, self.config.sample_rate) {
            Ok(buffer) => self.clips.insert(
                clip.id,
                StoredClip {
                    buffer: Arc::new(buffer),
                    name: clip.name.clone(),
                    source: Some(path),
                    owner: None,
                },
            ),
            Err(e) => {
                warn!("Skipping {} '{}': {}", clip.id, clip.name, e);
                self.event_log_mut()
                    .warn(format!("Missing audio for '{}': {}", clip.name, e));
            }
        }
    }

    /// Add effect slots to a track that has not reached the graph yet
    fn restore_effects(&mut self, track: &mut Track, slots: &[crate::effects::EffectSlot]) {
        for slot in slots.iter().take(self.config.max_effects_per_track) {
            if slot.effect_type == EffectType::HostedPlugin {
                let name = slot.plugin_name.as_deref().unwrap_or("plugin");
                warn!("Hosted plugin '{}' on {} cannot be restored", name, track.id);
                self.event_log_mut()
                    .warn(format!("Plugin '{}' was not restored", name));
                continue;
            }
            track.effects.push(slot.id);
            self.effects.insert(
                slot.id,
                EffectEntry {
                    track: track.id,
                    slot: slot.clone(),
                },
            );
        }
    }

    fn restore_master(&mut self, saved: &TrackSnapshot) -> Result<()> {
        let master = self.master;
        {
            let track = self.track_mut(master)?;
            track.name = saved.name.clone();
            track.set_volume_db(saved.volume_db.unwrap_or(f32::NEG_INFINITY));
            track.set_pan(saved.pan);
            track.set_mute(saved.mute);
        }

        let mut staging = Track::new(master, &saved.name, TrackType::Master);
        self.restore_effects(&mut staging, &saved.effects);
        for (index, id) in staging.effects.iter().enumerate() {
            let Some(runtime) = self.effects.get(id).and_then(|e| self.build_effect(&e.slot))
            else {
                continue;
            };
            self.send(EngineCommand::InsertEffect {
                track: master,
                index,
                slot: runtime,
            })?;
            self.track_mut(master)?.effects.push(*id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::effects::EffectType;

    #[test]
    fn test_snapshot_reflects_model() {
        let (mut engine, _graph) = Engine::new(EngineConfig::default());
        let audio = engine.create_track(TrackType::Audio).unwrap();
        let ret = engine.create_track(TrackType::Return).unwrap();
        engine.set_track_volume(audio, f32::NEG_INFINITY).unwrap();
        engine.add_effect_to_track(audio, EffectType::Reverb).unwrap();
        engine.add_send(audio, ret, -12.0).unwrap();
        engine.set_tempo(90.0).unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.tempo, 90.0);
        assert_eq!(snapshot.tracks.len(), 3);
        assert_eq!(snapshot.tracks[0].track_type, TrackType::Master);
        assert_eq!(snapshot.tracks[1].volume_db, None);
        assert_eq!(snapshot.tracks[1].effects.len(), 1);
        assert_eq!(snapshot.sends.len(), 1);
        assert_eq!(snapshot.sends[0].target, ret);
    }

    #[test]
    fn test_restore_rebuilds_tracks_and_ids() {
        let (mut engine, _graph) = Engine::new(EngineConfig::default());
        let midi = engine.create_track(TrackType::Midi).unwrap();
        engine.set_synth_parameter(midi, "filter_cutoff", 1234.0).unwrap();
        let clip = engine.create_midi_clip();
        engine.add_note_to_clip(clip, 60, 100, 0.0, 0.5).unwrap();
        engine.add_midi_clip_to_track(midi, clip, 2.0).unwrap();
        engine.add_effect_to_track(midi, EffectType::Chorus).unwrap();
        let snapshot = engine.snapshot();

        let dir = tempfile::tempdir().unwrap();
        let (mut restored, _graph) = Engine::new(EngineConfig::default());
        restored.restore(&snapshot, dir.path()).unwrap();

        let info = restored.get_track_info(midi).unwrap();
        assert_eq!(info.name, "MIDI 1");
        assert_eq!(info.effects.len(), 1);
        assert_eq!(restored.synth_settings(midi).unwrap().cutoff, 1234.0);
        assert_eq!(restored.midi_clip(clip).unwrap().notes.len(), 1);

        // New ids never collide with restored ones
        let next = restored.create_track(TrackType::Audio).unwrap();
        assert!(next.raw() > clip.raw());
    }

    #[test]
    fn test_restore_requires_empty_engine() {
        let (mut engine, _graph) = Engine::new(EngineConfig::default());
        let snapshot = engine.snapshot();
        engine.create_track(TrackType::Audio).unwrap();
        assert!(engine.restore(&snapshot, Path::new(".")).is_err());
    }

    #[test]
    fn test_missing_audio_is_skipped() {
        let (mut engine, _graph) = Engine::new(EngineConfig::default());
        let mut snapshot = engine.snapshot();
        snapshot.audio_clips.push(AudioClipSnapshot {
            id: ClipId(40),
            name: "gone".into(),
            file: Some(PathBuf::from("audio/040-gone.wav")),
        });
        let dir = tempfile::tempdir().unwrap();
        engine.restore(&snapshot, dir.path()).unwrap();
        assert!(engine.get_clip_duration(ClipId(40)).is_err());
        assert_eq!(engine.event_log().len(), 1);
    }
}

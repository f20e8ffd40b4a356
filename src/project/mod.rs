//! Project persistence - save and load project folders
//!
//! Project format:
//! - `project.json` at project root (a [`ProjectSnapshot`])
//! - `audio/` directory holding every audio clip as `NNN-name.ext`, where
//!   `NNN` is the clip id. Imported files are copied; recorded takes are
//!   written as 32-bit float WAV.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::offline::{write_wav, WavFormat};
use crate::config::EngineConfig;
use crate::effects::EffectSlot;
use crate::engine::{AudioGraph, Engine};
use crate::error::{EngineError, Result};
use crate::ids::{ClipId, TrackId};
use crate::midi::MidiClipData;
use crate::mixer::{ClipPlacement, TrackType};

/// Current project file version
pub const PROJECT_VERSION: u32 = 1;

/// Project file name
pub const PROJECT_FILE_NAME: &str = "project.json";

/// Audio directory inside a project folder
pub const AUDIO_DIR: &str = "audio";

/// Identity of a project, kept by the engine between saves
#[derive(Debug, Clone)]
pub struct ProjectMeta {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl ProjectMeta {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Serializable project file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: Uuid,
    pub version: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub tempo: f64,
    #[serde(default = "default_beats_per_bar")]
    pub beats_per_bar: u32,
    #[serde(default = "default_beat_unit")]
    pub beat_unit: u32,
    #[serde(default = "default_true")]
    pub metronome_enabled: bool,
    #[serde(default = "default_count_in")]
    pub count_in_bars: u32,
    /// MIDI record quantize grid (1/N note, 0 = off)
    #[serde(default)]
    pub midi_quantize: u32,
    /// Creation order, Master first
    pub tracks: Vec<TrackSnapshot>,
    #[serde(default)]
    pub audio_clips: Vec<AudioClipSnapshot>,
    #[serde(default)]
    pub midi_clips: Vec<MidiClipSnapshot>,
    #[serde(default)]
    pub sends: Vec<SendSnapshot>,
}

fn default_beats_per_bar() -> u32 {
    4
}

fn default_beat_unit() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_count_in() -> u32 {
    2
}

/// Serializable track data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub name: String,
    pub track_type: TrackType,
    /// None means silence (negative infinity dB)
    pub volume_db: Option<f32>,
    pub pan: f32,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub armed: bool,
    /// Effect chain in processing order
    #[serde(default)]
    pub effects: Vec<EffectSlot>,
    #[serde(default)]
    pub clips: Vec<ClipPlacement>,
    #[serde(default)]
    pub midi_clips: Vec<ClipId>,
    /// Synth parameters by name (MIDI tracks only)
    #[serde(default)]
    pub synth: Option<BTreeMap<String, f32>>,
}

/// Serializable audio clip reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioClipSnapshot {
    pub id: ClipId,
    pub name: String,
    /// Audio file, relative to the project folder once saved
    pub file: Option<PathBuf>,
}

/// Serializable MIDI clip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidiClipSnapshot {
    pub id: ClipId,
    pub name: String,
    /// Timeline position in beats
    pub start_beat: f64,
    pub data: MidiClipData,
}

/// Serializable send
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SendSnapshot {
    pub from: TrackId,
    pub target: TrackId,
    pub level_db: f32,
}

/// Base64 encoding for opaque plugin state blobs
pub(crate) mod base64_blob {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blob: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match blob {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Check if a directory contains a project
pub fn is_valid_project(path: &Path) -> bool {
    path.join(PROJECT_FILE_NAME).exists()
}

/// Keep file names portable
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "clip".to_string()
    } else {
        cleaned
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Save the engine's project to `path` (atomic write of `project.json`)
pub fn save_project(engine: &mut Engine, path: &Path) -> Result<ProjectSnapshot> {
    engine.flush_recordings();
    fs::create_dir_all(path)?;
    let audio_dir = path.join(AUDIO_DIR);
    fs::create_dir_all(&audio_dir)?;

    let mut snapshot = engine.snapshot();
    for clip in &mut snapshot.audio_clips {
        let source = clip.file.as_deref().filter(|p| p.is_file());
        let ext = source
            .and_then(|p| p.extension())
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "wav".to_string());
        let file_name = format!("{:03}-{}.{}", clip.id.raw(), sanitize(&clip.name), ext);
        let target = audio_dir.join(&file_name);

        match source {
            Some(src) if same_file(src, &target) => {}
            Some(src) => {
                fs::copy(src, &target)?;
                debug!("Copied {} to {}", src.display(), target.display());
            }
            None => {
                let buffer = engine.clip_buffer(clip.id)?;
                write_wav(&target, &buffer, WavFormat::Float32)?;
                debug!("Wrote {} to {}", clip.id, target.display());
            }
        }
        engine.set_clip_source(clip.id, target)?;
        clip.file = Some(PathBuf::from(AUDIO_DIR).join(file_name));
    }

    let project_file = path.join(PROJECT_FILE_NAME);
    let temp_file = path.join(format!(".{}.tmp", PROJECT_FILE_NAME));
    let json = serde_json::to_string_pretty(&snapshot)?;
    fs::write(&temp_file, &json)?;
    fs::rename(&temp_file, &project_file)?;

    info!(
        "Saved project '{}' to {} ({} tracks, {} audio clips)",
        snapshot.name,
        path.display(),
        snapshot.tracks.len(),
        snapshot.audio_clips.len()
    );
    Ok(snapshot)
}

/// Read `project.json` without building an engine
pub fn read_snapshot(path: &Path) -> Result<ProjectSnapshot> {
    let project_file = path.join(PROJECT_FILE_NAME);
    if !project_file.exists() {
        return Err(EngineError::invalid_state(format!(
            "no project found at {}",
            path.display()
        )));
    }
    let json = fs::read_to_string(&project_file)?;
    let snapshot: ProjectSnapshot = serde_json::from_str(&json)?;
    if snapshot.version > PROJECT_VERSION {
        return Err(EngineError::invalid_state(format!(
            "project version {} is newer than supported version {}",
            snapshot.version, PROJECT_VERSION
        )));
    }
    Ok(snapshot)
}

/// Load a project folder into a fresh engine
pub fn load_project(path: &Path, config: EngineConfig) -> Result<(Engine, AudioGraph)> {
    let snapshot = read_snapshot(path)?;
    let (mut engine, graph) = Engine::new(config);
    engine.restore(&snapshot, path)?;
    info!("Loaded project '{}' from {}", snapshot.name, path.display());
    Ok((engine, graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectParamId, EffectType};
    use crate::ids::EffectId;

    #[test]
    fn test_sanitize_file_names() {
        assert_eq!(sanitize("Kick 01.wav"), "Kick_01_wav");
        assert_eq!(sanitize(""), "clip");
        assert_eq!(sanitize("take-3"), "take-3");
    }

    #[test]
    fn test_plugin_state_is_base64_in_json() {
        let mut slot = EffectSlot::new(EffectId(4), EffectType::HostedPlugin);
        slot.plugin_state = Some(vec![0, 1, 2, 250]);
        let json = serde_json::to_string(&slot).unwrap();
        assert!(json.contains("\"AAEC+g==\""));

        let back: EffectSlot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.plugin_state, Some(vec![0, 1, 2, 250]));
    }

    #[test]
    fn test_effect_params_serialize_by_name() {
        let slot = EffectSlot::new(EffectId(1), EffectType::Delay);
        let json = serde_json::to_value(&slot).unwrap();
        assert!(json["params"].get("DelayFeedback").is_some());
        let back: EffectSlot = serde_json::from_value(json).unwrap();
        assert_eq!(back.get_param(EffectParamId::DelayFeedback), 0.4);
    }

    #[test]
    fn test_missing_project_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_valid_project(dir.path()));
        assert!(matches!(
            read_snapshot(dir.path()),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _graph) = Engine::new(EngineConfig::default());
        save_project(&mut engine, dir.path()).unwrap();

        let file = dir.path().join(PROJECT_FILE_NAME);
        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        value["version"] = serde_json::json!(PROJECT_VERSION + 1);
        fs::write(&file, value.to_string()).unwrap();

        assert!(read_snapshot(dir.path()).is_err());
    }

    #[test]
    fn test_old_files_fill_defaults() {
        let json = r#"{
            "id": "5f0c6d2e-8c4b-4f8e-9a43-1d2b3c4d5e6f",
            "version": 1,
            "name": "old",
            "created_at": "2024-01-01T00:00:00Z",
            "modified_at": "2024-01-01T00:00:00Z",
            "tempo": 98.0,
            "tracks": []
        }"#;
        let snapshot: ProjectSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.beats_per_bar, 4);
        assert_eq!(snapshot.count_in_bars, 2);
        assert!(snapshot.metronome_enabled);
        assert!(snapshot.audio_clips.is_empty());
    }
}

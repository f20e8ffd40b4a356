//! daw-engine - real-time audio engine for a digital audio workstation
//!
//! The control thread talks to an [`engine::Engine`]; the audio callback
//! (or an offline renderer) runs the matching [`engine::AudioGraph`]. The
//! two sides share nothing but a bounded command queue, atomics and a
//! capture ring, so the audio thread never blocks.
//!
//! ```no_run
//! use daw_engine::config::EngineConfig;
//! use daw_engine::engine::Engine;
//! use daw_engine::mixer::TrackType;
//!
//! let (mut engine, mut graph) = Engine::new(EngineConfig::default());
//! let track = engine.create_track(TrackType::Midi)?;
//! let clip = engine.create_midi_clip();
//! engine.add_note_to_clip(clip, 60, 100, 0.0, 0.5)?;
//! engine.add_midi_clip_to_track(track, clip, 0.0)?;
//! let audio = daw_engine::audio::offline::render_offline(&mut engine, &mut graph, 0.0, 2.0)?;
//! # Ok::<(), daw_engine::error::EngineError>(())
//! ```

pub mod audio;
pub mod clip;
pub mod config;
pub mod diagnostics;
pub mod effects;
pub mod engine;
pub mod error;
pub mod ids;
pub mod metronome;
pub mod midi;
pub mod mixer;
pub mod params;
pub mod project;
pub mod recorder;
pub mod synth;
pub mod transport;

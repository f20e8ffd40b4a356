//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use daw_engine::config::EngineConfig;
use daw_engine::engine::{AudioGraph, Engine};

/// Write mono float samples to a WAV file
pub fn write_mono_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> PathBuf {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    path.to_path_buf()
}

pub fn sine(freq: f32, amplitude: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
    let frames = (seconds * sample_rate as f32) as usize;
    (0..frames)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

pub fn dc(value: f32, frames: usize) -> Vec<f32> {
    vec![value; frames]
}

pub fn engine() -> (Engine, AudioGraph) {
    Engine::new(EngineConfig::default())
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

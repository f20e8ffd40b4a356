//! Offline audio rendering for WAV export
//!
//! Drives the same [`AudioGraph`] as real-time playback, so an export is
//! identical to what is heard during playback.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;

use crate::clip::AudioBuffer;
use crate::engine::{AudioGraph, Engine};
use crate::error::{EngineError, Result};

/// Peak level `normalize` brings an export to
pub const NORMALIZE_CEILING_DB: f32 = -0.1;

/// Rendered past the last clip so release and effect tails are kept
pub const EXPORT_TAIL_SECONDS: f64 = 1.0;

/// Sample encoding for exported WAV files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavFormat {
    Int16,
    Int24,
    Float32,
}

impl WavFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "16" | "int16" => Some(WavFormat::Int16),
            "24" | "int24" => Some(WavFormat::Int24),
            "32f" | "float32" | "float" => Some(WavFormat::Float32),
            _ => None,
        }
    }

    fn spec(self, channels: u16, sample_rate: u32) -> WavSpec {
        let (bits_per_sample, sample_format) = match self {
            WavFormat::Int16 => (16, SampleFormat::Int),
            WavFormat::Int24 => (24, SampleFormat::Int),
            WavFormat::Float32 => (32, SampleFormat::Float),
        };
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample,
            sample_format,
        }
    }
}

/// Write a buffer to a WAV file. Integer formats clamp to [-1, 1].
pub fn write_wav(path: &Path, buffer: &AudioBuffer, format: WavFormat) -> Result<()> {
    let spec = format.spec(buffer.channels.max(1), buffer.sample_rate);
    let file = File::create(path)?;
    let mut writer = WavWriter::new(BufWriter::new(file), spec)?;

    match format {
        WavFormat::Int16 => {
            for &sample in &buffer.samples {
                writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
            }
        }
        WavFormat::Int24 => {
            const MAX_24: f32 = 8_388_607.0;
            for &sample in &buffer.samples {
                writer.write_sample((sample.clamp(-1.0, 1.0) * MAX_24) as i32)?;
            }
        }
        WavFormat::Float32 => {
            for &sample in &buffer.samples {
                writer.write_sample(sample)?;
            }
        }
    }

    writer.finalize()?;
    Ok(())
}

/// Scale `buffer` so its peak sits at `ceiling_db`. Silence is left alone.
/// Returns the gain applied.
pub fn normalize(buffer: &mut AudioBuffer, ceiling_db: f32) -> f32 {
    let peak = buffer.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= 0.0 || !peak.is_finite() {
        return 1.0;
    }
    let gain = 10f32.powf(ceiling_db / 20.0) / peak;
    for sample in &mut buffer.samples {
        *sample *= gain;
    }
    info!("Normalized peak {:.4} with gain {:.4}", peak, gain);
    gain
}

/// Run the graph for `frames` frames in callbacks of `block` frames and
/// return interleaved stereo output
pub fn render(graph: &mut AudioGraph, frames: usize, block: usize) -> Vec<f32> {
    let block = block.max(1);
    let mut output = vec![0.0; frames * 2];
    for chunk in output.chunks_mut(block * 2) {
        graph.process(None, chunk);
    }
    output
}

/// Render `duration` seconds starting at `start` seconds with the metronome
/// silenced. DSP state is cleared first, so rendering the same range twice
/// gives identical output. The transport is left stopped.
pub fn render_offline(
    engine: &mut Engine,
    graph: &mut AudioGraph,
    start: f64,
    duration: f64,
) -> Result<AudioBuffer> {
    if !start.is_finite() || !duration.is_finite() || duration < 0.0 {
        return Err(EngineError::invalid_state(format!(
            "cannot render {} s from {} s",
            duration, start
        )));
    }
    if engine.get_state().is_recording_session() {
        return Err(EngineError::invalid_state("cannot render while recording"));
    }

    let metronome = engine.metronome_enabled();
    engine.set_metronome_enabled(false);
    let result = render_range(engine, graph, start, duration);
    engine.set_metronome_enabled(metronome);
    result
}

/// Render the whole project: from 0 to the end of the last clip plus
/// [`EXPORT_TAIL_SECONDS`]
pub fn render_project(engine: &mut Engine, graph: &mut AudioGraph) -> Result<AudioBuffer> {
    let end = engine.project_duration();
    if end <= 0.0 {
        return Err(EngineError::invalid_state("the project has no clips to export"));
    }
    render_offline(engine, graph, 0.0, end + EXPORT_TAIL_SECONDS)
}

fn render_range(
    engine: &mut Engine,
    graph: &mut AudioGraph,
    start: f64,
    duration: f64,
) -> Result<AudioBuffer> {
    let sample_rate = engine.sample_rate();
    engine.stop()?;
    engine.seek(start)?;
    engine.reset_audio_state()?;
    engine.play()?;

    let frames = (duration * sample_rate as f64).round() as usize;
    let output = render(graph, frames, engine.config().max_block_frames);

    engine.stop()?;
    graph.process(None, &mut []);
    engine.pump();

    info!(
        "Rendered {:.2} s from {:.2} s ({} frames)",
        duration, start, frames
    );
    Ok(AudioBuffer::new(output, 2, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn tone(frames: usize) -> AudioBuffer {
        let samples = (0..frames * 2)
            .map(|i| ((i / 2) as f32 * 0.05).sin() * 1.5)
            .collect();
        AudioBuffer::new(samples, 2, 48_000)
    }

    #[test]
    fn test_write_wav_formats() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = tone(100);
        for (format, bits) in [
            (WavFormat::Int16, 16),
            (WavFormat::Int24, 24),
            (WavFormat::Float32, 32),
        ] {
            let path = dir.path().join(format!("out-{}.wav", bits));
            write_wav(&path, &buffer, format).unwrap();
            let reader = hound::WavReader::open(&path).unwrap();
            assert_eq!(reader.spec().bits_per_sample, bits);
            assert_eq!(reader.spec().channels, 2);
            assert_eq!(reader.len(), 200);
        }
    }

    #[test]
    fn test_int16_export_clamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loud.wav");
        let buffer = AudioBuffer::new(vec![2.0, -2.0], 2, 48_000);
        write_wav(&path, &buffer, WavFormat::Int16).unwrap();
        let samples: Vec<i16> = hound::WavReader::open(&path)
            .unwrap()
            .into_samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_format_names() {
        assert_eq!(WavFormat::from_name("24"), Some(WavFormat::Int24));
        assert_eq!(WavFormat::from_name("float32"), Some(WavFormat::Float32));
        assert_eq!(WavFormat::from_name("8"), None);
    }

    #[test]
    fn test_render_offline_length_and_transport() {
        let (mut engine, mut graph) = Engine::new(EngineConfig::default());
        let rendered = render_offline(&mut engine, &mut graph, 1.0, 0.5).unwrap();
        assert_eq!(rendered.frames(), 24_000);
        assert_eq!(rendered.channels, 2);
        assert!(engine.metronome_enabled());
        assert_eq!(engine.get_playhead(), 0.0);
        // Empty project with the click muted renders silence
        assert!(rendered.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_render_offline_rejects_bad_ranges() {
        let (mut engine, mut graph) = Engine::new(EngineConfig::default());
        assert!(render_offline(&mut engine, &mut graph, f64::NAN, 1.0).is_err());
        assert!(render_offline(&mut engine, &mut graph, 0.0, -1.0).is_err());
    }

    #[test]
    fn test_normalize_brings_peak_to_ceiling() {
        let mut buffer = AudioBuffer::new(vec![0.25, -0.5, 0.1, 0.0], 2, 48_000);
        let gain = normalize(&mut buffer, NORMALIZE_CEILING_DB);
        let ceiling = 10f32.powf(-0.1 / 20.0);
        assert!((buffer.samples[1] + ceiling).abs() < 1e-6);
        assert!((gain - ceiling / 0.5).abs() < 1e-5);
        // Relative levels are kept
        assert!((buffer.samples[0] / buffer.samples[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_leaves_silence() {
        let mut buffer = AudioBuffer::new(vec![0.0; 8], 2, 48_000);
        assert_eq!(normalize(&mut buffer, NORMALIZE_CEILING_DB), 1.0);
        assert!(buffer.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_render_project_follows_last_clip() {
        use crate::mixer::TrackType;
        let (mut engine, mut graph) = Engine::new(EngineConfig::default());
        assert!(render_project(&mut engine, &mut graph).is_err());

        let track = engine.create_track(TrackType::Midi).unwrap();
        let clip = engine.create_midi_clip();
        // 4 beats at 120 BPM, placed at 1 s
        engine.add_midi_clip_to_track(track, clip, 1.0).unwrap();
        assert!((engine.project_duration() - 3.0).abs() < 1e-9);

        let rendered = render_project(&mut engine, &mut graph).unwrap();
        let expected = (3.0 + EXPORT_TAIL_SECONDS) * 48_000.0;
        assert_eq!(rendered.frames(), expected as usize);
    }
}

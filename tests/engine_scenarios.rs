//! End-to-end scenarios driving the engine and its graph offline

mod common;

use daw_engine::audio::offline::{render, render_offline};
use daw_engine::config::EngineConfig;
use daw_engine::effects::EffectType;
use daw_engine::engine::{AudioGraph, Engine};
use daw_engine::error::EngineError;
use daw_engine::ids::{ClipId, TrackId};
use daw_engine::mixer::{pan_gains, TrackType};
use daw_engine::transport::TransportState;

use common::{dc, engine, peak, sine, write_mono_wav};

#[test]
fn test_imported_file_is_resampled_and_seekable() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_mono_wav(
        &dir.path().join("tone.wav"),
        44_100,
        &sine(440.0, 0.5, 44_100, 5.0),
    );

    let (mut engine, mut graph) = engine();
    let track = engine.create_track(TrackType::Audio).unwrap();
    let clip = engine.load_audio_file(&path).unwrap();
    engine.add_clip_to_track(track, clip, 0.0).unwrap();

    let duration = engine.get_clip_duration(clip).unwrap();
    assert!((duration - 5.0).abs() < 0.01, "duration {}", duration);
    assert_eq!(engine.clip_name(clip).unwrap(), "tone");

    engine.play().unwrap();
    engine.seek(2.5).unwrap();
    assert!((engine.get_playhead() - 2.5).abs() < 1e-9);

    let out = render(&mut graph, 4800, 256);
    engine.pump();
    assert_eq!(engine.get_state(), TransportState::Playing);
    assert!((engine.get_playhead() - 2.6).abs() < 1e-6);
    assert!(peak(&out) > 0.1);
}

#[test]
fn test_count_in_lasts_exactly_two_bars() {
    let (mut engine, mut graph) = engine();
    let track = engine.create_track(TrackType::Audio).unwrap();
    engine.set_track_armed(track, true).unwrap();
    engine.set_tempo(120.0).unwrap();
    engine.set_count_in_bars(2).unwrap();

    engine.start_recording().unwrap();
    assert_eq!(engine.get_state(), TransportState::CountingIn);

    // 2 bars of 4/4 at 120 BPM and 48 kHz is 192000 frames; 441 does not divide it
    let input = vec![0.25f32; 441 * 2];
    let mut out = vec![0.0f32; 441 * 2];
    let mut heard_click = false;
    for _ in 0..435 {
        graph.process(Some(&input), &mut out);
        heard_click |= peak(&out) > 0.0;
    }
    assert!(heard_click);
    assert_eq!(engine.get_state(), TransportState::CountingIn);
    assert_eq!(engine.recorded_frames(), 0);
    assert_eq!(engine.get_playhead(), 0.0);

    // 191835 frames so far: the next callback holds 165 count-in frames
    graph.process(Some(&input), &mut out);
    assert_eq!(engine.get_state(), TransportState::Recording);
    assert_eq!(engine.recorded_frames(), 441 - 165);

    let clip = engine.stop_recording().unwrap().unwrap();
    let frames = engine.get_clip_duration(clip).unwrap() * 48_000.0;
    assert!((frames - 276.0).abs() < 1e-6);
    assert!(engine.get_track_info(track).unwrap().clips.contains(&clip));
    assert_eq!(engine.get_playhead(), 0.0);
    assert_eq!(engine.get_state(), TransportState::Stopped);
}

#[test]
fn test_midi_take_becomes_a_clip() {
    let (mut engine, mut graph) = engine();
    let track = engine.create_track(TrackType::Midi).unwrap();
    engine.set_track_armed(track, true).unwrap();
    engine.set_count_in_bars(0).unwrap();

    engine.start_recording().unwrap();
    render(&mut graph, 4800, 480);
    engine.pump();
    assert_eq!(engine.get_state(), TransportState::Recording);

    engine.send_note_on(60, 100).unwrap();
    let out = render(&mut graph, 12_000, 480);
    assert!(peak(&out) > 0.0);
    engine.pump();
    engine.send_note_off(60).unwrap();
    render(&mut graph, 4800, 480);

    let clip = engine.stop_recording().unwrap().unwrap();
    let data = engine.midi_clip(clip).unwrap();
    assert_eq!(data.notes.len(), 1);
    assert_eq!(data.notes[0].pitch, 60);
    assert!(engine.get_track_info(track).unwrap().clips.contains(&clip));
}

#[test]
fn test_second_master_is_rejected() {
    let (mut engine, _graph) = engine();
    let before = engine.track_count();
    let err = engine.create_track(TrackType::Master).unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    assert_eq!(engine.track_count(), before);
}

#[test]
fn test_track_capacity_is_denied() {
    let config = EngineConfig {
        max_tracks: 4,
        ..EngineConfig::default()
    };
    let (mut engine, _graph) = Engine::new(config);
    for _ in 0..3 {
        engine.create_track(TrackType::Audio).unwrap();
    }
    let err = engine.create_track(TrackType::Midi).unwrap_err();
    assert!(matches!(err, EngineError::AllocationDenied(_)));
    assert_eq!(engine.track_count(), 4);
}

#[test]
fn test_master_limiter_holds_the_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    // +6 dBFS sine
    let path = write_mono_wav(
        &dir.path().join("hot.wav"),
        48_000,
        &sine(220.0, 2.0, 48_000, 1.0),
    );

    let (mut engine, mut graph) = engine();
    let track = engine.create_track(TrackType::Audio).unwrap();
    let clip = engine.load_audio_file(&path).unwrap();
    engine.add_clip_to_track(track, clip, 0.0).unwrap();
    engine.set_track_volume(track, 6.0).unwrap();

    let rendered = render_offline(&mut engine, &mut graph, 0.0, 1.0).unwrap();
    let ceiling = 10f32.powf(-0.3 / 20.0);
    assert!(peak(&rendered.samples) <= ceiling + 1e-6);
    assert!(peak(&rendered.samples) > 0.5);
}

#[test]
fn test_mute_and_solo_across_three_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let levels = [0.1f32, 0.2, 0.4];
    let (mut engine, mut graph) = engine();
    let mut tracks = Vec::new();
    for (i, level) in levels.iter().enumerate() {
        let path = write_mono_wav(
            &dir.path().join(format!("dc{}.wav", i)),
            48_000,
            &dc(*level, 48_000),
        );
        let track = engine.create_track(TrackType::Audio).unwrap();
        let clip = engine.load_audio_file(&path).unwrap();
        engine.add_clip_to_track(track, clip, 0.0).unwrap();
        tracks.push(track);
    }

    // Center pan on the track and again on Master
    let (center, _) = pan_gains(0.0);
    let scale = center * center;
    let mut last_left = |engine: &mut Engine| {
        let out = render_offline(engine, &mut graph, 0.0, 0.1).unwrap();
        out.samples[out.samples.len() - 2]
    };

    // Every mute and solo combination of the three tracks
    for bits in 0u32..64 {
        let mutes: Vec<bool> = (0..3).map(|i| bits & (1 << i) != 0).collect();
        let solos: Vec<bool> = (0..3).map(|i| bits & (1 << (i + 3)) != 0).collect();
        for (i, track) in tracks.iter().enumerate() {
            engine.set_track_mute(*track, mutes[i]).unwrap();
            engine.set_track_solo(*track, solos[i]).unwrap();
        }

        // Mute wins over solo; any solo silences the unsoloed tracks
        let any_solo = solos.iter().any(|s| *s);
        let expected: f32 = (0..3)
            .filter(|&i| !mutes[i] && (!any_solo || solos[i]))
            .map(|i| levels[i])
            .sum();

        let left = last_left(&mut engine);
        assert!(
            (left - expected * scale).abs() < 1e-4,
            "mute {:?} solo {:?}: {} != {}",
            mutes,
            solos,
            left,
            expected * scale
        );
    }
}

/// A MIDI track playing one clip with `note` as (start, duration) in seconds
fn held_note_setup(note: (f64, f64)) -> (Engine, AudioGraph, TrackId, ClipId) {
    let (mut engine, graph) = engine();
    engine.set_metronome_enabled(false);
    let track = engine.create_track(TrackType::Midi).unwrap();
    let clip = engine.create_midi_clip();
    engine.add_note_to_clip(clip, 60, 100, note.0, note.1).unwrap();
    engine.add_midi_clip_to_track(track, clip, 0.0).unwrap();
    (engine, graph, track, clip)
}

#[test]
fn test_tempo_change_mid_note_does_not_hang_it() {
    // Beats [0, 2) at 120 BPM
    let (mut engine, mut graph, _track, _clip) = held_note_setup((0.0, 1.0));
    engine.play().unwrap();
    assert!(peak(&render(&mut graph, 30_208, 256)) > 0.0);

    // At 240 BPM beat 2 is already behind the playhead
    engine.set_tempo(240.0).unwrap();
    render(&mut graph, 480_000, 256);
    assert_eq!(peak(&render(&mut graph, 4_800, 256)), 0.0);
}

#[test]
fn test_removing_clip_mid_note_does_not_hang_it() {
    let (mut engine, mut graph, track, clip) = held_note_setup((0.0, 1.5));
    engine.play().unwrap();
    assert!(peak(&render(&mut graph, 24_000, 256)) > 0.0);

    engine.remove_clip_from_track(track, clip).unwrap();
    render(&mut graph, 96_000, 256);
    assert_eq!(peak(&render(&mut graph, 4_800, 256)), 0.0);
}

#[test]
fn test_editing_clip_mid_note_does_not_hang_it() {
    let (mut engine, mut graph, _track, clip) = held_note_setup((0.0, 1.5));
    engine.play().unwrap();
    assert!(peak(&render(&mut graph, 24_000, 256)) > 0.0);

    engine.clear_midi_clip(clip).unwrap();
    render(&mut graph, 96_000, 256);
    assert_eq!(peak(&render(&mut graph, 4_800, 256)), 0.0);
}

#[test]
fn test_note_shorter_than_a_frame_is_released() {
    // A millionth of a beat, starting on beat 1
    let (mut engine, mut graph, _track, _clip) = held_note_setup((0.5, 0.5e-6));
    engine.play().unwrap();
    let out = render(&mut graph, 480_000, 256);
    assert!(peak(&out) > 0.0);
    assert_eq!(peak(&render(&mut graph, 4_800, 256)), 0.0);
}

#[test]
fn test_offline_render_is_deterministic() {
    let (mut engine, mut graph) = engine();
    let track = engine.create_track(TrackType::Midi).unwrap();
    let clip = engine.create_midi_clip();
    for (i, pitch) in [60u8, 64, 67, 72].iter().enumerate() {
        engine
            .add_note_to_clip(clip, *pitch, 100, i as f64 * 0.25, 0.5)
            .unwrap();
    }
    engine.add_midi_clip_to_track(track, clip, 0.0).unwrap();
    engine.add_effect_to_track(track, EffectType::Chorus).unwrap();
    engine.add_effect_to_track(track, EffectType::Delay).unwrap();
    engine.add_effect_to_track(track, EffectType::Reverb).unwrap();

    let first = render_offline(&mut engine, &mut graph, 0.0, 2.0).unwrap();
    let second = render_offline(&mut engine, &mut graph, 0.0, 2.0).unwrap();
    assert!(peak(&first.samples) > 0.0);
    assert_eq!(first.samples, second.samples);
}

#[test]
fn test_track_churn_while_rendering() {
    let (mut engine, mut graph) = engine();
    engine.play().unwrap();
    render(&mut graph, 256, 128);
    engine.pump();
    let baseline = engine.live_allocations();
    for i in 0..200 {
        let kind = if i % 2 == 0 { TrackType::Audio } else { TrackType::Midi };
        let track = engine.create_track(kind).unwrap();
        engine.add_effect_to_track(track, EffectType::Eq).unwrap();
        render(&mut graph, 512, 128);
        if kind == TrackType::Midi {
            engine.send_note_on(48 + (i % 24) as u8, 90).unwrap();
        }
        render(&mut graph, 256, 128);
        engine.delete_track(track).unwrap();
        render(&mut graph, 256, 128);
        engine.pump();
    }

    assert_eq!(engine.track_count(), 1);
    // Everything the graph let go of has been freed on this side
    assert_eq!(engine.live_allocations(), baseline);
    assert!(engine.diagnostics().buffers_rendered >= 600);
}

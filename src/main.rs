//! daw-engine command-line front end
//!
//! Renders projects to WAV, plays projects or audio files on the output
//! device, and prints waveform peaks.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use log::info;

use daw_engine::audio::offline::{
    normalize, render_offline, render_project, write_wav, WavFormat, NORMALIZE_CEILING_DB,
};
use daw_engine::audio::{output_device_names, AudioBackend, BackendOptions};
use daw_engine::clip::{compute_peaks, ClipStore};
use daw_engine::config::EngineConfig;
use daw_engine::engine::{AudioGraph, Engine};
use daw_engine::midi::input_port_names;
use daw_engine::mixer::TrackType;
use daw_engine::project;

/// How often the control loop services the engine while playing
const PUMP_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(name = "daw-engine")]
#[command(about = "Real-time DAW audio engine", long_about = None)]
struct Cli {
    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a project folder to a WAV file
    Render {
        /// Project folder containing project.json
        project: PathBuf,
        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,
        /// Start position in seconds
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Length in seconds (default: up to the end of the last clip)
        #[arg(long)]
        duration: Option<f64>,
        /// Sample format: 16, 24 or float32
        #[arg(long, default_value = "24")]
        format: String,
        /// Scale the result so its peak sits at -0.1 dBFS
        #[arg(long)]
        normalize: bool,
    },
    /// Play a project folder or an audio file on the output device
    Play {
        /// Project folder or audio file
        source: PathBuf,
        /// Output device name
        #[arg(long)]
        device: Option<String>,
        /// Callback size in frames
        #[arg(long)]
        buffer: Option<u32>,
        /// Seconds to play
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Play a MIDI keyboard through the first MIDI track (optionally the
        /// first port whose name contains this text)
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        midi_in: Option<String>,
    },
    /// Print min/max peaks of an audio file as JSON
    Peaks {
        file: PathBuf,
        /// Number of buckets
        #[arg(short, long, default_value_t = 100)]
        resolution: usize,
    },
    /// List output devices
    Devices,
    /// List MIDI input ports
    MidiDevices,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            project,
            output,
            start,
            duration,
            format,
            normalize,
        } => {
            let export = Export {
                start,
                duration,
                format,
                normalize,
            };
            render(&project, &output, &export, config)
        }
        Commands::Play {
            source,
            device,
            buffer,
            seconds,
            midi_in,
        } => {
            let options = BackendOptions {
                device,
                buffer_frames: buffer,
                input: false,
            };
            play(&source, options, seconds, midi_in.as_deref(), config)
        }
        Commands::Peaks { file, resolution } => peaks(&file, resolution, &config),
        Commands::Devices => {
            for name in output_device_names() {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::MidiDevices => {
            for name in input_port_names()? {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

/// What `render` writes
struct Export {
    start: f64,
    duration: Option<f64>,
    format: String,
    normalize: bool,
}

/// Config file if given, with recordings defaulting to the user data dir
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if config.recordings_dir.is_none() {
        config.recordings_dir =
            ProjectDirs::from("", "", "daw-engine").map(|dirs| dirs.data_dir().join("recordings"));
    }
    Ok(config)
}

fn render(project_dir: &Path, output: &Path, export: &Export, config: EngineConfig) -> Result<()> {
    let Some(format) = WavFormat::from_name(&export.format) else {
        bail!(
            "Unknown WAV format '{}' (use 16, 24 or float32)",
            export.format
        );
    };
    let (mut engine, mut graph) = project::load_project(project_dir, config)
        .with_context(|| format!("Failed to load project {}", project_dir.display()))?;
    let mut buffer = match export.duration {
        Some(duration) => render_offline(&mut engine, &mut graph, export.start, duration)?,
        None if export.start == 0.0 => render_project(&mut engine, &mut graph)?,
        None => {
            let remaining = engine.project_duration() - export.start;
            if remaining <= 0.0 {
                bail!("--start {} is past the end of the project", export.start);
            }
            render_offline(&mut engine, &mut graph, export.start, remaining)?
        }
    };
    if export.normalize {
        normalize(&mut buffer, NORMALIZE_CEILING_DB);
    }
    write_wav(output, &buffer, format)?;
    println!(
        "Rendered {:.2} s of '{}' to {}",
        buffer.duration_secs(),
        engine.project_name(),
        output.display()
    );
    Ok(())
}

fn open_source(source: &Path, config: EngineConfig) -> Result<(Engine, AudioGraph)> {
    if project::is_valid_project(source) {
        return Ok(project::load_project(source, config)?);
    }
    let (mut engine, graph) = Engine::new(config);
    let track = engine.create_track(TrackType::Audio)?;
    let clip = engine
        .load_audio_file(source)
        .with_context(|| format!("Failed to load {}", source.display()))?;
    engine.add_clip_to_track(track, clip, 0.0)?;
    Ok((engine, graph))
}

fn play(
    source: &Path,
    options: BackendOptions,
    seconds: f64,
    midi_in: Option<&str>,
    config: EngineConfig,
) -> Result<()> {
    let (mut engine, graph) = open_source(source, config)?;
    if let Some(port) = midi_in {
        if !engine.track_ids().iter().any(|id| {
            engine
                .get_track_info(*id)
                .map(|info| info.track_type == TrackType::Midi)
                .unwrap_or(false)
        }) {
            engine.create_track(TrackType::Midi)?;
        }
        let port = Some(port).filter(|p| !p.is_empty());
        let name = engine.connect_midi_input(port)?;
        println!("Listening to MIDI input '{}'", name);
    }
    let mut backend = AudioBackend::start(&mut engine, graph, options)?;
    info!("Playing on '{}'", backend.device_name());

    engine.play()?;
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    while Instant::now() < deadline {
        thread::sleep(PUMP_INTERVAL);
        engine.pump();
        backend.poll(&mut engine)?;
    }
    engine.stop()?;
    thread::sleep(PUMP_INTERVAL);
    engine.pump();

    let report = engine.diagnostics();
    println!("{}", serde_json::to_string_pretty(&report)?);
    for entry in engine.event_log().entries_recent_first() {
        println!("{}", entry.message);
    }
    backend.stop();
    Ok(())
}

fn peaks(file: &Path, resolution: usize, config: &EngineConfig) -> Result<()> {
    let buffer = ClipStore::load_file(file, config.sample_rate)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    let peaks = compute_peaks(&buffer, resolution);
    println!("{}", serde_json::to_string(&peaks)?);
    Ok(())
}

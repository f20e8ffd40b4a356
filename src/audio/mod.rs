//! Audio device I/O
//!
//! Uses cpal for low-level audio with support for:
//! - Output on a named device, falling back to the default device
//! - Optional input capture for recording, handed to the output callback
//!   through a lock-free ring
//! - Overload counting (late callbacks and lock contention)
//! - Rebuilding the streams on the default device after a device error
//!
//! The [`AudioGraph`] sits behind a mutex that only the audio callback locks
//! in normal operation, and only with `try_lock`.

pub mod offline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig};
use log::{debug, info, warn};

use crate::diagnostics::Counters;
use crate::engine::{AudioGraph, Engine};
use crate::error::{EngineError, Result};

/// Largest callback handled in one piece; bigger ones are split
const MAX_CALLBACK_FRAMES: usize = 8192;

/// Seconds of device input buffered between the input and output callbacks
const INPUT_RING_SECONDS: usize = 1;

/// How the device streams are opened
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Output device name; None or an unknown name uses the default device
    pub device: Option<String>,
    /// Requested callback size in frames; None lets the driver choose
    pub buffer_frames: Option<u32>,
    /// Open the default input device for recording
    pub input: bool,
}

/// Audio-related errors
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("No output device found")]
    NoDevice,
    #[error("Failed to create audio stream: {0}")]
    StreamError(String),
}

impl From<AudioError> for EngineError {
    fn from(err: AudioError) -> Self {
        EngineError::DeviceFailure(err.to_string())
    }
}

/// Running device streams driving an [`AudioGraph`]
pub struct AudioBackend {
    output: Stream,
    input: Option<Stream>,
    graph: Arc<Mutex<AudioGraph>>,
    counters: Arc<Counters>,
    failed: Arc<AtomicBool>,
    options: BackendOptions,
    device_name: String,
}

impl AudioBackend {
    /// Open the device streams and start playback
    pub fn start(engine: &mut Engine, graph: AudioGraph, options: BackendOptions) -> Result<Self> {
        let graph = Arc::new(Mutex::new(graph));
        let counters = engine.counters().clone();
        let failed = Arc::new(AtomicBool::new(false));
        let (output, input, device_name) =
            open_streams(engine, &graph, &counters, &failed, &options)?;
        Ok(Self {
            output,
            input,
            graph,
            counters,
            failed,
            options,
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Rebuild on the default device if the stream reported an error.
    /// Returns true when a rebuild happened.
    pub fn poll(&mut self, engine: &mut Engine) -> Result<bool> {
        if !self.failed.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        warn!("Audio device '{}' failed, switching to default", self.device_name);
        engine.event_log_mut().warn(format!(
            "Audio device '{}' was lost; using the default device",
            self.device_name
        ));

        let options = BackendOptions {
            device: None,
            ..self.options.clone()
        };
        let (output, input, device_name) =
            open_streams(engine, &self.graph, &self.counters, &self.failed, &options)?;
        self.output = output;
        self.input = input;
        self.device_name = device_name;
        self.options = options;
        Ok(true)
    }

    pub fn pause(&self) -> Result<()> {
        self.output
            .pause()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.output
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        Ok(())
    }

    /// Close the streams and take the graph back
    pub fn stop(self) -> Option<AudioGraph> {
        let Self {
            output,
            input,
            graph,
            ..
        } = self;
        drop(input);
        drop(output);
        Arc::try_unwrap(graph)
            .ok()
            .and_then(|m| m.into_inner().ok())
    }
}

fn pick_output(host: &cpal::Host, name: Option<&str>, engine: &mut Engine) -> Result<cpal::Device> {
    if let Some(name) = name {
        let found = host
            .output_devices()
            .map_err(|e| AudioError::StreamError(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        match found {
            Some(device) => return Ok(device),
            None => {
                warn!("Output device '{}' not found, using default", name);
                engine
                    .event_log_mut()
                    .warn(format!("Device '{}' not found; using the default device", name));
            }
        }
    }
    Ok(host.default_output_device().ok_or(AudioError::NoDevice)?)
}

fn open_streams(
    engine: &mut Engine,
    graph: &Arc<Mutex<AudioGraph>>,
    counters: &Arc<Counters>,
    failed: &Arc<AtomicBool>,
    options: &BackendOptions,
) -> Result<(Stream, Option<Stream>, String)> {
    let host = cpal::default_host();
    let device = pick_output(&host, options.device.as_deref(), engine)?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let default = device
        .default_output_config()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    let sample_rate = engine.sample_rate();
    let config = StreamConfig {
        channels: default.channels(),
        sample_rate: SampleRate(sample_rate),
        buffer_size: options
            .buffer_frames
            .map(BufferSize::Fixed)
            .unwrap_or(BufferSize::Default),
    };

    let (input, input_rx) = if options.input {
        match open_input(&host, sample_rate, failed) {
            Ok((stream, rx)) => (Some(stream), Some(rx)),
            Err(e) => {
                warn!("No input stream: {}", e);
                engine
                    .event_log_mut()
                    .warn(format!("Recording input unavailable: {}", e));
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let shared = CallbackShared {
        graph: graph.clone(),
        counters: counters.clone(),
        input: input_rx,
        sample_rate,
    };
    let output = match default.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, shared, failed.clone()),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, shared, failed.clone()),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, shared, failed.clone()),
        other => Err(AudioError::StreamError(format!(
            "Unsupported sample format {:?}",
            other
        ))),
    }?;
    output
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    info!(
        "Audio output on '{}' ({} ch, {} Hz, {:?})",
        device_name, config.channels, sample_rate, config.buffer_size
    );
    Ok((output, input, device_name))
}

/// Open the default input and forward its samples as interleaved stereo
fn open_input(
    host: &cpal::Host,
    sample_rate: u32,
    failed: &Arc<AtomicBool>,
) -> std::result::Result<(Stream, rtrb::Consumer<f32>), AudioError> {
    let device = host.default_input_device().ok_or(AudioError::NoDevice)?;
    let default = device
        .default_input_config()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    if default.sample_format() != SampleFormat::F32 {
        return Err(AudioError::StreamError(format!(
            "input format {:?} is not supported",
            default.sample_format()
        )));
    }
    let channels = default.channels() as usize;
    let config = StreamConfig {
        channels: default.channels(),
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };

    let (mut tx, rx) = rtrb::RingBuffer::new(sample_rate as usize * 2 * INPUT_RING_SECONDS);
    let flag = failed.clone();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels.max(1)) {
                    let left = frame[0];
                    let right = frame.get(1).copied().unwrap_or(left);
                    // A full ring drops input; the recorder sees a gap
                    let _ = tx.push(left);
                    let _ = tx.push(right);
                }
            },
            move |_| flag.store(true, Ordering::Release),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    debug!("Input stream open ({} ch)", channels);
    Ok((stream, rx))
}

/// State owned by the output callback
struct CallbackShared {
    graph: Arc<Mutex<AudioGraph>>,
    counters: Arc<Counters>,
    input: Option<rtrb::Consumer<f32>>,
    sample_rate: u32,
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32> + cpal::Sample>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut shared: CallbackShared,
    failed: Arc<AtomicBool>,
) -> std::result::Result<Stream, AudioError> {
    let channels = config.channels as usize;
    let mut out_buf = vec![0.0f32; MAX_CALLBACK_FRAMES * 2];
    let mut in_buf = vec![0.0f32; MAX_CALLBACK_FRAMES * 2];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                audio_callback(data, channels, &mut shared, &mut out_buf, &mut in_buf);
            },
            move |_| failed.store(true, Ordering::Release),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

fn audio_callback<T: cpal::SizedSample + cpal::FromSample<f32> + cpal::Sample>(
    data: &mut [T],
    channels: usize,
    shared: &mut CallbackShared,
    out_buf: &mut [f32],
    in_buf: &mut [f32],
) {
    let started = Instant::now();
    let channels = channels.max(1);
    let total_frames = data.len() / channels;

    // Never wait on the control thread: output silence and count it
    let Ok(mut graph) = shared.graph.try_lock() else {
        for sample in data.iter_mut() {
            *sample = T::EQUILIBRIUM;
        }
        Counters::add(&shared.counters.overloads, 1);
        return;
    };

    for device_frames in data.chunks_mut(MAX_CALLBACK_FRAMES * channels) {
        let frames = device_frames.len() / channels;
        let out = &mut out_buf[..frames * 2];
        let input = match shared.input.as_mut() {
            Some(rx) => {
                let captured = &mut in_buf[..frames * 2];
                for sample in captured.iter_mut() {
                    *sample = rx.pop().unwrap_or(0.0);
                }
                Some(&*captured)
            }
            None => None,
        };
        graph.process(input, out);

        for (i, frame) in device_frames.chunks_exact_mut(channels).enumerate() {
            let (l, r) = (out[i * 2], out[i * 2 + 1]);
            if channels == 1 {
                frame[0] = T::from_sample((l + r) * 0.5);
                continue;
            }
            frame[0] = T::from_sample(l);
            frame[1] = T::from_sample(r);
            for extra in &mut frame[2..] {
                *extra = T::EQUILIBRIUM;
            }
        }
    }
    drop(graph);

    let budget = Duration::from_secs_f64(total_frames as f64 / shared.sample_rate as f64);
    if started.elapsed() > budget {
        Counters::add(&shared.counters.overloads, 1);
    }
}

/// Names of the available output devices
pub fn output_device_names() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("Cannot list output devices: {}", e);
            Vec::new()
        }
    }
}

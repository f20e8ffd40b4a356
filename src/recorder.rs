//! Audio recording
//!
//! The audio thread copies raw input into fixed-size [`CaptureChunk`]s and
//! pushes them into an `rtrb` ring sized up front. The control thread drains
//! the ring into the current [`RecordingSession`] and turns it into a clip on
//! stop. Finished takes can be written to WAV on a background thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info, warn};

use crate::audio::offline::{write_wav, WavFormat};
use crate::clip::AudioBuffer;
use crate::ids::TrackId;

/// Stereo frames per chunk
pub const CHUNK_FRAMES: usize = 256;

/// One slice of captured input, interleaved stereo
#[derive(Clone, Copy)]
pub struct CaptureChunk {
    pub session: u32,
    /// Playhead frame of the first sample
    pub position: u64,
    pub frames: u16,
    pub data: [f32; CHUNK_FRAMES * 2],
}

/// Create the capture ring for `seconds` of audio at `sample_rate`
pub fn capture_channel(seconds: f32, sample_rate: u32) -> (CaptureProducer, Recorder) {
    let frames = (seconds.max(1.0) * sample_rate as f32) as usize;
    let capacity = frames.div_ceil(CHUNK_FRAMES).max(4);
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    let overruns = Arc::new(AtomicU64::new(0));
    (
        CaptureProducer {
            producer,
            overruns: overruns.clone(),
        },
        Recorder {
            consumer,
            overruns,
            next_session: 1,
            session: None,
            recordings_dir: None,
            writers: Vec::new(),
        },
    )
}

/// Audio-side end of the capture ring
pub struct CaptureProducer {
    producer: rtrb::Producer<CaptureChunk>,
    overruns: Arc<AtomicU64>,
}

impl CaptureProducer {
    /// Push interleaved stereo input captured at playhead `position`.
    /// Chunks that do not fit are counted as overruns.
    pub fn push(&mut self, session: u32, position: u64, input: &[f32]) {
        for (i, frames) in input.chunks(CHUNK_FRAMES * 2).enumerate() {
            let mut chunk = CaptureChunk {
                session,
                position: position + (i * CHUNK_FRAMES) as u64,
                frames: (frames.len() / 2) as u16,
                data: [0.0; CHUNK_FRAMES * 2],
            };
            chunk.data[..frames.len()].copy_from_slice(frames);
            if self.producer.push(chunk).is_err() {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// A take in progress (control side)
#[derive(Debug)]
pub struct RecordingSession {
    pub id: u32,
    /// Armed track the take lands on
    pub track: Option<TrackId>,
    /// Playhead frame where the take begins
    pub start_frame: u64,
    samples: Vec<f32>,
    chunks: u64,
}

impl RecordingSession {
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }
}

/// A finished take ready to become a clip
#[derive(Debug)]
pub struct RecordedTake {
    pub session: u32,
    pub track: Option<TrackId>,
    pub start_frame: u64,
    pub buffer: AudioBuffer,
}

/// Control-side end of the capture ring
pub struct Recorder {
    consumer: rtrb::Consumer<CaptureChunk>,
    overruns: Arc<AtomicU64>,
    next_session: u32,
    session: Option<RecordingSession>,
    recordings_dir: Option<PathBuf>,
    writers: Vec<JoinHandle<()>>,
}

impl Recorder {
    pub fn set_recordings_dir(&mut self, dir: Option<PathBuf>) {
        self.recordings_dir = dir;
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Chunks the audio thread could not push
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Open a session and return its id. Leftovers from earlier sessions are
    /// discarded.
    pub fn begin(&mut self, track: Option<TrackId>, start_frame: u64) -> u32 {
        self.drain();
        let id = self.next_session;
        self.next_session = self.next_session.wrapping_add(1).max(1);
        self.session = Some(RecordingSession {
            id,
            track,
            start_frame,
            samples: Vec::new(),
            chunks: 0,
        });
        debug!("Recording session {} opened at frame {}", id, start_frame);
        id
    }

    /// Move everything the audio thread has captured into the session
    pub fn drain(&mut self) {
        while let Ok(chunk) = self.consumer.pop() {
            let Some(session) = self.session.as_mut() else {
                continue;
            };
            if chunk.session != session.id {
                continue;
            }
            if session.chunks == 0 {
                session.start_frame = chunk.position;
            }
            let len = chunk.frames as usize * 2;
            session.samples.extend_from_slice(&chunk.data[..len]);
            session.chunks += 1;
        }
    }

    /// Close the session. Returns None when nothing was captured.
    pub fn finish(&mut self, sample_rate: u32) -> Option<RecordedTake> {
        self.drain();
        let session = self.session.take()?;
        if session.samples.is_empty() {
            debug!("Recording session {} captured nothing", session.id);
            return None;
        }
        info!(
            "Recording session {} finished: {} frames",
            session.id,
            session.frames()
        );
        Some(RecordedTake {
            session: session.id,
            track: session.track,
            start_frame: session.start_frame,
            buffer: AudioBuffer::new(session.samples, 2, sample_rate),
        })
    }

    /// Drop the session without producing a take
    pub fn cancel(&mut self) {
        self.drain();
        self.session = None;
    }

    /// Write a take to the recordings directory on a background thread.
    /// Returns the path it will be written to.
    pub fn persist(&mut self, take: &RecordedTake) -> Option<PathBuf> {
        let dir = self.recordings_dir.clone()?;
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("take-{}-{:03}.wav", stamp, take.session));
        let buffer = take.buffer.clone();
        let target = path.clone();
        self.writers.retain(|h| !h.is_finished());
        self.writers.push(std::thread::spawn(move || {
            write_take(&dir, &target, &buffer);
        }));
        Some(path)
    }

    /// Block until every background write has finished
    pub fn wait_for_writes(&mut self) {
        for handle in self.writers.drain(..) {
            if handle.join().is_err() {
                warn!("Recording writer thread panicked");
            }
        }
    }
}

fn write_take(dir: &Path, path: &Path, buffer: &AudioBuffer) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Cannot create {}: {}", dir.display(), e);
        return;
    }
    match write_wav(path, buffer, WavFormat::Float32) {
        Ok(()) => info!("Saved recording to {}", path.display()),
        Err(e) => warn!("Failed to save recording {}: {}", path.display(), e),
    }
}

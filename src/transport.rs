//! Transport state machine.
//!
//! The control thread validates transitions with [`Transport`] and sends a
//! [`TransportCommand`]; the audio thread applies it to its [`TransportClock`]
//! at the start of the next buffer and publishes the result through
//! [`TransportShared`].

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::error::{EngineError, Result};

/// Global transport state - exactly one variant is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransportState {
    #[default]
    Stopped = 0,
    Playing = 1,
    Paused = 2,
    CountingIn = 3,
    Recording = 4,
}

impl TransportState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Paused,
            3 => Self::CountingIn,
            4 => Self::Recording,
            _ => Self::Stopped,
        }
    }

    /// Whether the playhead moves in this state
    pub fn is_rolling(self) -> bool {
        matches!(self, Self::Playing | Self::Recording)
    }

    pub fn is_recording_session(self) -> bool {
        matches!(self, Self::CountingIn | Self::Recording)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Playing => "Playing",
            Self::Paused => "Paused",
            Self::CountingIn => "CountingIn",
            Self::Recording => "Recording",
        }
    }
}

/// Transport changes sent to the audio thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    Play,
    Pause,
    Stop,
    Seek { frame: u64 },
    StartRecording { session: u32, count_in_frames: u64 },
    StopRecording { return_to: u64 },
}

/// Length of a count-in in frames
pub fn count_in_frames(bars: u32, beats_per_bar: u32, tempo_bpm: f64, sample_rate: u32) -> u64 {
    let seconds = bars as f64 * beats_per_bar as f64 * 60.0 / tempo_bpm;
    (seconds * sample_rate as f64).round() as u64
}

/// Control-side view of the state machine, used to reject invalid commands
#[derive(Debug, Clone, Copy, Default)]
pub struct Transport {
    state: TransportState,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Fold in transitions the audio thread makes on its own
    pub fn observe(&mut self, published: TransportState) {
        if self.state == TransportState::CountingIn && published == TransportState::Recording {
            self.state = TransportState::Recording;
        }
    }

    /// Returns false when already playing
    pub fn play(&mut self) -> Result<bool> {
        match self.state {
            TransportState::Stopped | TransportState::Paused => {
                self.state = TransportState::Playing;
                Ok(true)
            }
            TransportState::Playing => Ok(false),
            other => Err(EngineError::invalid_state(format!(
                "cannot play while {}",
                other.name()
            ))),
        }
    }

    /// Returns false when already paused
    pub fn pause(&mut self) -> Result<bool> {
        match self.state {
            TransportState::Playing => {
                self.state = TransportState::Paused;
                Ok(true)
            }
            TransportState::Paused => Ok(false),
            other => Err(EngineError::invalid_state(format!(
                "cannot pause while {}",
                other.name()
            ))),
        }
    }

    /// Always valid. Returns the state we left.
    pub fn stop(&mut self) -> TransportState {
        std::mem::replace(&mut self.state, TransportState::Stopped)
    }

    pub fn check_seek(&self) -> Result<()> {
        match self.state {
            TransportState::CountingIn | TransportState::Recording => Err(
                EngineError::invalid_state(format!("cannot seek while {}", self.state.name())),
            ),
            _ => Ok(()),
        }
    }

    /// Returns the state recording starts in
    pub fn start_recording(&mut self, count_in_bars: u32) -> Result<TransportState> {
        let next = match self.state {
            TransportState::Stopped if count_in_bars > 0 => TransportState::CountingIn,
            TransportState::Stopped | TransportState::Playing => TransportState::Recording,
            other => {
                return Err(EngineError::invalid_state(format!(
                    "cannot start recording while {}",
                    other.name()
                )))
            }
        };
        self.state = next;
        Ok(next)
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        if !self.state.is_recording_session() {
            return Err(EngineError::invalid_state(format!(
                "not recording ({})",
                self.state.name()
            )));
        }
        self.state = TransportState::Stopped;
        Ok(())
    }
}

/// Values the audio thread publishes after every buffer
#[derive(Debug, Default)]
pub struct TransportShared {
    state: AtomicU8,
    playhead_frames: AtomicU64,
    count_in_remaining: AtomicU64,
    /// Session currently in Recording (0 = none)
    recording_session: AtomicU32,
    record_start_frame: AtomicU64,
}

impl TransportShared {
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn playhead_frames(&self) -> u64 {
        self.playhead_frames.load(Ordering::Acquire)
    }

    /// Mirror a seek so readers see it before the audio thread catches up
    pub fn store_playhead(&self, frame: u64) {
        self.playhead_frames.store(frame, Ordering::Release);
    }

    pub fn count_in_remaining(&self) -> u64 {
        self.count_in_remaining.load(Ordering::Acquire)
    }

    pub fn recording_session(&self) -> u32 {
        self.recording_session.load(Ordering::Acquire)
    }

    pub fn record_start_frame(&self) -> u64 {
        self.record_start_frame.load(Ordering::Acquire)
    }
}

/// Audio-thread transport: the single source of timing truth
#[derive(Debug, Default)]
pub struct TransportClock {
    state: TransportState,
    playhead: u64,
    count_in_remaining: u64,
    count_in_elapsed: u64,
    session: u32,
    record_start: u64,
}

impl TransportClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn playhead(&self) -> u64 {
        self.playhead
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    /// Frames elapsed since the count-in began
    pub fn count_in_elapsed(&self) -> u64 {
        self.count_in_elapsed
    }

    /// Apply a command. Returns true when sounding notes should be released.
    pub fn apply(&mut self, command: TransportCommand) -> bool {
        match command {
            TransportCommand::Play => {
                if matches!(self.state, TransportState::Stopped | TransportState::Paused) {
                    self.state = TransportState::Playing;
                }
                false
            }
            TransportCommand::Pause => {
                if self.state == TransportState::Playing {
                    self.state = TransportState::Paused;
                }
                true
            }
            TransportCommand::Stop => {
                self.state = TransportState::Stopped;
                self.playhead = 0;
                self.count_in_remaining = 0;
                self.session = 0;
                true
            }
            TransportCommand::Seek { frame } => {
                if !self.state.is_recording_session() {
                    self.playhead = frame;
                }
                true
            }
            TransportCommand::StartRecording {
                session,
                count_in_frames,
            } => {
                self.session = session;
                self.count_in_elapsed = 0;
                if self.state == TransportState::Stopped && count_in_frames > 0 {
                    self.state = TransportState::CountingIn;
                    self.count_in_remaining = count_in_frames;
                } else {
                    self.begin_recording();
                }
                false
            }
            TransportCommand::StopRecording { return_to } => {
                self.state = TransportState::Stopped;
                self.count_in_remaining = 0;
                self.session = 0;
                self.playhead = return_to;
                true
            }
        }
    }

    fn begin_recording(&mut self) {
        self.state = TransportState::Recording;
        self.count_in_remaining = 0;
        self.record_start = self.playhead;
    }

    /// Frames that may be rendered before the state changes on its own
    pub fn frames_until_transition(&self) -> Option<u64> {
        (self.state == TransportState::CountingIn).then_some(self.count_in_remaining)
    }

    /// Move time forward after a block has been rendered
    pub fn advance(&mut self, frames: u64) {
        match self.state {
            TransportState::Playing | TransportState::Recording => {
                self.playhead += frames;
            }
            TransportState::CountingIn => {
                let step = frames.min(self.count_in_remaining);
                self.count_in_remaining -= step;
                self.count_in_elapsed += step;
                if self.count_in_remaining == 0 {
                    self.begin_recording();
                }
            }
            TransportState::Stopped | TransportState::Paused => {}
        }
    }

    pub fn publish(&self, shared: &TransportShared) {
        shared.state.store(self.state as u8, Ordering::Release);
        shared
            .playhead_frames
            .store(self.playhead, Ordering::Release);
        shared
            .count_in_remaining
            .store(self.count_in_remaining, Ordering::Release);
        let session = if self.state == TransportState::Recording {
            self.session
        } else {
            0
        };
        shared.recording_session.store(session, Ordering::Release);
        shared
            .record_start_frame
            .store(self.record_start, Ordering::Release);
    }
}

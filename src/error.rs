//! Engine error taxonomy
//!
//! Control-thread calls return [`Result`]. The audio thread never produces
//! these; it degrades to silence instead.

use std::path::PathBuf;

/// Errors returned by the engine's control surface
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Unknown track, clip or effect id
    #[error("unknown {kind} id {id}")]
    InvalidHandle { kind: &'static str, id: u64 },

    /// Operation not allowed in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Parameter name not understood by the target
    #[error("{target} has no parameter named '{name}'")]
    InvalidParameter { target: String, name: String },

    /// Audio file could not be read or decoded
    #[error("failed to decode {}: {reason}", path.display())]
    DecodeFailure { path: PathBuf, reason: String },

    /// The I/O backend could not open or keep a device
    #[error("audio device failure: {0}")]
    DeviceFailure(String),

    /// A MIDI input port could not be listed or opened
    #[error("MIDI device failure: {0}")]
    MidiDevice(String),

    /// The request would need the audio thread to grow a buffer
    #[error("allocation denied: {0}")]
    AllocationDenied(String),

    /// The command queue to the audio thread is full
    #[error("command queue is full")]
    QueueFull,

    /// The audio graph has been dropped
    #[error("audio graph is disconnected")]
    Disconnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl EngineError {
    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        EngineError::InvalidState(msg.into())
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EngineError::DecodeFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

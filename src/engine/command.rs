//! Control → audio command queue
//!
//! Commands are processed at the start of the next buffer, in the order they
//! were sent. Anything structural arrives fully built in a `basedrop::Owned`
//! so the audio thread only moves pointers. When the audio thread lets go of
//! one, the free is deferred to the engine's collector on the control thread.

use basedrop::Owned;
use crossbeam_channel::{bounded, Receiver, Sender};

use super::track_runtime::{PlacedClip, PlacedMidiClip, TrackRuntime};
use crate::effects::{EffectSlotRuntime, ParamKey};
use crate::ids::{EffectId, TrackId};
use crate::synth::SynthParam;
use crate::transport::TransportCommand;

/// Commands sent from the control thread to the audio graph
pub enum EngineCommand {
    Transport(TransportCommand),
    /// Clear all DSP state (used before offline renders)
    Reset,

    // Track management
    AddTrack(Owned<TrackRuntime>),
    RemoveTrack(TrackId),
    /// Replace a track's audio clip list (sorted by start frame)
    SetClips {
        track: TrackId,
        clips: Owned<Vec<PlacedClip>>,
    },
    /// Replace a track's MIDI clip list
    SetMidiClips {
        track: TrackId,
        clips: Owned<Vec<PlacedMidiClip>>,
    },

    // Effects
    InsertEffect {
        track: TrackId,
        index: usize,
        slot: Owned<EffectSlotRuntime>,
    },
    RemoveEffect {
        track: TrackId,
        effect: EffectId,
    },
    MoveEffect {
        track: TrackId,
        effect: EffectId,
        index: usize,
    },
    SetEffectParam {
        track: TrackId,
        effect: EffectId,
        key: ParamKey,
        value: f32,
    },
    SetEffectBypass {
        track: TrackId,
        effect: EffectId,
        bypassed: bool,
    },

    // Instruments
    SetSynthParam {
        track: TrackId,
        param: SynthParam,
        value: f32,
    },
    NoteOn {
        track: TrackId,
        pitch: u8,
        velocity: u8,
    },
    NoteOff {
        track: TrackId,
        pitch: u8,
    },
}

/// Both ends of the control to audio queue
pub struct CommandQueue {
    pub tx: Sender<EngineCommand>,
    pub rx: Receiver<EngineCommand>,
}

pub fn command_queue(capacity: usize) -> CommandQueue {
    let (tx, rx) = bounded(capacity.max(1));
    CommandQueue { tx, rx }
}

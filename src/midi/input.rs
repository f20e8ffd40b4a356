//! Hardware MIDI input through midir
//!
//! The midir callback runs on the driver's thread. It keeps note messages
//! only and pushes them onto a bounded channel; [`crate::engine::Engine::pump`]
//! plays them as live notes, so they are heard and recorded exactly like
//! `send_note_on`.

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};

use crate::error::{EngineError, Result};

const CLIENT_NAME: &str = "daw-engine";

/// Notes buffered between two pumps before new ones are dropped
const QUEUE_CAPACITY: usize = 1024;

/// A note message from a controller, any channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputNote {
    On { pitch: u8, velocity: u8 },
    Off { pitch: u8 },
}

impl InputNote {
    /// Parse a raw message. Note-on with velocity 0 is a note-off.
    pub fn parse(message: &[u8]) -> Option<Self> {
        let &[status, pitch, velocity, ..] = message else {
            return None;
        };
        if pitch > 127 || velocity > 127 {
            return None;
        }
        match status & 0xF0 {
            0x90 if velocity > 0 => Some(Self::On { pitch, velocity }),
            0x90 | 0x80 => Some(Self::Off { pitch }),
            _ => None,
        }
    }
}

fn midi_input() -> Result<MidiInput> {
    let mut input =
        MidiInput::new(CLIENT_NAME).map_err(|e| EngineError::MidiDevice(e.to_string()))?;
    // Sysex, clock and active sensing never reach the callback
    input.ignore(Ignore::All);
    Ok(input)
}

/// Names of the MIDI input ports the system offers
pub fn input_port_names() -> Result<Vec<String>> {
    let input = midi_input()?;
    Ok(input
        .ports()
        .iter()
        .filter_map(|port| input.port_name(port).ok())
        .collect())
}

/// An open input port feeding a note queue
pub struct MidiInputDevice {
    name: String,
    notes: Receiver<InputNote>,
    _connection: MidiInputConnection<Sender<InputNote>>,
}

impl MidiInputDevice {
    /// Open the first port whose name contains `port_match`, or the first
    /// port when none is given
    pub fn connect(port_match: Option<&str>) -> Result<Self> {
        let input = midi_input()?;
        let ports = input.ports();
        let found: Option<(MidiInputPort, String)> = ports.iter().find_map(|port| {
            let name = input.port_name(port).ok()?;
            port_match
                .map_or(true, |m| name.contains(m))
                .then(|| (port.clone(), name))
        });
        let Some((port, name)) = found else {
            return Err(EngineError::MidiDevice(match port_match {
                Some(m) => format!("no MIDI input matches '{}'", m),
                None => "no MIDI input ports".into(),
            }));
        };

        let (tx, notes) = bounded(QUEUE_CAPACITY);
        let connection = input
            .connect(
                &port,
                "daw-engine-in",
                |_stamp, message, tx: &mut Sender<InputNote>| {
                    if let Some(note) = InputNote::parse(message) {
                        // A full queue means nobody is pumping; drop the note
                        let _ = tx.try_send(note);
                    }
                },
                tx,
            )
            .map_err(|e| EngineError::MidiDevice(e.to_string()))?;

        info!("MIDI input connected to '{}'", name);
        Ok(Self {
            name,
            notes,
            _connection: connection,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take every note received since the last call
    pub fn drain(&self) -> Vec<InputNote> {
        let notes: Vec<InputNote> = self.notes.try_iter().collect();
        if !notes.is_empty() {
            debug!("{} note(s) from '{}'", notes.len(), self.name);
        }
        notes
    }
}

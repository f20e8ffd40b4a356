//! Send routing between tracks
//!
//! Pure data structure with no audio dependencies. Sends are recorded and
//! validated (target must be a Return track, no cycles) but the graph does
//! not mix them yet; Return tracks pass their own chain output through.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::TrackId;

/// A parallel send from one track to a Return track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Send {
    pub target: TrackId,
    /// Send level in dB
    pub level_db: f32,
    /// Pre-fader (true) or post-fader (false)
    pub pre_fader: bool,
}

impl Send {
    pub fn new(target: TrackId, level_db: f32) -> Self {
        Self {
            target,
            level_db: level_db.min(super::MAX_VOLUME_DB),
            pre_fader: false,
        }
    }
}

/// Why a send was refused
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingError {
    SelfSend(TrackId),
    Cycle { from: TrackId, to: TrackId },
}

impl std::fmt::Display for RoutingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingError::SelfSend(track) => write!(f, "{} cannot send to itself", track),
            RoutingError::Cycle { from, to } => {
                write!(f, "send from {} to {} would create a cycle", from, to)
            }
        }
    }
}

impl std::error::Error for RoutingError {}

/// All sends, keyed by source track
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendGraph {
    sends: HashMap<TrackId, Vec<Send>>,
}

impl SendGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sends_from(&self, track: TrackId) -> &[Send] {
        self.sends.get(&track).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Add a send, replacing an existing send to the same target
    pub fn add_send(&mut self, from: TrackId, send: Send) -> Result<(), RoutingError> {
        if send.target == from {
            return Err(RoutingError::SelfSend(from));
        }

        let list = self.sends.entry(from).or_default();
        let previous = list.iter().position(|s| s.target == send.target);
        let old = match previous {
            Some(idx) => Some(std::mem::replace(&mut list[idx], send)),
            None => {
                list.push(send);
                None
            }
        };

        if self.has_cycle() {
            let list = self.sends.entry(from).or_default();
            match (previous, old) {
                (Some(idx), Some(old)) => list[idx] = old,
                _ => {
                    list.pop();
                }
            }
            return Err(RoutingError::Cycle {
                from,
                to: send.target,
            });
        }
        Ok(())
    }

    /// Remove the send from `from` to `target`. Returns whether one existed.
    pub fn remove_send(&mut self, from: TrackId, target: TrackId) -> bool {
        let Some(list) = self.sends.get_mut(&from) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.target != target);
        before != list.len()
    }

    /// Drop every send from or to a deleted track
    pub fn remove_track(&mut self, track: TrackId) {
        self.sends.remove(&track);
        for list in self.sends.values_mut() {
            list.retain(|s| s.target != track);
        }
        self.sends.retain(|_, list| !list.is_empty());
    }

    /// DFS with coloring: missing = unvisited, 1 = in progress, 2 = done
    pub fn has_cycle(&self) -> bool {
        fn dfs(graph: &SendGraph, node: TrackId, color: &mut HashMap<TrackId, u8>) -> bool {
            color.insert(node, 1);
            for send in graph.sends_from(node) {
                match color.get(&send.target).copied() {
                    Some(1) => return true,
                    None if dfs(graph, send.target, color) => return true,
                    _ => {}
                }
            }
            color.insert(node, 2);
            false
        }

        let mut color = HashMap::new();
        let mut sources: Vec<TrackId> = self.sends.keys().copied().collect();
        sources.sort();
        for node in sources {
            if !color.contains_key(&node) && dfs(self, node, &mut color) {
                return true;
            }
        }
        false
    }
}

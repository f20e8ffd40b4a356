//! Opaque handles for tracks, clips and effects
//!
//! Everything the engine owns lives in flat collections addressed by these
//! ids. Cross references are ids, never pointers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

/// An audio or MIDI clip identifier (one id space for both)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipId(pub u64);

/// An effect instance identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectId(pub u64);

impl TrackId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl ClipId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl EffectId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip#{}", self.0)
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "effect#{}", self.0)
    }
}

/// Hands out ids from a single counter so no two handles ever collide
#[derive(Debug)]
pub struct IdAllocator {
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Make sure future ids are above everything seen in a loaded project
    pub fn reserve_past(&mut self, raw: u64) {
        if raw >= self.next {
            self.next = raw + 1;
        }
    }

    fn take(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn track(&mut self) -> TrackId {
        TrackId(self.take())
    }

    pub fn clip(&mut self) -> ClipId {
        ClipId(self.take())
    }

    pub fn effect(&mut self) -> EffectId {
        EffectId(self.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_never_collide_across_kinds() {
        let mut ids = IdAllocator::new();
        let t = ids.track();
        let c = ids.clip();
        let e = ids.effect();
        assert_ne!(t.raw(), c.raw());
        assert_ne!(c.raw(), e.raw());
    }

    #[test]
    fn reserve_past_skips_loaded_ids() {
        let mut ids = IdAllocator::new();
        ids.reserve_past(41);
        assert_eq!(ids.track(), TrackId(42));
        // Lower ids don't move the counter back
        ids.reserve_past(3);
        assert_eq!(ids.clip(), ClipId(43));
    }
}

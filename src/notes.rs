//! Note and duration tables
//!
//! Each pitch is one hammer (device) resting at one servo position. Both
//! tables are loaded once from configuration and never change afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{CymbalError, CymbalResult};
use crate::protocol::DeviceId;

/// Where a note is played: which hammer, at which rest position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotePlacement {
    pub device: DeviceId,
    pub position: u8,
}

/// Note symbol → hammer placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteTable {
    notes: BTreeMap<char, NotePlacement>,
}

impl NoteTable {
    pub fn new(notes: impl IntoIterator<Item = (char, NotePlacement)>) -> Self {
        Self {
            notes: notes.into_iter().collect(),
        }
    }

    pub fn get(&self, note: char) -> Option<NotePlacement> {
        self.notes.get(&note).copied()
    }

    /// Like `get`, failing on unknown symbols
    pub fn lookup(&self, note: char) -> CymbalResult<NotePlacement> {
        self.get(note).ok_or(CymbalError::UnknownNote(note))
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, NotePlacement)> + '_ {
        self.notes.iter().map(|(note, placement)| (*note, *placement))
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

impl Default for NoteTable {
    /// Two hammers, six pitches each
    fn default() -> Self {
        let placements = [
            ('G', 1, 45),
            ('A', 1, 43),
            ('H', 1, 40),
            ('C', 1, 38),
            ('D', 1, 36),
            ('E', 1, 34),
            ('F', 2, 48),
            ('g', 2, 45),
            ('a', 2, 43),
            ('h', 2, 41),
            ('c', 2, 39),
            ('d', 2, 37),
        ];
        Self::new(placements.into_iter().map(|(note, device, position)| {
            (
                note,
                NotePlacement {
                    device: DeviceId(device),
                    position,
                },
            )
        }))
    }
}

/// Duration symbol → delay before the next note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationTable {
    durations: BTreeMap<char, Duration>,
}

impl DurationTable {
    pub fn new(durations: impl IntoIterator<Item = (char, Duration)>) -> Self {
        Self {
            durations: durations.into_iter().collect(),
        }
    }

    pub fn lookup(&self, symbol: char) -> CymbalResult<Duration> {
        self.durations
            .get(&symbol)
            .copied()
            .ok_or(CymbalError::UnknownDuration(symbol))
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, Duration)> + '_ {
        self.durations.iter().map(|(symbol, delay)| (*symbol, *delay))
    }
}

impl Default for DurationTable {
    fn default() -> Self {
        Self::new([
            ('O', Duration::from_millis(400)),
            ('o', Duration::from_millis(250)),
            ('.', Duration::from_millis(120)),
            (',', Duration::from_millis(600)),
        ])
    }
}

//! Keyboard input events
//!
//! Decodes Linux `input_event` records into the three fields the dispatcher
//! cares about. Timestamps are skipped.

pub mod reader;

use bytes::Buf;
use serde::{Deserialize, Serialize};

pub use reader::EventReader;

/// `EV_KEY`: key press/release/repeat
pub const EV_KEY: u16 = 0x01;

/// Key value for a fresh press (0 = release, 2 = autorepeat)
pub const KEY_PRESSED: u32 = 0x01;

/// `input_event` record layout, set by the size of its `struct timeval` prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLayout {
    /// 32-bit time_t: 16-byte records
    #[default]
    Compact,
    /// 64-bit time_t: 24-byte records
    Wide,
}

impl RecordLayout {
    pub fn record_len(self) -> usize {
        match self {
            RecordLayout::Compact => 16,
            RecordLayout::Wide => 24,
        }
    }

    fn timeval_len(self) -> usize {
        self.record_len() - 8
    }
}

/// Decoded input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: u16,
    pub code: u16,
    pub value: u32,
}

impl InputEvent {
    pub fn new(kind: u16, code: u16, value: u32) -> Self {
        Self { kind, code, value }
    }

    /// Key-down event for `code`
    pub fn key_press(code: u16) -> Self {
        Self::new(EV_KEY, code, KEY_PRESSED)
    }

    /// Decode one little-endian record; `None` when the length is wrong
    pub fn decode(mut record: &[u8], layout: RecordLayout) -> Option<Self> {
        if record.len() != layout.record_len() {
            return None;
        }
        record.advance(layout.timeval_len());
        let kind = record.get_u16_le();
        let code = record.get_u16_le();
        let value = record.get_u32_le();
        Some(Self { kind, code, value })
    }

    /// Only fresh key presses trigger actions
    pub fn is_key_press(&self) -> bool {
        self.kind == EV_KEY && self.value == KEY_PRESSED
    }
}

//! Hammer bus protocol
//!
//! Frame layout shared by every actuator on the bus (no slave select, the
//! device id is the address):
//!
//! ```text
//! +-------------+--------+--------+---------+----------+
//! | SYNC (0x69) | DEV_ID | OPCODE | PAYLOAD | CHECKSUM |
//! +-------------+--------+--------+---------+----------+
//! ```
//!
//! The checksum is `(DEV_ID + OPCODE + PAYLOAD) mod 256`. Actuators drop any
//! frame whose checksum does not match.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Start-of-frame marker
pub const SYNC_BYTE: u8 = 0x69;

/// Encoded frame length, sync byte included
pub const FRAME_LEN: usize = 5;

/// Lowest duty the servo accepts (~780us pulse)
pub const MIN_POSITION: u8 = 25;

/// Highest duty the servo accepts (~2150us pulse)
pub const MAX_POSITION: u8 = 68;

/// Rest position every device is assumed to hold at power-on
pub const START_POSITION: u8 = 40;

/// Strike payload that releases the hammer solenoid
pub const STRIKE_RELEASE: u8 = 0x00;

/// Strike payload that holds the hammer solenoid until released
pub const STRIKE_HOLD: u8 = 0xFF;

/// Whether a raw position lies inside `[MIN_POSITION, MAX_POSITION]`
pub fn in_bounds(position: i32) -> bool {
    (MIN_POSITION as i32..=MAX_POSITION as i32).contains(&position)
}

/// Address of one actuator on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u8);

impl DeviceId {
    /// Every actuator accepts frames sent to this id
    pub const BROADCAST: DeviceId = DeviceId(0xFF);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl From<u8> for DeviceId {
    fn from(id: u8) -> Self {
        DeviceId(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            write!(f, "broadcast")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Opcodes understood by the actuator firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Set servo duty, payload in `[MIN_POSITION, MAX_POSITION]`
    SetPosition = 0x01,
    /// Store a new device id in EEPROM
    ProgramId = 0x05,
    /// Drive the solenoid: 0 = off, 255 = on, otherwise a 10ms * payload pulse
    Strike = 0x06,
    /// Release every output pin
    Stop = 0x09,
    /// Re-enable outputs after `Stop`
    Start = 0x0D,
    /// Store the power-on duty in EEPROM
    ProgramStartPosition = 0x3C,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Opcode::SetPosition),
            0x05 => Some(Opcode::ProgramId),
            0x06 => Some(Opcode::Strike),
            0x09 => Some(Opcode::Stop),
            0x0D => Some(Opcode::Start),
            0x3C => Some(Opcode::ProgramStartPosition),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Controller-level request addressed to one device (or broadcast)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Absolute position, dropped when out of bounds
    SetPosition(i32),
    /// Relative jog, clamped into bounds
    Move(i32),
    /// Reassign the addressed device to a new id
    ProgramId(DeviceId),
    /// Hammer strike; durations above 255 are masked
    Strike(u32),
    /// Persist the power-on position
    ProgramStartPosition(u8),
    Stop,
    Start,
}

impl Command {
    /// Opcode used on the wire; `Move` is resolved locally into `SetPosition`
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::SetPosition(_) | Command::Move(_) => Opcode::SetPosition,
            Command::ProgramId(_) => Opcode::ProgramId,
            Command::Strike(_) => Opcode::Strike,
            Command::ProgramStartPosition(_) => Opcode::ProgramStartPosition,
            Command::Stop => Opcode::Stop,
            Command::Start => Opcode::Start,
        }
    }
}

/// Frame decoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame must be {FRAME_LEN} bytes, got {0}")]
    Length(usize),

    #[error("missing sync byte, got 0x{0:02X}")]
    Sync(u8),

    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },

    #[error("unknown opcode 0x{0:02X}")]
    Opcode(u8),
}

/// One checksummed bus message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub device: DeviceId,
    pub opcode: Opcode,
    pub payload: u8,
}

impl Frame {
    pub fn new(device: DeviceId, opcode: Opcode, payload: u8) -> Self {
        Self {
            device,
            opcode,
            payload,
        }
    }

    /// Sum of address, opcode and payload, modulo 256
    pub fn checksum(&self) -> u8 {
        checksum(&[self.device.0, self.opcode.as_byte(), self.payload])
    }

    /// Wire encoding, sync byte first
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        [
            SYNC_BYTE,
            self.device.0,
            self.opcode.as_byte(),
            self.payload,
            self.checksum(),
        ]
    }

    /// Parse and validate a frame the way an actuator would
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() != FRAME_LEN {
            return Err(FrameError::Length(data.len()));
        }
        if data[0] != SYNC_BYTE {
            return Err(FrameError::Sync(data[0]));
        }

        let expected = checksum(&data[1..4]);
        if expected != data[4] {
            return Err(FrameError::Checksum {
                expected,
                actual: data[4],
            });
        }

        let opcode = Opcode::from_byte(data[2]).ok_or(FrameError::Opcode(data[2]))?;

        Ok(Frame {
            device: DeviceId(data[1]),
            opcode,
            payload: data[3],
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode {
            Opcode::SetPosition => write!(f, "SetPosition {} pos:{}", self.device, self.payload),
            Opcode::ProgramId => write!(f, "ProgramId {} -> #{}", self.device, self.payload),
            Opcode::Strike => match self.payload {
                STRIKE_RELEASE => write!(f, "Strike {} release", self.device),
                STRIKE_HOLD => write!(f, "Strike {} hold", self.device),
                n => write!(f, "Strike {} {}ms", self.device, n as u32 * 10),
            },
            Opcode::Stop => write!(f, "Stop {}", self.device),
            Opcode::Start => write!(f, "Start {}", self.device),
            Opcode::ProgramStartPosition => {
                write!(f, "ProgramStartPosition {} pos:{}", self.device, self.payload)
            }
        }
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_set_position() {
        let frame = Frame::new(DeviceId(1), Opcode::SetPosition, 45);
        assert_eq!(frame.encode(), [0x69, 0x01, 0x01, 45, 47]);
    }

    #[test]
    fn test_checksum_wraps() {
        // 0xFF + 0x06 + 0xFF = 0x204
        let frame = Frame::new(DeviceId::BROADCAST, Opcode::Strike, 0xFF);
        assert_eq!(frame.checksum(), 0x04);
        assert_eq!(frame.encode(), [0x69, 0xFF, 0x06, 0xFF, 0x04]);
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert_eq!(Frame::decode(&[0x69, 1, 1]), Err(FrameError::Length(3)));
        assert_eq!(
            Frame::decode(&[0x00, 1, 1, 40, 42]),
            Err(FrameError::Sync(0x00))
        );
        assert_eq!(
            Frame::decode(&[0x69, 1, 1, 40, 41]),
            Err(FrameError::Checksum {
                expected: 42,
                actual: 41
            })
        );
        assert_eq!(
            Frame::decode(&[0x69, 1, 0x07, 0, 8]),
            Err(FrameError::Opcode(0x07))
        );
    }

    #[test]
    fn test_decode_program_id() {
        let frame = Frame::decode(&[0x69, 0xFF, 0x05, 0x02, 0x06]).unwrap();
        assert_eq!(frame.device, DeviceId::BROADCAST);
        assert_eq!(frame.opcode, Opcode::ProgramId);
        assert_eq!(frame.payload, 2);
    }

    #[test]
    fn test_opcode_bytes() {
        assert_eq!(Opcode::SetPosition.as_byte(), 0x01);
        assert_eq!(Opcode::ProgramId.as_byte(), 0x05);
        assert_eq!(Opcode::Strike.as_byte(), 0x06);
        assert_eq!(Opcode::ProgramStartPosition.as_byte(), 0x3C);
        assert_eq!(Command::Move(-3).opcode(), Opcode::SetPosition);
    }

    #[test]
    fn test_bounds() {
        assert!(!in_bounds(24));
        assert!(in_bounds(25));
        assert!(in_bounds(START_POSITION as i32));
        assert!(in_bounds(68));
        assert!(!in_bounds(69));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Frame::new(DeviceId(2), Opcode::Strike, 2).to_string(),
            "Strike #2 20ms"
        );
        assert_eq!(
            Frame::new(DeviceId::BROADCAST, Opcode::Strike, 0).to_string(),
            "Strike broadcast release"
        );
    }

    proptest! {
        #[test]
        fn checksum_is_sum_mod_256(device in any::<u8>(), payload in any::<u8>()) {
            for opcode in [Opcode::SetPosition, Opcode::ProgramId, Opcode::Strike] {
                let bytes = Frame::new(DeviceId(device), opcode, payload).encode();
                let expected = ((device as u32 + opcode.as_byte() as u32 + payload as u32) % 256) as u8;
                prop_assert_eq!(bytes[0], SYNC_BYTE);
                prop_assert_eq!(bytes[4], expected);
                prop_assert!(Frame::decode(&bytes).is_ok());
            }
        }
    }
}

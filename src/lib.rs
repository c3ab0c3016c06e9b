//! Cymbal GW - drive bus-addressed percussion hammers
//!
//! Two command producers (the note-sheet [`player`] and the keyboard
//! [`dispatcher`]) feed the timed [`sequencer`], which drives the
//! [`controller`], which writes [`protocol`] frames to a [`transport`].

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod input;
pub mod notes;
pub mod player;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod transport;

pub use controller::DeviceController;
pub use dispatcher::{Action, DispatchSettings, Dispatcher};
pub use error::{CymbalError, CymbalResult};
pub use protocol::{DeviceId, Frame, Opcode};
pub use sequencer::{Sequencer, Timing};

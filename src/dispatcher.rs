//! Keyboard event dispatcher
//!
//! Maps key presses to hammer actions through a static key table. Handles:
//! - Jogging the active hammer (A S D F)
//! - Striking the active hammer or all of them (right shift, space)
//! - Resetting every hammer to rest (tab)
//! - Playing notes (Q W E R T Y U I O P [ ])
//! - Switching the active hammer (left shift)
//! - The full broadcast gesture (keypad enter)

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::error::CymbalResult;
use crate::input::InputEvent;
use crate::protocol::{Command, DeviceId, START_POSITION};
use crate::sequencer::Sequencer;

/// What a key does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Relative move of the active hammer
    Jog(i32),
    StrikeActive,
    StrikeAll,
    /// Broadcast the rest position
    ResetAll,
    Note(char),
    ToggleDevice,
    FullGesture,
}

/// Key code → action (Linux input key codes)
pub const KEYMAP: &[(u16, Action)] = &[
    (0x1E, Action::Jog(2)),  // A
    (0x1F, Action::Jog(1)),  // S
    (0x20, Action::Jog(-1)), // D
    (0x21, Action::Jog(-2)), // F
    (0x36, Action::StrikeActive), // right shift
    (0x39, Action::StrikeAll),    // space
    (0x0F, Action::ResetAll),     // tab
    (0x10, Action::Note('G')), // Q
    (0x11, Action::Note('A')), // W
    (0x12, Action::Note('H')), // E
    (0x13, Action::Note('C')), // R
    (0x14, Action::Note('D')), // T
    (0x15, Action::Note('E')), // Y
    (0x16, Action::Note('F')), // U
    (0x17, Action::Note('g')), // I
    (0x18, Action::Note('a')), // O
    (0x19, Action::Note('h')), // P
    (0x1A, Action::Note('c')), // [
    (0x1B, Action::Note('d')), // ]
    (0x2A, Action::ToggleDevice), // left shift
    (0x60, Action::FullGesture),  // keypad enter
];

/// Look up the action bound to a key code
pub fn action_for(code: u16) -> Option<Action> {
    KEYMAP
        .iter()
        .find(|(key, _)| *key == code)
        .map(|(_, action)| *action)
}

/// Dispatcher settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Hammer selected at startup
    pub initial_device: DeviceId,
    /// The two hammers the toggle key switches between
    pub toggle_devices: (DeviceId, DeviceId),
    /// Upper bound on one wait for input before re-checking the running flag
    pub poll_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            initial_device: DeviceId(1),
            toggle_devices: (DeviceId(1), DeviceId(2)),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

/// Input event dispatcher driving the sequencer
pub struct Dispatcher {
    sequencer: Sequencer,
    settings: DispatchSettings,
    /// Hammer targeted by jog and strike keys
    active_device: DeviceId,
}

impl Dispatcher {
    pub fn new(sequencer: Sequencer, settings: DispatchSettings) -> Self {
        Self {
            sequencer,
            active_device: settings.initial_device,
            settings,
        }
    }

    pub fn active_device(&self) -> DeviceId {
        self.active_device
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut Sequencer {
        &mut self.sequencer
    }

    pub fn into_sequencer(self) -> Sequencer {
        self.sequencer
    }

    /// Handle one input event to completion
    ///
    /// Returns the action performed, `None` for ignored events.
    pub async fn dispatch(&mut self, event: &InputEvent) -> CymbalResult<Option<Action>> {
        if !event.is_key_press() {
            return Ok(None);
        }

        let Some(action) = action_for(event.code) else {
            debug!("Unbound key code {:02X}", event.code);
            return Ok(None);
        };

        trace!("Key {:02X} -> {:?}", event.code, action);
        self.perform(action).await?;
        Ok(Some(action))
    }

    async fn perform(&mut self, action: Action) -> CymbalResult<()> {
        let strike_duration = self.sequencer.timing().strike_duration;

        let controller = self.sequencer.controller_mut();
        match action {
            Action::Jog(delta) => {
                controller
                    .execute(self.active_device, Command::Move(delta))
                    .await
            }
            Action::StrikeActive => {
                controller
                    .execute(self.active_device, Command::Strike(strike_duration))
                    .await
            }
            Action::StrikeAll => {
                controller
                    .execute(DeviceId::BROADCAST, Command::Strike(strike_duration))
                    .await
            }
            Action::ResetAll => {
                controller
                    .execute(
                        DeviceId::BROADCAST,
                        Command::SetPosition(START_POSITION as i32),
                    )
                    .await
            }
            Action::Note(note) => self.sequencer.strike_note(note).await,
            Action::ToggleDevice => {
                let (first, second) = self.settings.toggle_devices;
                self.active_device = if self.active_device == first {
                    second
                } else {
                    first
                };
                info!("Active hammer: {}", self.active_device);
                Ok(())
            }
            Action::FullGesture => self.sequencer.full_gesture().await,
        }
    }

    /// Interactive loop: dispatch events until `running` is cleared or the
    /// input stream ends
    ///
    /// Each event is handled to completion before the next is received, so
    /// keys pressed during a gesture queue up behind it. Lookup errors are
    /// logged and skipped; a transport failure ends the loop with an error.
    pub async fn run(
        &mut self,
        events: &mut mpsc::Receiver<InputEvent>,
        running: &AtomicBool,
    ) -> CymbalResult<()> {
        info!(
            "Dispatcher ready (active hammer {}, poll every {:?})",
            self.active_device, self.settings.poll_timeout
        );

        while running.load(Ordering::Relaxed) {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        warn!("Input stream closed, leaving interactive loop");
                        break;
                    };

                    match self.dispatch(&event).await {
                        Ok(_) => {}
                        Err(e) if e.is_lookup() => {
                            warn!("Key {:02X} skipped: {}", event.code, e);
                        }
                        Err(e) => {
                            error!("Bus failure while handling key {:02X}: {}", event.code, e);
                            return Err(e);
                        }
                    }
                }
                _ = tokio::time::sleep(self.settings.poll_timeout) => {
                    // Re-check the running flag
                }
            }
        }

        info!("Dispatcher stopped");
        Ok(())
    }
}

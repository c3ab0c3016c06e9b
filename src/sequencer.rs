//! Timed command sequencing
//!
//! Wraps the controller with the waits the mechanics need: a servo move has
//! to settle before the hammer fires, otherwise the strike lands between
//! pitches. All waits are awaited inline, so a gesture always completes
//! before the caller handles its next input.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::controller::DeviceController;
use crate::error::CymbalResult;
use crate::notes::{DurationTable, NoteTable};
use crate::protocol::{DeviceId, STRIKE_HOLD, STRIKE_RELEASE};

/// Full-gesture upper position
pub const GESTURE_HIGH_POSITION: u8 = 45;

/// Full-gesture lower position
pub const GESTURE_LOW_POSITION: u8 = 34;

/// Timing knobs for the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait after a position change before the next command
    pub settle: Duration,
    /// Strike payload for regular notes (firmware pulses 10ms per unit)
    pub strike_duration: u32,
    /// Pause between full-gesture steps
    pub gesture_pause: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(120),
            strike_duration: 2,
            gesture_pause: Duration::from_millis(200),
        }
    }
}

/// Sequencer owning the controller and the static note/duration tables
pub struct Sequencer {
    controller: DeviceController,
    notes: NoteTable,
    durations: DurationTable,
    timing: Timing,
}

impl Sequencer {
    pub fn new(
        controller: DeviceController,
        notes: NoteTable,
        durations: DurationTable,
        timing: Timing,
    ) -> Self {
        Self {
            controller,
            notes,
            durations,
            timing,
        }
    }

    pub fn controller(&self) -> &DeviceController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut DeviceController {
        &mut self.controller
    }

    pub fn notes(&self) -> &NoteTable {
        &self.notes
    }

    pub fn durations(&self) -> &DurationTable {
        &self.durations
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Set a position and wait for the servo to settle if it actually moved
    pub async fn move_and_wait(&mut self, device: DeviceId, position: i32) -> CymbalResult<()> {
        let before = self.controller.position(device);
        self.controller.set_position(device, position).await?;
        let after = self.controller.position(device);

        if before != after {
            debug!(
                "Settling {} ({} -> {}) for {:?}",
                device, before, after, self.timing.settle
            );
            sleep(self.timing.settle).await;
        }
        Ok(())
    }

    /// Move into position, settle, strike
    pub async fn strike_at(
        &mut self,
        device: DeviceId,
        position: i32,
        strike_duration: u32,
    ) -> CymbalResult<()> {
        self.move_and_wait(device, position).await?;
        self.controller.strike(strike_duration, device).await
    }

    /// Ring one note from the note table
    pub async fn strike_note(&mut self, note: char) -> CymbalResult<()> {
        let placement = self.notes.lookup(note)?;
        debug!(
            "Note '{}' -> {} at {}",
            note, placement.device, placement.position
        );
        self.strike_at(
            placement.device,
            placement.position as i32,
            self.timing.strike_duration,
        )
        .await
    }

    /// Broadcast swell: hold the hammers high, drop them low, release
    ///
    /// Positions and strike payloads are fixed and independent of the note
    /// table.
    pub async fn full_gesture(&mut self) -> CymbalResult<()> {
        info!("Full gesture");
        let all = DeviceId::BROADCAST;

        self.move_and_wait(all, GESTURE_HIGH_POSITION as i32).await?;
        self.controller.strike(STRIKE_HOLD as u32, all).await?;
        sleep(self.timing.gesture_pause).await;
        self.move_and_wait(all, GESTURE_LOW_POSITION as i32).await?;
        sleep(self.timing.gesture_pause).await;
        self.controller.strike(STRIKE_RELEASE as u32, all).await
    }

    /// Close the bus transport
    pub async fn shutdown(&mut self) -> CymbalResult<()> {
        self.controller.shutdown().await
    }
}

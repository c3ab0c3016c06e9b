//! Device controller - owns per-device positions and talks to the bus
//!
//! Positions are a local cache of what was last commanded. The bus has no
//! read-back path, so `position()` is never ground truth: a device that was
//! power-cycled or addressed through broadcast may hold a different value.
//!
//! Two range policies coexist and are kept apart on purpose:
//! - `set_position` drops out-of-range values silently (no frame, no change)
//! - `move_by` clamps the target into range before setting it

use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::CymbalResult;
use crate::protocol::{
    in_bounds, Command, DeviceId, Frame, Opcode, MAX_POSITION, MIN_POSITION, START_POSITION,
};
use crate::transport::BusTransport;

/// Hammer controller bound to one bus transport
pub struct DeviceController {
    transport: Box<dyn BusTransport>,
    /// Last commanded position per device (created lazily at START_POSITION)
    positions: HashMap<DeviceId, u8>,
}

impl DeviceController {
    pub fn new(transport: Box<dyn BusTransport>) -> Self {
        Self {
            transport,
            positions: HashMap::new(),
        }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Last position this controller sent to `device`
    pub fn position(&self, device: DeviceId) -> u8 {
        self.positions
            .get(&device)
            .copied()
            .unwrap_or(START_POSITION)
    }

    /// Move `device` to an absolute position
    ///
    /// Out-of-range positions are ignored. The cache is updated only once
    /// the frame went out. Setting the current position again re-sends it.
    pub async fn set_position(&mut self, device: DeviceId, position: i32) -> CymbalResult<()> {
        if !in_bounds(position) {
            debug!("Ignoring out-of-range position {} for {}", position, device);
            return Ok(());
        }

        let position = position as u8;
        self.send(Frame::new(device, Opcode::SetPosition, position))
            .await?;
        self.positions.insert(device, position);

        debug!("Position of {} now: {}", device, position);
        Ok(())
    }

    /// Jog `device` by `delta`, clamping the target into range
    pub async fn move_by(&mut self, device: DeviceId, delta: i32) -> CymbalResult<()> {
        let target = (self.position(device) as i32)
            .saturating_add(delta)
            .clamp(MIN_POSITION as i32, MAX_POSITION as i32);
        self.set_position(device, target).await
    }

    /// Tell the device(s) currently answering to `old_id` to adopt `new_id`
    pub async fn program_id(&mut self, new_id: DeviceId, old_id: DeviceId) -> CymbalResult<()> {
        info!("Programming device id {} -> {}", old_id, new_id);
        self.send(Frame::new(old_id, Opcode::ProgramId, new_id.0))
            .await
    }

    /// Fire the hammer; durations above 255 are masked into range
    pub async fn strike(&mut self, duration: u32, device: DeviceId) -> CymbalResult<()> {
        self.send(Frame::new(device, Opcode::Strike, (duration & 0xFF) as u8))
            .await
    }

    /// Persist the power-on position in the device EEPROM
    ///
    /// Out-of-range positions are ignored, like `set_position`.
    pub async fn program_start_position(
        &mut self,
        device: DeviceId,
        position: u8,
    ) -> CymbalResult<()> {
        if !in_bounds(position as i32) {
            debug!(
                "Ignoring out-of-range start position {} for {}",
                position, device
            );
            return Ok(());
        }
        info!("Programming start position of {}: {}", device, position);
        self.send(Frame::new(device, Opcode::ProgramStartPosition, position))
            .await
    }

    /// Release every actuator output
    pub async fn stop(&mut self, device: DeviceId) -> CymbalResult<()> {
        self.send(Frame::new(device, Opcode::Stop, 0)).await
    }

    /// Re-enable actuator outputs after `stop`
    pub async fn start(&mut self, device: DeviceId) -> CymbalResult<()> {
        self.send(Frame::new(device, Opcode::Start, 0)).await
    }

    /// Run a single command against `device`
    pub async fn execute(&mut self, device: DeviceId, command: Command) -> CymbalResult<()> {
        match command {
            Command::SetPosition(position) => self.set_position(device, position).await,
            Command::Move(delta) => self.move_by(device, delta).await,
            Command::ProgramId(new_id) => self.program_id(new_id, device).await,
            Command::Strike(duration) => self.strike(duration, device).await,
            Command::ProgramStartPosition(position) => {
                self.program_start_position(device, position).await
            }
            Command::Stop => self.stop(device).await,
            Command::Start => self.start(device).await,
        }
    }

    /// Close the transport handle
    pub async fn shutdown(&mut self) -> CymbalResult<()> {
        info!("Closing bus transport '{}'", self.transport.name());
        self.transport.close().await?;
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> CymbalResult<()> {
        let bytes = frame.encode();
        debug!("📤 {} [{}]", frame, hex::encode_upper(bytes));
        self.transport.send(&bytes).await?;
        Ok(())
    }
}

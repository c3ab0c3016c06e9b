//! Character-device transport (spidev and friends)
//!
//! Each frame goes out in a single `write`, which spidev turns into one
//! half-duplex transfer. The actuators' USI slave cannot follow the
//! kernel's default clock, so the bus speed is set when the node is opened.

use super::{BusTransport, TransportError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use spidev::{Spidev, SpidevOptions};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bus clock the actuator firmware keeps up with
pub const DEFAULT_SPEED_HZ: u32 = 10_000;

/// Transport writing frames to a character device node
pub struct DeviceFileTransport {
    path: PathBuf,
    device: Option<Spidev>,
}

impl DeviceFileTransport {
    /// Open the device node for writing
    ///
    /// With `speed_hz` set, the node must be a spidev device and its max
    /// clock is configured before any frame is sent. `None` keeps whatever
    /// the node is already set to.
    pub async fn open(path: impl AsRef<Path>, speed_hz: Option<u32>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        info!("Opening bus device: {}", path.display());

        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open bus device: {}", path.display()))?;
        let mut device = Spidev::new(file);

        if let Some(speed_hz) = speed_hz {
            device
                .configure(&SpidevOptions::new().max_speed_hz(speed_hz).build())
                .with_context(|| {
                    format!(
                        "Failed to set bus clock of {} to {} Hz",
                        path.display(),
                        speed_hz
                    )
                })?;
            info!("Bus clock set to {} Hz", speed_hz);
        }

        Ok(Self {
            path,
            device: Some(device),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One `write` call carrying the whole frame
fn write_frame(writer: &mut impl Write, frame: &[u8]) -> Result<(), TransportError> {
    let written = writer.write(frame)?;
    if written != frame.len() {
        return Err(TransportError::ShortWrite {
            written,
            expected: frame.len(),
        });
    }
    Ok(())
}

#[async_trait]
impl BusTransport for DeviceFileTransport {
    fn name(&self) -> &str {
        "device"
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut device = self
            .device
            .take()
            .ok_or_else(|| TransportError::Closed(self.path.display().to_string()))?;

        // The transfer blocks for the whole frame at bus speed
        let bytes = frame.to_vec();
        let (device, result) = tokio::task::spawn_blocking(move || {
            let result = write_frame(&mut device, &bytes);
            (device, result)
        })
        .await
        .map_err(|e| TransportError::Io(io::Error::other(e)))?;

        self.device = Some(device);
        result?;

        debug!("📤 {} <- {}", self.path.display(), hex::encode_upper(frame));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.device.take().is_some() {
            info!("Closed bus device: {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DeviceId, Frame, Opcode};
    use tempfile::NamedTempFile;

    /// Accepts at most `limit` bytes per write
    struct Narrow {
        limit: usize,
        accepted: Vec<u8>,
    }

    impl Write for Narrow {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let len = buf.len().min(self.limit);
            self.accepted.extend_from_slice(&buf[..len]);
            Ok(len)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_write_is_an_error() {
        let frame = Frame::new(DeviceId(1), Opcode::Strike, 2).encode();
        let mut narrow = Narrow {
            limit: 3,
            accepted: Vec::new(),
        };

        let err = write_frame(&mut narrow, &frame).unwrap_err();

        assert!(matches!(
            err,
            TransportError::ShortWrite {
                written: 3,
                expected: 5
            }
        ));
    }

    #[test]
    fn test_full_write_succeeds() {
        let frame = Frame::new(DeviceId(1), Opcode::Strike, 2).encode();
        let mut narrow = Narrow {
            limit: 16,
            accepted: Vec::new(),
        };

        write_frame(&mut narrow, &frame).unwrap();
        assert_eq!(narrow.accepted, frame);
    }

    #[tokio::test]
    async fn test_frames_reach_the_device_node() {
        let node = NamedTempFile::new().unwrap();
        let mut transport = DeviceFileTransport::open(node.path(), None).await.unwrap();

        let first = Frame::new(DeviceId(1), Opcode::SetPosition, 45).encode();
        let second = Frame::new(DeviceId(1), Opcode::Strike, 2).encode();
        transport.send(&first).await.unwrap();
        transport.send(&second).await.unwrap();
        transport.close().await.unwrap();

        let written = std::fs::read(node.path()).unwrap();
        assert_eq!(written, [first, second].concat());
    }

    #[tokio::test]
    async fn test_clock_setup_needs_a_spi_node() {
        // A plain file rejects the spidev ioctl
        let node = NamedTempFile::new().unwrap();
        let result = DeviceFileTransport::open(node.path(), Some(DEFAULT_SPEED_HZ)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let node = NamedTempFile::new().unwrap();
        let mut transport = DeviceFileTransport::open(node.path(), None).await.unwrap();
        transport.close().await.unwrap();

        let frame = Frame::new(DeviceId(1), Opcode::Strike, 2).encode();
        assert!(matches!(
            transport.send(&frame).await,
            Err(TransportError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = DeviceFileTransport::open(dir.path().join("spidev9.9"), None).await;
        assert!(result.is_err());
    }
}

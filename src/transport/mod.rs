//! Bus transports
//!
//! A transport moves one encoded frame onto the hammer bus. It has no
//! framing knowledge: the controller hands it complete, checksummed frames
//! and expects success or failure back.

use async_trait::async_trait;
use thiserror::Error;

pub mod console;
pub mod device;
pub mod memory;

pub use console::ConsoleTransport;
pub use device::DeviceFileTransport;
pub use memory::{MemoryBus, MemoryTransport, SentFrame};

/// Transmission failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("transport '{0}' is closed")]
    Closed(String),

    #[error("frame rejected: {0}")]
    Rejected(String),
}

/// Byte-frame sink for the hammer bus
///
/// Methods take `&mut self`: the bus carries a single frame at a time and
/// the owning controller serializes all access.
#[async_trait]
pub trait BusTransport: Send {
    /// Transport name used in logs (e.g. "spidev", "console")
    fn name(&self) -> &str;

    /// Transmit one complete frame. No retry: the bus has no acknowledgment.
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Release the underlying handle. Sending after close fails.
    ///
    /// Default implementation: nothing to release
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

//! Console transport - logs frames instead of driving hardware

use super::{BusTransport, TransportError};
use crate::protocol::Frame;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// ConsoleTransport logs every frame it is asked to send
///
/// Used for `--dry-run`, for trying note sheets without the instrument
/// attached, and for checking which frames a key produces.
pub struct ConsoleTransport {
    name: String,
    /// Frames accepted so far
    sent: u64,
    closed: bool,
}

impl ConsoleTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sent: 0,
            closed: false,
        }
    }

    /// Number of frames accepted
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

#[async_trait]
impl BusTransport for ConsoleTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed(self.name.clone()));
        }

        self.sent += 1;

        let described = match Frame::decode(frame) {
            Ok(decoded) => decoded.to_string(),
            Err(e) => {
                warn!("Console transport '{}' got a malformed frame: {}", self.name, e);
                "(malformed)".to_string()
            }
        };

        info!(
            "🔨 [{}] {} → {} [{}] [frame #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            self.name,
            described,
            hex::encode_upper(frame),
            self.sent
        );

        debug!(
            transport = self.name,
            bytes = ?frame,
            frame_count = self.sent,
            "ConsoleTransport send"
        );

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            info!(
                "🛑 Console transport '{}' closing ({} frames sent)",
                self.name, self.sent
            );
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DeviceId, Opcode};

    #[tokio::test]
    async fn test_console_transport_lifecycle() {
        let mut transport = ConsoleTransport::new("dry-run");
        assert_eq!(transport.name(), "dry-run");

        let frame = Frame::new(DeviceId(1), Opcode::SetPosition, 40).encode();
        transport.send(&frame).await.unwrap();
        transport.send(&frame).await.unwrap();
        assert_eq!(transport.sent(), 2);

        transport.close().await.unwrap();
        assert!(matches!(
            transport.send(&frame).await,
            Err(TransportError::Closed(_))
        ));
        assert_eq!(transport.sent(), 2);
    }

    #[tokio::test]
    async fn test_console_transport_accepts_malformed_bytes() {
        // Malformed frames are logged, not rejected: the console has no firmware to protect
        let mut transport = ConsoleTransport::new("dry-run");
        transport.send(&[0x00, 0x01]).await.unwrap();
        assert_eq!(transport.sent(), 1);
    }
}

//! In-memory transport for tests and simulations

use super::{BusTransport, TransportError};
use crate::protocol::Frame;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// A frame captured by [`MemoryTransport`]
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub bytes: Vec<u8>,
    /// Tokio clock reading at send time (follows paused test time)
    pub at: Instant,
}

impl SentFrame {
    pub fn decode(&self) -> Option<Frame> {
        Frame::decode(&self.bytes).ok()
    }
}

#[derive(Default)]
struct BusLog {
    frames: Vec<SentFrame>,
    failing: bool,
    closed: bool,
}

/// Inspection handle shared with a [`MemoryTransport`]
#[derive(Clone, Default)]
pub struct MemoryBus {
    log: Arc<Mutex<BusLog>>,
}

impl MemoryBus {
    /// Frames successfully sent so far
    pub fn frames(&self) -> Vec<SentFrame> {
        self.log.lock().unwrap().frames.clone()
    }

    /// Decoded frames, in send order
    pub fn decoded(&self) -> Vec<Frame> {
        self.frames().iter().filter_map(SentFrame::decode).collect()
    }

    pub fn len(&self) -> usize {
        self.log.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every following send fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.log.lock().unwrap().failing = failing;
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }
}

/// Transport that records frames instead of transmitting them
pub struct MemoryTransport {
    bus: MemoryBus,
}

impl MemoryTransport {
    /// Create a transport and the handle used to inspect it
    pub fn new() -> (Self, MemoryBus) {
        let bus = MemoryBus::default();
        (Self { bus: bus.clone() }, bus)
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut log = self.bus.log.lock().unwrap();
        if log.closed {
            return Err(TransportError::Closed("memory".to_string()));
        }
        if log.failing {
            return Err(TransportError::Rejected("injected failure".to_string()));
        }
        log.frames.push(SentFrame {
            bytes: frame.to_vec(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.bus.log.lock().unwrap().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DeviceId, Opcode};

    #[tokio::test]
    async fn test_records_and_fails_on_demand() {
        let (mut transport, bus) = MemoryTransport::new();
        let frame = Frame::new(DeviceId(2), Opcode::Strike, 2).encode();

        transport.send(&frame).await.unwrap();
        bus.set_failing(true);
        assert!(transport.send(&frame).await.is_err());
        bus.set_failing(false);
        transport.send(&frame).await.unwrap();

        assert_eq!(bus.len(), 2);
        assert_eq!(bus.decoded()[0].device, DeviceId(2));

        transport.close().await.unwrap();
        assert!(bus.is_closed());
        assert!(transport.send(&frame).await.is_err());
    }
}

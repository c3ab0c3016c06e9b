//! Input device reader
//!
//! Reads fixed-size records from an evdev node on its own task and forwards
//! decoded events over a channel. The task never touches the bus, so
//! ordering between input and commands is decided solely by the dispatcher.
//!
//! The node is opened non-blocking and polled through the runtime's reactor,
//! so aborting the reader task drops the descriptor immediately instead of
//! leaving a read parked on the blocking pool.

use anyhow::{Context as _, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{InputEvent, RecordLayout};

/// Non-blocking input device node registered with the tokio reactor
pub struct InputDevice {
    inner: AsyncFd<File>,
}

impl InputDevice {
    /// Open `path` read-only with `O_NONBLOCK`
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        Ok(Self {
            inner: AsyncFd::new(file)?,
        })
    }
}

impl AsyncRead for InputDevice {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;

            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                // Spurious wakeup, readiness was cleared
                Err(_would_block) => continue,
            }
        }
    }
}

/// Record reader over any async byte source
pub struct EventReader<R> {
    source: R,
    layout: RecordLayout,
    name: String,
}

impl EventReader<InputDevice> {
    /// Open an input device node (e.g. `/dev/input/by-path/...-event-kbd`)
    pub async fn open(path: impl AsRef<Path>, layout: RecordLayout) -> Result<Self> {
        let path = path.as_ref();
        let device = InputDevice::open(path)
            .with_context(|| format!("Failed to open input device: {}", path.display()))?;

        info!("Opened input device: {} ({:?} records)", path.display(), layout);
        Ok(Self::new(device, layout, path.display().to_string()))
    }
}

impl<R> EventReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(source: R, layout: RecordLayout, name: impl Into<String>) -> Self {
        Self {
            source,
            layout,
            name: name.into(),
        }
    }

    /// Spawn the read loop; it ends on EOF, read error, or when the
    /// receiver is dropped. Aborting the handle drops the source at the
    /// task's next poll.
    pub fn spawn(mut self, tx: mpsc::Sender<InputEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut record = vec![0u8; self.layout.record_len()];
            debug!("Input reader started for {}", self.name);

            loop {
                if let Err(e) = self.source.read_exact(&mut record).await {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        info!("Input stream {} ended", self.name);
                    } else {
                        warn!("Failed to read from {}: {}", self.name, e);
                    }
                    break;
                }

                let Some(event) = InputEvent::decode(&record, self.layout) else {
                    continue;
                };
                trace!(
                    "Input event type:{:02X} code:{:02X} value:{:02X}",
                    event.kind,
                    event.code,
                    event.value
                );

                if tx.send(event).await.is_err() {
                    debug!("Input receiver dropped, stopping reader");
                    break;
                }
            }

            debug!("Input reader stopped for {}", self.name);
        })
    }
}

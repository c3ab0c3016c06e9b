//! Program sessions
//!
//! A session owns the sequencer from the moment the bus is open until it is
//! closed again. Every path out of a session, errors included, closes the
//! bus transport and drops the input device.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dispatcher::{DispatchSettings, Dispatcher};
use crate::input::EventReader;
use crate::player;
use crate::protocol::{Command, DeviceId};
use crate::sequencer::Sequencer;

/// Events buffered between the reader task and the dispatcher
const EVENT_QUEUE: usize = 256;

/// One-shot EEPROM programming requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Programming {
    /// Device addressed (broadcast reaches every device on the bus)
    pub target: DeviceId,
    pub new_id: Option<DeviceId>,
    pub start_position: Option<u8>,
}

/// Optional sheet playback followed by the interactive loop
///
/// `open_input` is awaited only once the sheet is done, so a sheet can be
/// played while the keyboard is still unplugged.
pub async fn run<R, O>(
    mut sequencer: Sequencer,
    settings: DispatchSettings,
    sheet: Option<&Path>,
    open_input: O,
    running: &AtomicBool,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    O: Future<Output = Result<EventReader<R>>>,
{
    if let Some(path) = sheet {
        if let Err(e) = play_sheet(&mut sequencer, path, running).await {
            release(&mut sequencer).await;
            return Err(e);
        }
    }

    let mut dispatcher = Dispatcher::new(sequencer, settings);

    let outcome = match open_input.await {
        Ok(reader) => {
            let (event_tx, mut event_rx) = mpsc::channel(EVENT_QUEUE);
            let reader_task = reader.spawn(event_tx);

            let outcome = dispatcher
                .run(&mut event_rx, running)
                .await
                .context("Interactive loop failed");

            // The reader (and its device) is dropped with the task
            reader_task.abort();
            let _ = reader_task.await;
            info!("Input device released");
            outcome
        }
        Err(e) => Err(e),
    };

    release(dispatcher.sequencer_mut()).await;
    outcome
}

/// Play a sheet file; lookup errors stop the sheet but not the program
pub async fn play_sheet(
    sequencer: &mut Sequencer,
    path: &Path,
    running: &AtomicBool,
) -> Result<()> {
    let sheet = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read note sheet: {}", path.display()))?;

    info!("Playing note sheet: {}", path.display());

    match player::play(sequencer, &sheet, running).await {
        Ok(summary) => {
            info!(
                "✅ Sheet finished: {} notes played, {} tokens skipped{}",
                summary.played,
                summary.skipped,
                if summary.interrupted { " (interrupted)" } else { "" }
            );
            Ok(())
        }
        Err(e) if e.is_lookup() => {
            warn!("⚠️  Sheet playback stopped: {}", e);
            Ok(())
        }
        Err(e) => Err(e).context("Sheet playback failed"),
    }
}

/// Send the programming frames, then close the bus
pub async fn program(mut sequencer: Sequencer, request: Programming) -> Result<()> {
    let mut commands = Vec::new();
    if let Some(new_id) = request.new_id {
        commands.push(Command::ProgramId(new_id));
    }
    if let Some(position) = request.start_position {
        commands.push(Command::ProgramStartPosition(position));
    }

    let mut outcome = Ok(());
    for command in commands {
        outcome = sequencer
            .controller_mut()
            .execute(request.target, command)
            .await;
        if outcome.is_err() {
            break;
        }
    }

    release(&mut sequencer).await;
    outcome.context("Programming failed")
}

async fn release(sequencer: &mut Sequencer) {
    if let Err(e) = sequencer.shutdown().await {
        warn!("Failed to close bus transport: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::DeviceController;
    use crate::input::{RecordLayout, EV_KEY};
    use crate::notes::{DurationTable, NoteTable};
    use crate::protocol::Opcode;
    use crate::sequencer::Timing;
    use crate::transport::{MemoryBus, MemoryTransport};
    use std::io::Cursor;

    fn make_sequencer() -> (Sequencer, MemoryBus) {
        let (transport, bus) = MemoryTransport::new();
        let sequencer = Sequencer::new(
            DeviceController::new(Box::new(transport)),
            NoteTable::default(),
            DurationTable::default(),
            Timing::default(),
        );
        (sequencer, bus)
    }

    type KeyStream = std::future::Ready<Result<EventReader<Cursor<Vec<u8>>>>>;

    fn keys(codes: &[u16]) -> KeyStream {
        std::future::ready(Ok(key_stream(codes)))
    }

    fn no_keyboard() -> KeyStream {
        std::future::ready(Err(anyhow::anyhow!("no keyboard")))
    }

    fn key_stream(codes: &[u16]) -> EventReader<Cursor<Vec<u8>>> {
        let mut bytes = Vec::new();
        for code in codes {
            bytes.extend_from_slice(&[0u8; 8]);
            bytes.extend_from_slice(&EV_KEY.to_le_bytes());
            bytes.extend_from_slice(&code.to_le_bytes());
            bytes.extend_from_slice(&1u32.to_le_bytes());
        }
        EventReader::new(Cursor::new(bytes), RecordLayout::Compact, "keys")
    }

    #[tokio::test(start_paused = true)]
    async fn test_sheet_then_keys_then_release() {
        let (sequencer, bus) = make_sequencer();
        let sheet = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(sheet.path(), "Go").unwrap();
        let running = AtomicBool::new(true);

        run(
            sequencer,
            DispatchSettings::default(),
            Some(sheet.path()),
            keys(&[0x39]),
            &running,
        )
        .await
        .unwrap();

        let opcodes: Vec<Opcode> = bus.decoded().iter().map(|f| f.opcode).collect();
        assert_eq!(
            opcodes,
            vec![Opcode::SetPosition, Opcode::Strike, Opcode::Strike]
        );
        assert!(bus.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_sheet_releases_bus() {
        let (sequencer, bus) = make_sequencer();
        let dir = tempfile::tempdir().unwrap();
        let running = AtomicBool::new(true);

        let result = run(
            sequencer,
            DispatchSettings::default(),
            Some(dir.path().join("missing.txt").as_path()),
            keys(&[]),
            &running,
        )
        .await;

        assert!(result.is_err());
        assert!(bus.is_empty());
        assert!(bus.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_note_in_sheet_keeps_session_going() {
        let (sequencer, bus) = make_sequencer();
        let sheet = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(sheet.path(), "Xo Go").unwrap();
        let running = AtomicBool::new(true);

        run(
            sequencer,
            DispatchSettings::default(),
            Some(sheet.path()),
            keys(&[0x39]),
            &running,
        )
        .await
        .unwrap();

        // Sheet stopped at 'X'; the space key still struck
        assert_eq!(bus.len(), 1);
        assert!(bus.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_open_failure_releases_bus() {
        let (sequencer, bus) = make_sequencer();
        let running = AtomicBool::new(true);

        let result = run(
            sequencer,
            DispatchSettings::default(),
            None,
            no_keyboard(),
            &running,
        )
        .await;

        assert!(result.is_err());
        assert!(bus.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_failure_in_loop_releases_bus() {
        let (sequencer, bus) = make_sequencer();
        bus.set_failing(true);
        let running = AtomicBool::new(true);

        let result = run(
            sequencer,
            DispatchSettings::default(),
            None,
            keys(&[0x39, 0x39]),
            &running,
        )
        .await;

        assert!(result.is_err());
        assert!(bus.is_empty());
        assert!(bus.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_program_sends_then_closes() {
        let (sequencer, bus) = make_sequencer();

        program(
            sequencer,
            Programming {
                target: DeviceId::BROADCAST,
                new_id: Some(DeviceId(3)),
                start_position: Some(42),
            },
        )
        .await
        .unwrap();

        let frames = bus.decoded();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].opcode, Opcode::ProgramId);
        assert_eq!(frames[0].payload, 3);
        assert_eq!(frames[1].opcode, Opcode::ProgramStartPosition);
        assert_eq!(frames[1].payload, 42);
        assert!(bus.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_program_failure_still_closes() {
        let (sequencer, bus) = make_sequencer();
        bus.set_failing(true);

        let result = program(
            sequencer,
            Programming {
                target: DeviceId(1),
                new_id: Some(DeviceId(2)),
                start_position: None,
            },
        )
        .await;

        assert!(result.is_err());
        assert!(bus.is_closed());
    }
}

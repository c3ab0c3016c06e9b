//! Note-sheet player
//!
//! Sheet format: whitespace-separated two-character tokens `<note><duration>`,
//! e.g. `Go Co .. Ao`. Tokens of any other length are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::CymbalResult;
use crate::sequencer::Sequencer;

/// One `<note><duration>` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicToken {
    pub note: char,
    pub duration: char,
}

impl MusicToken {
    /// Parse a single token; anything but exactly two characters is rejected
    pub fn parse(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(note), Some(duration), None) => Some(Self { note, duration }),
            _ => None,
        }
    }
}

/// Outcome of a playback run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub played: usize,
    pub skipped: usize,
    /// Stopped early by the running flag
    pub interrupted: bool,
}

/// Play a sheet to completion, one note at a time
///
/// Unknown note or duration symbols abort playback with an error. The
/// `running` flag is checked between notes; a note in progress always
/// finishes its wait.
pub async fn play(
    sequencer: &mut Sequencer,
    sheet: &str,
    running: &AtomicBool,
) -> CymbalResult<PlaybackSummary> {
    let mut summary = PlaybackSummary::default();

    for raw in sheet.split_whitespace() {
        if !running.load(Ordering::Relaxed) {
            info!("Playback interrupted after {} notes", summary.played);
            summary.interrupted = true;
            break;
        }

        let Some(token) = MusicToken::parse(raw) else {
            debug!("Skipping malformed token '{}'", raw);
            summary.skipped += 1;
            continue;
        };

        info!("♪ {}", raw);
        sequencer.strike_note(token.note).await?;
        let delay = sequencer.durations().lookup(token.duration)?;
        sleep(delay).await;
        summary.played += 1;
    }

    Ok(summary)
}

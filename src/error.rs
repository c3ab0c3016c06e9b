//! Errors raised by the controller, sequencer, player and dispatcher

use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CymbalError {
    #[error("bus transmission failed: {0}")]
    Transport(#[from] TransportError),

    #[error("unknown note symbol '{0}'")]
    UnknownNote(char),

    #[error("unknown duration symbol '{0}'")]
    UnknownDuration(char),
}

impl CymbalError {
    /// Lookup failures abort the current step only; transport failures are hard errors
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            CymbalError::UnknownNote(_) | CymbalError::UnknownDuration(_)
        )
    }
}

pub type CymbalResult<T> = Result<T, CymbalError>;

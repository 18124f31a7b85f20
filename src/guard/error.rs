//! Guard error types

use crate::breaker::BreakerError;

/// Error from a guarded HTTP call
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// Refused by the breaker; the transport was not called
    #[error("circuit breaker is open: {0}")]
    BreakerOpen(BreakerError),
    /// Server error status (>= 500); the response was discarded
    #[error("HTTP {0}")]
    Status(u16),
    #[error("{0}")]
    Transport(E),
}

impl<E> GuardError<E> {
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, GuardError::BreakerOpen(_))
    }
}

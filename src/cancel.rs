//! Cooperative cancellation (spec §5 "cancellation is cooperative").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GraphError, Result};

/// A shareable flag a caller can flip from another thread to abort a
/// traversal or controller operation in progress. Polled, never pushed.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Polls the token every `cadence` calls (tracked by the caller via
    /// `visited`), failing with `E_CANCELLED` if tripped. `cadence == 0`
    /// disables polling entirely (always allow).
    pub fn check(&self, visited: usize, cadence: usize) -> Result<()> {
        if cadence != 0 && visited % cadence == 0 && self.is_cancelled() {
            return Err(GraphError::Cancelled { visited });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncancelled_token_never_fails() {
        let tok = CancellationToken::new();
        for visited in 0..5000 {
            assert!(tok.check(visited, 1000).is_ok());
        }
    }

    #[test]
    fn cancelled_token_trips_at_next_cadence_boundary() {
        let tok = CancellationToken::new();
        tok.cancel();
        assert!(tok.check(0, 1000).is_err());
        assert!(tok.check(1, 1000).is_ok());
        assert!(tok.check(1000, 1000).is_err());
    }
}

use std::time::Duration;

use model::{RequestKind, StoreError, StoreTransaction};
use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;

use crate::evaluator::Shared;

/// The open transaction of one worker thread. Each worker gets its own cell so
/// a stopped worker can never touch its successor's transaction.
pub(crate) type TxCell = Mutex<Option<Box<dyn StoreTransaction>>>;

#[derive(Debug, Error)]
pub(crate) enum CommitError {
    #[error("worker no longer owns the evaluator")]
    OwnershipLost,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Begin, commit and abort on behalf of the worker identified by `token`.
pub(crate) struct TransactionController<'a> {
    shared: &'a Shared,
    cell: &'a TxCell,
    token: u64,
}

impl<'a> TransactionController<'a> {
    pub fn new(shared: &'a Shared, cell: &'a TxCell, token: u64) -> Self {
        Self {
            shared,
            cell,
            token,
        }
    }

    pub fn cell(&self) -> &'a TxCell {
        self.cell
    }

    pub fn begin(&self, name: &str) -> Result<(), StoreError> {
        let tx = self.shared.app.store.begin(name)?;
        if let Some(mut stale) = self.cell.lock().replace(tx) {
            stale.abort();
        }
        Ok(())
    }

    /// Commit only while this worker is still the evaluator's owner. The
    /// ownership check and the store commit happen under the monitor lock, so
    /// a concurrent stop either happens before (and the commit is refused) or
    /// after (and the request counts as done).
    pub fn commit(&self) -> Result<(), CommitError> {
        let mut cell = self.cell.lock();
        let mut monitor = self.shared.monitor.lock();
        if monitor.owner != Some(self.token) {
            return Err(CommitError::OwnershipLost);
        }
        let Some(mut tx) = cell.take() else {
            return Err(CommitError::OwnershipLost);
        };
        match tx.commit() {
            Ok(()) => {
                monitor.kind = RequestKind::None;
                Ok(())
            }
            Err(err) => {
                tx.abort();
                Err(err.into())
            }
        }
    }

    /// Release pending writes. Without `retry` the evaluator is also marked as
    /// no longer serving a request kind.
    pub fn abort(&self, retry: bool) {
        if let Some(mut tx) = self.cell.lock().take() {
            tx.abort();
        }
        if !retry {
            let mut monitor = self.shared.monitor.lock();
            if monitor.owner == Some(self.token) {
                monitor.kind = RequestKind::None;
            }
        }
    }

    /// Abort whatever is still open and drop the store connections.
    pub fn release(&self) {
        if let Some(mut tx) = self.cell.lock().take() {
            tx.abort();
            tx.close_connections();
        }
    }
}

/// Backoff before conflict retry `attempt` (1-based): `base*n` plus up to
/// twice that again at random.
pub fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let base = base_ms.saturating_mul(u64::from(attempt)) as f64;
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    Duration::from_millis((base + jitter * base * 2.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_linearly_with_jitter() {
        for attempt in 1..=7 {
            let delay = retry_delay(800, attempt).as_millis() as u64;
            let base = 800 * u64::from(attempt);
            assert!(delay >= base, "attempt {attempt}: {delay} < {base}");
            assert!(delay < base * 3, "attempt {attempt}: {delay} >= {}", base * 3);
        }
        assert_eq!(retry_delay(0, 3), Duration::ZERO);
    }
}

//! Starting and stopping an evaluator's worker thread.

use std::sync::Arc;
use std::time::Duration;

use model::EngineError;
use parking_lot::Mutex;

use crate::evaluator::{EvalState, Monitor, Shared};
use crate::worker::Worker;

/// How long a stop waits for the worker to let go of its transaction.
const TX_RELEASE_WAIT: Duration = Duration::from_millis(50);

/// Make sure a worker will pick up the pending submission: start one when
/// none is live, otherwise wake the idle one.
pub(crate) fn check_thread(shared: &Arc<Shared>, monitor: &mut Monitor) -> Result<(), EngineError> {
    if monitor.owner.is_some() {
        shared.cond.notify_all();
        return Ok(());
    }

    monitor.next_token += 1;
    let token = monitor.next_token;
    let cell = Arc::new(Mutex::new(None));
    let worker = Worker::new(Arc::clone(shared), token, Arc::clone(&cell));

    let handle = std::thread::Builder::new()
        .name(format!("{}-evaluator-{}", shared.app.name(), shared.id))
        .spawn(move || worker.run())
        .map_err(|err| {
            tracing::error!("Failed to start evaluator {}: {}", shared.id, err);
            EngineError::application(format!("Failed to start evaluator thread: {}", err))
        })?;

    tracing::debug!("Started worker {} for evaluator {}", token, shared.id);
    monitor.owner = Some(token);
    monitor.handle = Some(handle);
    monitor.tx_cell = Some(cell);
    Ok(())
}

/// Revoke the worker's ownership and detach it.
///
/// The detached thread keeps running until it next checks ownership, but it
/// can no longer commit or publish. Its open transaction is aborted here if
/// the worker is not holding it, otherwise by the worker itself on exit.
pub(crate) fn stop_thread(shared: &Shared, monitor: &mut Monitor) {
    let owner = monitor.owner.take();
    monitor.handle.take();
    monitor.abandon();
    monitor.state = EvalState::Idle;

    if let Some(cell) = monitor.tx_cell.take() {
        match cell.try_lock_for(TX_RELEASE_WAIT) {
            Some(mut slot) => {
                if let Some(mut tx) = slot.take() {
                    tracing::debug!("Aborting transaction {} of stopped worker", tx.name());
                    tx.abort();
                    tx.close_connections();
                }
            }
            None => tracing::debug!(
                "Transaction of evaluator {} still in use; worker will release it",
                shared.id
            ),
        }
    }

    if let Some(token) = owner {
        tracing::warn!("Stopped worker {} of evaluator {}", token, shared.id);
    }
    shared.cond.notify_all();
}

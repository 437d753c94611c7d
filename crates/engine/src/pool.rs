use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use model::EngineError;
use parking_lot::{Condvar, Mutex};

use crate::context::AppContext;
use crate::evaluator::RequestEvaluator;

struct PoolState {
    all: Vec<RequestEvaluator>,
    free: Vec<RequestEvaluator>,
}

/// Bounded set of evaluators, created lazily up to `max_evaluators`.
pub struct EvaluatorPool {
    app: Arc<AppContext>,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// An evaluator checked out of the pool; returned on drop.
pub struct PooledEvaluator<'a> {
    pool: &'a EvaluatorPool,
    evaluator: RequestEvaluator,
}

impl Deref for PooledEvaluator<'_> {
    type Target = RequestEvaluator;

    fn deref(&self) -> &RequestEvaluator {
        &self.evaluator
    }
}

impl Drop for PooledEvaluator<'_> {
    fn drop(&mut self) {
        self.pool.release(self.evaluator.clone());
    }
}

impl EvaluatorPool {
    pub(crate) fn new(app: Arc<AppContext>) -> Self {
        Self {
            app,
            state: Mutex::new(PoolState {
                all: Vec::new(),
                free: Vec::new(),
            }),
            available: Condvar::new(),
        }
    }

    /// Check out an evaluator, waiting up to `timeout` when all are busy.
    pub fn acquire(&self, timeout: Duration) -> Result<PooledEvaluator<'_>, EngineError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if self.app.is_stopped() {
                return Err(EngineError::Stopped);
            }
            if let Some(evaluator) = state.free.pop() {
                return Ok(self.lease(evaluator));
            }
            if state.all.len() < self.app.config.max_evaluators {
                let evaluator = RequestEvaluator::new(state.all.len(), Arc::clone(&self.app));
                state.all.push(evaluator.clone());
                tracing::info!(
                    "Created evaluator {} for {} ({} max)",
                    evaluator.id(),
                    self.app.name(),
                    self.app.config.max_evaluators
                );
                return Ok(self.lease(evaluator));
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                tracing::warn!("No evaluator free for {} within {:?}", self.app.name(), timeout);
                return Err(EngineError::Busy);
            }
        }
    }

    fn lease(&self, evaluator: RequestEvaluator) -> PooledEvaluator<'_> {
        PooledEvaluator {
            pool: self,
            evaluator,
        }
    }

    fn release(&self, evaluator: RequestEvaluator) {
        self.state.lock().free.push(evaluator);
        self.available.notify_one();
    }

    /// Number of evaluators created so far.
    pub fn size(&self) -> usize {
        self.state.lock().all.len()
    }

    pub fn idle(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn evaluators(&self) -> Vec<RequestEvaluator> {
        self.state.lock().all.clone()
    }

    /// Wake every caller blocked in `acquire`.
    pub(crate) fn wake_all(&self) {
        self.available.notify_all();
    }
}

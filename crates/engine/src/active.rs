use std::collections::HashMap;
use std::sync::{Arc, Weak};

use model::RequestKey;
use parking_lot::Mutex;

use crate::evaluator::{RequestEvaluator, Shared};

/// Requests currently being executed, keyed by request identity, so that an
/// identical request can attach to the running one.
#[derive(Default)]
pub(crate) struct ActiveRequests {
    entries: Mutex<HashMap<RequestKey, Weak<Shared>>>,
}

impl ActiveRequests {
    pub fn register(&self, key: RequestKey, evaluator: &Arc<Shared>) {
        self.entries.lock().insert(key, Arc::downgrade(evaluator));
    }

    /// Remove `key` if it still points at `evaluator`.
    pub fn remove(&self, key: &RequestKey, evaluator: &Arc<Shared>) {
        let mut entries = self.entries.lock();
        let same = entries
            .get(key)
            .is_some_and(|entry| std::ptr::eq(entry.as_ptr(), Arc::as_ptr(evaluator)));
        if same {
            entries.remove(key);
        }
    }

    pub fn lookup(&self, key: &RequestKey) -> Option<RequestEvaluator> {
        let shared = self.entries.lock().get(key)?.upgrade()?;
        Some(RequestEvaluator::from_shared(shared))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

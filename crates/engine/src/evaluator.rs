use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use model::{
    EngineError, ObjectRef, Principal, RequestDescriptor, RequestKey, RequestKind, Value,
};
use parking_lot::{Condvar, Mutex};
use response::{Conditional, ResponseBuffer};
use serde::Serialize;

use crate::context::AppContext;
use crate::thread;
use crate::transaction::TxCell;

/// Where an evaluator is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalState {
    Idle,
    Dispatching,
    Executing,
    Committing,
    RetryWait,
    Done,
}

pub(crate) enum Job {
    Http(Arc<RequestDescriptor>),
    Rpc {
        method: String,
        args: Vec<Value>,
    },
    Internal {
        this: Option<ObjectRef>,
        name: String,
        args: Vec<Value>,
        principal: Option<Arc<Principal>>,
    },
}

pub(crate) struct Submission {
    pub id: u64,
    pub job: Job,
}

#[derive(Clone)]
pub(crate) enum Outcome {
    Response(Arc<ResponseBuffer>),
    Value(Result<Value, EngineError>),
}

/// Result of one submission. Shared by the submitting caller and any
/// attached callers, so it outlives the evaluator moving on to other work.
#[derive(Clone)]
pub(crate) enum SlotState {
    Pending,
    Done(Outcome),
    /// The worker was stopped before it published.
    Abandoned,
}

pub(crate) type ResultSlot = Arc<Mutex<SlotState>>;

/// Everything guarded by the evaluator's monitor lock.
pub(crate) struct Monitor {
    /// Token of the worker thread currently recognized as owner.
    pub owner: Option<u64>,
    pub next_token: u64,
    pub handle: Option<JoinHandle<()>>,
    pub tx_cell: Option<Arc<TxCell>>,
    pub kind: RequestKind,
    pub state: EvalState,
    pub pending: Option<Submission>,
    /// Submission being served, from submit until publish or stop.
    pub active: Option<u64>,
    /// Result slot of the active submission.
    pub slot: Option<ResultSlot>,
    pub next_id: u64,
    pub in_flight: Option<(RequestKey, ResultSlot)>,
    pub served: u64,
}

impl Monitor {
    fn new() -> Self {
        Self {
            owner: None,
            next_token: 0,
            handle: None,
            tx_cell: None,
            kind: RequestKind::None,
            state: EvalState::Idle,
            pending: None,
            active: None,
            slot: None,
            next_id: 0,
            in_flight: None,
            served: 0,
        }
    }

    /// Queue `job` as the active submission and return its id and slot.
    pub fn begin_submission(
        &mut self,
        kind: RequestKind,
        job: Job,
        key: Option<RequestKey>,
    ) -> (u64, ResultSlot) {
        self.next_id += 1;
        let id = self.next_id;
        let slot = Arc::new(Mutex::new(SlotState::Pending));
        self.kind = kind;
        self.active = Some(id);
        self.pending = Some(Submission { id, job });
        self.slot = Some(Arc::clone(&slot));
        self.state = EvalState::Dispatching;
        self.in_flight = key.map(|key| (key, Arc::clone(&slot)));
        (id, slot)
    }

    /// Fill the slot of submission `id` and mark the evaluator free.
    pub fn finish(&mut self, id: u64, outcome: Outcome) -> bool {
        if self.active != Some(id) {
            return false;
        }
        if let Some(slot) = self.slot.take() {
            *slot.lock() = SlotState::Done(outcome);
        }
        self.active = None;
        self.kind = RequestKind::None;
        self.in_flight = None;
        self.state = EvalState::Done;
        self.served += 1;
        true
    }

    /// Drop the active submission without a result.
    pub fn abandon(&mut self) {
        if let Some(slot) = self.slot.take() {
            *slot.lock() = SlotState::Abandoned;
        }
        self.kind = RequestKind::None;
        self.active = None;
        self.pending = None;
        self.in_flight = None;
    }
}

pub(crate) struct Shared {
    pub id: usize,
    pub app: Arc<AppContext>,
    pub monitor: Mutex<Monitor>,
    pub cond: Condvar,
}

impl Shared {
    pub fn owns(&self, token: u64) -> bool {
        self.monitor.lock().owner == Some(token)
    }

    /// Move to `state` if `token` still owns the evaluator.
    pub fn enter(&self, token: u64, state: EvalState) -> bool {
        let mut monitor = self.monitor.lock();
        if monitor.owner != Some(token) {
            return false;
        }
        monitor.state = state;
        true
    }

    /// Hand a finished outcome to the waiting caller. Returns `false` when the
    /// worker was stopped in the meantime; the outcome is then discarded.
    pub fn publish(&self, token: u64, id: u64, outcome: Outcome) -> bool {
        let mut monitor = self.monitor.lock();
        if monitor.owner != Some(token) || !monitor.finish(id, outcome) {
            return false;
        }
        self.app
            .requests_served
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.cond.notify_all();
        true
    }
}

/// One engine instance: a monitor shared between callers and at most one
/// live worker thread.
///
/// Callers block in the `invoke_*` methods until the worker publishes an
/// outcome or the timeout passes, in which case the worker is stopped and
/// the caller gets a timeout result.
#[derive(Clone)]
pub struct RequestEvaluator {
    shared: Arc<Shared>,
}

impl RequestEvaluator {
    pub(crate) fn new(id: usize, app: Arc<AppContext>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                app,
                monitor: Mutex::new(Monitor::new()),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn state(&self) -> EvalState {
        self.shared.monitor.lock().state
    }

    pub fn kind(&self) -> RequestKind {
        self.shared.monitor.lock().kind
    }

    /// Whether a worker thread currently owns this evaluator.
    pub fn has_worker(&self) -> bool {
        self.shared.monitor.lock().owner.is_some()
    }

    pub fn requests_served(&self) -> u64 {
        self.shared.monitor.lock().served
    }

    /// Run an HTTP-style request. Never fails for application errors; those
    /// end up in the response. A timeout yields the standard timeout page.
    pub fn invoke_http(
        &self,
        request: RequestDescriptor,
    ) -> Result<Arc<ResponseBuffer>, EngineError> {
        let app = &self.shared.app;
        let key = request.key();
        let conditional = request.conditional.clone();
        let path = request.path.clone();

        app.active.register(key.clone(), &self.shared);
        let result = self.submit(
            RequestKind::Http,
            Job::Http(Arc::new(request)),
            Some(key.clone()),
            app.config.request_timeout(),
        );
        app.active.remove(&key, &self.shared);

        match result {
            Ok(Outcome::Response(res)) => Ok(res),
            Ok(Outcome::Value(_)) => Err(EngineError::application(
                "Evaluator returned a value for an HTTP request",
            )),
            Err(EngineError::Timeout) => {
                tracing::warn!("Request {}/{} timed out", app.name(), path);
                Ok(timeout_response(app.name(), conditional, &app.config.charset))
            }
            Err(err) => Err(err),
        }
    }

    /// Call `method` over RPC. Dotted names walk children from the root,
    /// e.g. `catalog.products.count`.
    pub fn invoke_rpc(&self, method: &str, args: Vec<Value>) -> Result<Value, EngineError> {
        let job = Job::Rpc {
            method: method.to_string(),
            args,
        };
        let timeout = self.shared.app.config.request_timeout();
        self.submit_for_value(RequestKind::Rpc, job, timeout)
    }

    /// Call a function on `this`, or a global function when `this` is `None`.
    /// A missing global function yields `null` without opening a transaction.
    pub fn invoke_function(
        &self,
        this: Option<ObjectRef>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EngineError> {
        let job = Job::Internal {
            this,
            name: name.to_string(),
            args,
            principal: None,
        };
        let timeout = self.shared.app.config.internal_timeout();
        self.submit_for_value(RequestKind::Internal, job, timeout)
    }

    /// Call a global function on behalf of `principal`.
    pub fn invoke_function_as(
        &self,
        principal: Arc<Principal>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EngineError> {
        let job = Job::Internal {
            this: None,
            name: name.to_string(),
            args,
            principal: Some(principal),
        };
        let timeout = self.shared.app.config.request_timeout();
        self.submit_for_value(RequestKind::Internal, job, timeout)
    }

    /// Share the response of an identical request already running here.
    /// Returns `None` when no such request is in flight.
    pub fn attach(&self, request: &RequestDescriptor) -> Option<Arc<ResponseBuffer>> {
        let key = request.key();
        let app = &self.shared.app;
        let mut monitor = self.shared.monitor.lock();
        let slot = match &monitor.in_flight {
            Some((in_flight, slot)) if *in_flight == key => Arc::clone(slot),
            _ => return None,
        };

        let deadline = Instant::now() + app.config.request_timeout();
        let timed_out = || {
            Some(timeout_response(
                app.name(),
                request.conditional.clone(),
                &app.config.charset,
            ))
        };
        loop {
            match slot.lock().clone() {
                SlotState::Done(Outcome::Response(res)) => return Some(res),
                SlotState::Pending => {}
                SlotState::Done(_) | SlotState::Abandoned => return timed_out(),
            }
            if self
                .shared
                .cond
                .wait_until(&mut monitor, deadline)
                .timed_out()
            {
                if let SlotState::Done(Outcome::Response(res)) = slot.lock().clone() {
                    return Some(res);
                }
                return timed_out();
            }
        }
    }

    /// Forcibly stop the worker thread, if any.
    pub fn stop(&self) {
        let mut monitor = self.shared.monitor.lock();
        thread::stop_thread(&self.shared, &mut monitor);
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        let monitor = self.shared.monitor.lock();
        serde_json::json!({
            "id": self.shared.id,
            "state": monitor.state,
            "kind": monitor.kind,
            "worker": monitor.owner.is_some(),
            "busy": monitor.active.is_some(),
            "served": monitor.served,
        })
    }

    fn submit_for_value(
        &self,
        kind: RequestKind,
        job: Job,
        timeout: Duration,
    ) -> Result<Value, EngineError> {
        match self.submit(kind, job, None, timeout)? {
            Outcome::Value(result) => result,
            Outcome::Response(_) => Err(EngineError::application(
                "Evaluator returned a response for a function call",
            )),
        }
    }

    fn submit(
        &self,
        kind: RequestKind,
        job: Job,
        key: Option<RequestKey>,
        timeout: Duration,
    ) -> Result<Outcome, EngineError> {
        let shared = &self.shared;
        let mut monitor = shared.monitor.lock();
        if shared.app.is_stopped() {
            return Err(EngineError::Stopped);
        }
        if monitor.active.is_some() {
            return Err(EngineError::Busy);
        }

        let (_, slot) = monitor.begin_submission(kind, job, key);

        if let Err(err) = thread::check_thread(shared, &mut monitor) {
            monitor.abandon();
            return Err(err);
        }

        let deadline = Instant::now() + timeout;
        loop {
            match slot.lock().clone() {
                SlotState::Done(outcome) => return Ok(outcome),
                // stopped from outside while we waited
                SlotState::Abandoned if shared.app.is_stopped() => return Err(EngineError::Stopped),
                SlotState::Abandoned => return Err(EngineError::Timeout),
                SlotState::Pending => {}
            }
            if shared.cond.wait_until(&mut monitor, deadline).timed_out() {
                if let SlotState::Done(outcome) = slot.lock().clone() {
                    return Ok(outcome);
                }
                tracing::warn!(
                    "Stopping thread of evaluator {} for {} request",
                    shared.id,
                    kind.as_str()
                );
                thread::stop_thread(shared, &mut monitor);
                return Err(EngineError::Timeout);
            }
        }
    }
}

/// Minimal fragment used when a request runs out of time.
pub(crate) fn timeout_response(
    app_name: &str,
    conditional: Conditional,
    charset: &str,
) -> Arc<ResponseBuffer> {
    let mut res = ResponseBuffer::new(conditional).with_auto_etags(false);
    res.set_status(500);
    res.write(&error_fragment(app_name, "Request timed out."));
    if let Err(err) = res.close(Some(charset)) {
        tracing::warn!("{}", err);
    }
    Arc::new(res)
}

pub(crate) fn error_fragment(app_name: &str, message: &str) -> String {
    format!(
        "<b>Error in application '{}':</b> <br><br><pre>{}</pre>",
        app_name, message
    )
}

//! An application: configuration, collaborators and its evaluator pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use model::{AppConfig, EngineError, ObjectRef, Principal, RequestDescriptor, UploadStatus, Value};
use parking_lot::Mutex;
use response::ResponseBuffer;

use crate::context::{AppContext, Collaborators};
use crate::pool::EvaluatorPool;

pub struct Application {
    ctx: Arc<AppContext>,
    pool: EvaluatorPool,
    started: Instant,
    uploads: Mutex<HashMap<String, Arc<Mutex<UploadStatus>>>>,
}

impl Application {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        tracing::info!(
            "Starting application {} ({} evaluators max, {}ms request timeout)",
            config.name,
            config.max_evaluators,
            config.request_timeout_ms
        );
        let ctx = Arc::new(AppContext::new(config, collaborators));
        Self {
            pool: EvaluatorPool::new(Arc::clone(&ctx)),
            ctx,
            started: Instant::now(),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn config(&self) -> &AppConfig {
        &self.ctx.config
    }

    pub fn pool(&self) -> &EvaluatorPool {
        &self.pool
    }

    // ========== Request entry points ==========

    /// Serve an HTTP-style request. An identical request already running
    /// shares its response instead of executing twice.
    pub fn execute_http(
        &self,
        request: RequestDescriptor,
    ) -> Result<Arc<ResponseBuffer>, EngineError> {
        if let Some(running) = self.ctx.active.lookup(&request.key()) {
            if let Some(res) = running.attach(&request) {
                tracing::debug!("Attached {} to evaluator {}", request.path, running.id());
                return Ok(res);
            }
        }
        let evaluator = self.pool.acquire(self.ctx.config.request_timeout())?;
        evaluator.invoke_http(request)
    }

    pub fn execute_rpc(&self, method: &str, args: Vec<Value>) -> Result<Value, EngineError> {
        let evaluator = self.pool.acquire(self.ctx.config.request_timeout())?;
        evaluator.invoke_rpc(method, args)
    }

    pub fn invoke_function(
        &self,
        this: Option<ObjectRef>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EngineError> {
        let evaluator = self.pool.acquire(self.ctx.config.internal_timeout())?;
        evaluator.invoke_function(this, name, args)
    }

    pub fn invoke_function_as(
        &self,
        principal: Arc<Principal>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EngineError> {
        let evaluator = self.pool.acquire(self.ctx.config.request_timeout())?;
        evaluator.invoke_function_as(principal, name, args)
    }

    // ========== Lifecycle ==========

    /// Refuse new work and stop every worker thread.
    pub fn stop(&self) {
        if self.ctx.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping application {}", self.name());
        for evaluator in self.pool.evaluators() {
            evaluator.stop();
        }
        self.pool.wake_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.ctx.is_stopped()
    }

    // ========== Stats ==========

    pub fn error_count(&self) -> u64 {
        self.ctx.error_count.load(Ordering::Relaxed)
    }

    pub fn requests_served(&self) -> u64 {
        self.ctx.requests_served.load(Ordering::Relaxed)
    }

    /// Requests currently executing that others may attach to.
    pub fn active_requests(&self) -> usize {
        self.ctx.active.len()
    }

    pub fn stats(&self) -> serde_json::Value {
        let evaluators: Vec<serde_json::Value> =
            self.pool.evaluators().iter().map(|e| e.stats()).collect();
        serde_json::json!({
            "name": self.name(),
            "stopped": self.is_stopped(),
            "uptime_ms": self.started.elapsed().as_millis() as u64,
            "error_count": self.error_count(),
            "requests_served": self.requests_served(),
            "active_requests": self.active_requests(),
            "pool": {
                "size": self.pool.size(),
                "idle": self.pool.idle(),
                "max": self.ctx.config.max_evaluators,
            },
            "config": self.ctx.config,
            "evaluators": evaluators,
        })
    }

    // ========== Uploads ==========

    /// Register a new upload and return its id with the shared status.
    pub fn create_upload_status(&self) -> (String, Arc<Mutex<UploadStatus>>) {
        self.prune_uploads();
        let id = nanoid::nanoid!(12);
        let status = Arc::new(Mutex::new(UploadStatus::new()));
        self.uploads.lock().insert(id.clone(), Arc::clone(&status));
        (id, status)
    }

    pub fn upload_status(&self, id: &str) -> Option<Arc<Mutex<UploadStatus>>> {
        self.uploads.lock().get(id).cloned()
    }

    /// Forget uploads that have been inactive long enough.
    pub fn prune_uploads(&self) -> usize {
        let now = Instant::now();
        let mut uploads = self.uploads.lock();
        let before = uploads.len();
        uploads.retain(|_, status| !status.lock().is_disposable(now));
        before - uploads.len()
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.stop();
    }
}

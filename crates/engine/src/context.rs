use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use model::{AppConfig, ObjectGraph, ScriptingEngine, SkinResolver, Store};

use crate::active::ActiveRequests;

/// The collaborators an application is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub graph: Arc<dyn ObjectGraph>,
    pub store: Arc<dyn Store>,
    pub scripting: Arc<dyn ScriptingEngine>,
    pub skins: Arc<dyn SkinResolver>,
}

/// Application-wide state shared by every evaluator.
pub(crate) struct AppContext {
    pub config: AppConfig,
    pub graph: Arc<dyn ObjectGraph>,
    pub store: Arc<dyn Store>,
    pub scripting: Arc<dyn ScriptingEngine>,
    pub skins: Arc<dyn SkinResolver>,
    pub active: ActiveRequests,
    pub error_count: AtomicU64,
    pub requests_served: AtomicU64,
    pub stopped: AtomicBool,
}

impl AppContext {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            graph: collaborators.graph,
            store: collaborators.store,
            scripting: collaborators.scripting,
            skins: collaborators.skins,
            active: ActiveRequests::default(),
            error_count: AtomicU64::new(0),
            requests_served: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }
}

//! Request evaluation for object-tree applications: path resolution, a pool
//! of evaluators with one worker thread each, and conflict retry around every
//! store transaction.

mod active;
mod app;
mod context;
mod evaluator;
mod pool;
pub mod resolver;
mod thread;
mod transaction;
mod worker;

pub use app::Application;
pub use context::Collaborators;
pub use evaluator::{EvalState, RequestEvaluator};
pub use pool::{EvaluatorPool, PooledEvaluator};
pub use resolver::{Action, MAX_PATH_SEGMENTS, PathResolver, Resolution};
pub use transaction::retry_delay;

#[cfg(test)]
mod tests {
    use super::*;
    use memstore::{MemoryStore, ScriptedEngine, TemplateSet};
    use model::AppConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn app(max_evaluators: usize) -> Application {
        let store = MemoryStore::new("Root");
        let scripting = ScriptedEngine::new(Arc::new(store.clone()));
        scripting.define("Root", "main_action", |ctx, _, _| {
            ctx.res.write("home");
            Ok(model::Value::Null)
        });
        let config = AppConfig {
            max_evaluators,
            ..AppConfig::default()
        };
        Application::new(
            config,
            Collaborators {
                graph: Arc::new(store.clone()),
                store: Arc::new(store),
                scripting: Arc::new(scripting),
                skins: Arc::new(TemplateSet::new()),
            },
        )
    }

    #[test]
    fn pool_grows_lazily_and_reuses_evaluators() {
        let app = app(2);
        assert_eq!(app.pool().size(), 0);
        for _ in 0..3 {
            let res = app
                .execute_http(model::RequestDescriptor::get("/"))
                .unwrap();
            assert_eq!(res.body_text(), "home");
        }
        assert_eq!(app.pool().size(), 1);
        assert_eq!(app.pool().idle(), 1);
        assert_eq!(app.requests_served(), 3);
    }

    #[test]
    fn exhausted_pool_reports_busy() {
        let app = app(1);
        let held = app.pool().acquire(Duration::from_millis(10)).unwrap();
        let err = app.pool().acquire(Duration::from_millis(20)).err();
        assert_eq!(err, Some(model::EngineError::Busy));
        drop(held);
        assert!(app.pool().acquire(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn stopped_application_refuses_work() {
        let app = app(1);
        app.stop();
        let err = app
            .execute_http(model::RequestDescriptor::get("/"))
            .unwrap_err();
        assert_eq!(err, model::EngineError::Stopped);
        assert_eq!(
            app.pool().acquire(Duration::from_millis(10)).err(),
            Some(model::EngineError::Stopped)
        );
    }

    #[test]
    fn upload_status_is_shared_by_id() {
        let app = app(1);
        let (id, status) = app.create_upload_status();
        status.lock().update(10, 100, 1);
        let found = app.upload_status(&id).unwrap();
        assert_eq!(found.lock().current(), 10);
        assert!(app.upload_status("missing").is_none());
        assert_eq!(app.prune_uploads(), 0);
    }
}

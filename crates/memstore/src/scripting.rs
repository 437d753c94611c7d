use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use model::{
    ActionError, ExecutionContext, ObjectGraph, ObjectRef, ScriptEnvironment, ScriptError,
    ScriptingEngine, Value,
};
use parking_lot::RwLock;

/// A registered function body.
pub type ScriptFn = dyn Fn(&mut ExecutionContext<'_>, Option<&ObjectRef>, &[Value]) -> Result<Value, ActionError>
    + Send
    + Sync;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Scope {
    Global,
    Type(String),
}

type Registry = RwLock<HashMap<(Scope, String), Arc<ScriptFn>>>;

/// Scripting engine whose functions are Rust closures, registered per type tag
/// or in the global scope.
pub struct ScriptedEngine {
    graph: Arc<dyn ObjectGraph>,
    functions: Arc<Registry>,
    environments: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(graph: Arc<dyn ObjectGraph>) -> Self {
        Self {
            graph,
            functions: Arc::new(RwLock::new(HashMap::new())),
            environments: AtomicUsize::new(0),
        }
    }

    /// Register `name` on objects whose type tag is `type_tag` (case-insensitive).
    pub fn define<F>(&self, type_tag: &str, name: &str, body: F)
    where
        F: Fn(&mut ExecutionContext<'_>, Option<&ObjectRef>, &[Value]) -> Result<Value, ActionError>
            + Send
            + Sync
            + 'static,
    {
        let scope = Scope::Type(type_tag.to_ascii_lowercase());
        self.functions
            .write()
            .insert((scope, name.to_string()), Arc::new(body));
    }

    pub fn define_global<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut ExecutionContext<'_>, Option<&ObjectRef>, &[Value]) -> Result<Value, ActionError>
            + Send
            + Sync
            + 'static,
    {
        self.functions
            .write()
            .insert((Scope::Global, name.to_string()), Arc::new(body));
    }

    /// Environments handed out so far.
    pub fn environments_created(&self) -> usize {
        self.environments.load(Ordering::Relaxed)
    }
}

impl ScriptingEngine for ScriptedEngine {
    fn create_environment(&self) -> Result<Box<dyn ScriptEnvironment>, ScriptError> {
        self.environments.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(ScriptedEnvironment {
            graph: Arc::clone(&self.graph),
            functions: Arc::clone(&self.functions),
        }))
    }
}

struct ScriptedEnvironment {
    graph: Arc<dyn ObjectGraph>,
    functions: Arc<Registry>,
}

impl ScriptedEnvironment {
    fn scope(&self, this: Option<&ObjectRef>) -> Scope {
        match this {
            Some(object) => Scope::Type(self.graph.type_tag(object).to_ascii_lowercase()),
            None => Scope::Global,
        }
    }

    fn lookup(&self, this: Option<&ObjectRef>, name: &str) -> Option<Arc<ScriptFn>> {
        let key = (self.scope(this), name.to_string());
        self.functions.read().get(&key).cloned()
    }
}

impl ScriptEnvironment for ScriptedEnvironment {
    fn has_function(&self, this: Option<&ObjectRef>, name: &str) -> bool {
        self.lookup(this, name).is_some()
    }

    fn invoke(
        &mut self,
        this: Option<&ObjectRef>,
        name: &str,
        args: &[Value],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Value, ActionError> {
        let Some(body) = self.lookup(this, name) else {
            let owner = match this {
                Some(object) => self.graph.type_tag(object),
                None => "global".to_string(),
            };
            return Err(ScriptError::new(format!("{} is not defined on {}", name, owner)).into());
        };
        body(ctx, this, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, TemplateSet};
    use model::{RequestDescriptor, RequestKind, Store};
    use response::ResponseBuffer;
    use serde_json::json;

    #[test]
    fn functions_resolve_by_type_tag_and_scope() {
        let store = MemoryStore::new("Root");
        let shop = store.add_object(&store.root(), "shop", "Shop").unwrap();
        let engine = ScriptedEngine::new(Arc::new(store.clone()));
        engine.define("shop", "main_action", |ctx, _, _| {
            ctx.res.write("shop");
            Ok(Value::Null)
        });
        engine.define_global("greet", |_, _, args| Ok(json!(format!("hi {}", args[0]))));

        let env = engine.create_environment().unwrap();
        assert!(env.has_function(Some(&shop), "main_action"));
        assert!(!env.has_function(Some(&store.root()), "main_action"));
        assert!(env.has_function(None, "greet"));
        assert!(!env.has_function(None, "main_action"));
        assert_eq!(engine.environments_created(), 1);
    }

    #[test]
    fn invoking_unknown_function_is_a_script_error() {
        let store = MemoryStore::new("Root");
        let engine = ScriptedEngine::new(Arc::new(store.clone()));
        let mut env = engine.create_environment().unwrap();
        let skins = TemplateSet::new();
        let request = RequestDescriptor::get("");
        let mut res = ResponseBuffer::default();
        let mut tx = store.begin("t").unwrap();
        let root = store.root();
        let path = [root.clone()];
        let mut ctx = ExecutionContext {
            app_name: "test",
            kind: RequestKind::Internal,
            request: &request,
            path: &path,
            action: "",
            graph: &store,
            skins: &skins,
            res: &mut res,
            tx: tx.as_mut(),
        };
        let err = env.invoke(Some(&root), "nope", &[], &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "nope is not defined on Root");
    }
}

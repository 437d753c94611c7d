use std::sync::Arc;

use response::ResponseBuffer;
use serde_json::{Map, Value};

use crate::{
    ActionError, ObjectGraph, ObjectRef, RequestDescriptor, RequestKind, ScriptError,
    StoreTransaction,
};

/// Factory for per-thread scripting environments.
pub trait ScriptingEngine: Send + Sync {
    /// Build an environment owned by the calling worker thread.
    fn create_environment(&self) -> Result<Box<dyn ScriptEnvironment>, ScriptError>;
}

/// The single scripting capability an evaluator's worker drives.
///
/// `this == None` addresses the global scope.
pub trait ScriptEnvironment: Send {
    fn has_function(&self, this: Option<&ObjectRef>, name: &str) -> bool;

    fn invoke(
        &mut self,
        this: Option<&ObjectRef>,
        name: &str,
        args: &[Value],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<Value, ActionError>;
}

pub trait SkinResolver: Send + Sync {
    /// Look up template `name` in the family named by `type_tag`.
    fn resolve(&self, type_tag: &str, name: &str) -> Option<Arc<dyn Renderable>>;
}

pub trait Renderable: Send + Sync {
    fn render(
        &self,
        ctx: &mut ExecutionContext<'_>,
        this: &ObjectRef,
        params: &Map<String, Value>,
    ) -> Result<(), ActionError>;
}

/// Everything action code may touch while it runs.
pub struct ExecutionContext<'a> {
    pub app_name: &'a str,
    pub kind: RequestKind,
    pub request: &'a RequestDescriptor,
    /// Objects visited while resolving the path, root first.
    pub path: &'a [ObjectRef],
    /// Exposed action name (suffix trimmed for functions).
    pub action: &'a str,
    pub graph: &'a dyn ObjectGraph,
    pub skins: &'a dyn SkinResolver,
    pub res: &'a mut ResponseBuffer,
    pub tx: &'a mut dyn StoreTransaction,
}

impl ExecutionContext<'_> {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.request.param(key)
    }

    /// Render `name` from the family of `this` into the response.
    /// Returns `false` when no such skin exists.
    pub fn render_skin(
        &mut self,
        this: &ObjectRef,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<bool, ActionError> {
        let tag = self.graph.type_tag(this);
        let Some(skin) = self.skins.resolve(&tag, name) else {
            return Ok(false);
        };
        skin.render(self, this, params)?;
        Ok(true)
    }

    /// Render a skin into a string instead of the response body.
    pub fn render_skin_as_string(
        &mut self,
        this: &ObjectRef,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<Option<String>, ActionError> {
        self.res.push_buffer();
        let rendered = self.render_skin(this, name, params);
        let text = self
            .res
            .pop_string()
            .map_err(|err| ScriptError::new(err.to_string()))?;
        Ok(rendered?.then_some(text))
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use model::{ActionError, ExecutionContext, ObjectRef, Renderable, ScriptError, SkinResolver, Value};
use parking_lot::RwLock;
use serde_json::Map;

/// Templates keyed by (type tag, name).
///
/// Sources use `{{key}}` placeholders. `key` is looked up in the render
/// parameters first, then in the request parameters; values are HTML-encoded.
/// `{{this}}` expands to the rendered object's id, `{{skin:name}}` renders
/// another template of the same object in place.
#[derive(Default)]
pub struct TemplateSet {
    templates: RwLock<HashMap<(String, String), Arc<Template>>>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, type_tag: &str, name: &str, source: &str) {
        self.templates.write().insert(
            (type_tag.to_ascii_lowercase(), name.to_string()),
            Arc::new(Template {
                source: source.to_string(),
            }),
        );
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SkinResolver for TemplateSet {
    fn resolve(&self, type_tag: &str, name: &str) -> Option<Arc<dyn Renderable>> {
        let key = (type_tag.to_ascii_lowercase(), name.to_string());
        let template = self.templates.read().get(&key).cloned()?;
        Some(template as Arc<dyn Renderable>)
    }
}

struct Template {
    source: String,
}

fn placeholder_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Renderable for Template {
    fn render(
        &self,
        ctx: &mut ExecutionContext<'_>,
        this: &ObjectRef,
        params: &Map<String, Value>,
    ) -> Result<(), ActionError> {
        let mut rest = self.source.as_str();
        while let Some(start) = rest.find("{{") {
            ctx.res.write(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                return Err(ScriptError::new("Unterminated placeholder in template").into());
            };
            let key = after[..end].trim();
            if key == "this" {
                ctx.res.encode(this.id());
            } else if let Some(name) = key.strip_prefix("skin:") {
                if !ctx.render_skin(this, name.trim(), params)? {
                    return Err(ScriptError::new(format!("Skin {} not found", name.trim())).into());
                }
            } else if let Some(value) = params.get(key) {
                ctx.res.encode(&placeholder_text(value));
            } else if let Some(value) = ctx.param(key).map(str::to_string) {
                ctx.res.encode(&value);
            }
            rest = &after[end + 2..];
        }
        ctx.res.write(rest);
        Ok(())
    }
}

//! Maps a request path onto an object in the tree and an action bound to it.

use model::{AppConfig, EngineError, ObjectGraph, ObjectRef, ScriptEnvironment, SkinResolver};

/// Paths with more segments than this are rejected before any lookup.
pub const MAX_PATH_SEGMENTS: usize = 50;

const ACTION_SUFFIX: &str = "_action";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A scripted function, named with its `_action` suffix.
    Function { name: String },
    /// A template rendered directly, e.g. `list.html`.
    Template {
        requested: String,
        name: String,
        content_type: String,
    },
}

impl Action {
    /// Name exposed to action code: suffix trimmed for functions, the full
    /// requested name for templates.
    pub fn exposed_name(&self) -> &str {
        match self {
            Action::Function { name } => name.strip_suffix(ACTION_SUFFIX).unwrap_or(name),
            Action::Template { requested, .. } => requested,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Objects visited, root first.
    pub path: Vec<ObjectRef>,
    pub context: ObjectRef,
    pub action: Action,
}

pub struct PathResolver<'a> {
    graph: &'a dyn ObjectGraph,
    skins: &'a dyn SkinResolver,
    env: &'a dyn ScriptEnvironment,
    config: &'a AppConfig,
}

impl<'a> PathResolver<'a> {
    pub fn new(
        graph: &'a dyn ObjectGraph,
        skins: &'a dyn SkinResolver,
        env: &'a dyn ScriptEnvironment,
        config: &'a AppConfig,
    ) -> Self {
        Self {
            graph,
            skins,
            env,
            config,
        }
    }

    /// Walk `path` from the root.
    ///
    /// The last segment is tried as an action on the current object before it
    /// is treated as a child name.
    pub fn resolve(&self, path: &str) -> Result<Resolution, EngineError> {
        let tokens: Vec<&str> = path.split('/').filter(|t| !t.is_empty()).collect();
        if tokens.len() > MAX_PATH_SEGMENTS {
            return Err(EngineError::PathTooLong);
        }

        let root = self.graph.root();
        let mut visited = vec![root.clone()];
        let mut current = root;
        let mut action = None;

        for (i, token) in tokens.iter().enumerate() {
            if i == tokens.len() - 1 {
                action = self.action_for(&current, Some(*token));
                if action.is_some() {
                    break;
                }
            }
            match self.graph.child(&current, token) {
                Some(child) => {
                    visited.push(child.clone());
                    current = child;
                }
                None => return Err(EngineError::NotFound("Object not found.".to_string())),
            }
        }

        let action = match action {
            Some(action) => action,
            None => self
                .action_for(&current, None)
                .ok_or_else(|| EngineError::NotFound("Action not found".to_string()))?,
        };

        Ok(Resolution {
            path: visited,
            context: current,
            action,
        })
    }

    /// Resolve a named action on the root, as used for the not-found and
    /// error actions.
    pub fn root_action(&self, name: &str) -> Option<Resolution> {
        let root = self.graph.root();
        let action = self.action_for(&root, Some(name))?;
        Some(Resolution {
            path: vec![root.clone()],
            context: root,
            action,
        })
    }

    /// The action `name` names on `object`, or the default action for `None`.
    pub fn action_for(&self, object: &ObjectRef, name: Option<&str>) -> Option<Action> {
        let name = name.unwrap_or(self.config.default_action.as_str());
        if let Some((template, extension)) = name.rsplit_once('.') {
            let content_type = self.config.content_type_for(extension)?;
            let type_tag = self.graph.type_tag(object);
            self.skins.resolve(&type_tag, template)?;
            return Some(Action::Template {
                requested: name.to_string(),
                name: template.to_string(),
                content_type: content_type.to_string(),
            });
        }

        let function = if name.ends_with(ACTION_SUFFIX) {
            name.to_string()
        } else {
            format!("{}{}", name, ACTION_SUFFIX)
        };
        self.env
            .has_function(Some(object), &function)
            .then_some(Action::Function { name: function })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstore::{MemoryStore, ScriptedEngine, TemplateSet};
    use model::{ScriptingEngine, Value};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        store: MemoryStore,
        env: Box<dyn ScriptEnvironment>,
        skins: TemplateSet,
        config: AppConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let store = MemoryStore::new("Root");
            let root = store.root();
            let products = store.add_object(&root, "products", "Products").unwrap();
            store.add_object(&products, "42", "Product").unwrap();
            store.add_object(&root, "catalog", "Catalog").unwrap();

            let scripting = ScriptedEngine::new(Arc::new(store.clone()));
            for (tag, name) in [
                ("Root", "main_action"),
                ("Product", "main_action"),
                ("Product", "edit_action"),
                ("Products", "42_action"),
            ] {
                scripting.define(tag, name, |_, _, _| Ok(Value::Null));
            }
            let skins = TemplateSet::new();
            skins.add("Catalog", "list", "<ul></ul>");

            Self {
                env: scripting.create_environment().unwrap(),
                store,
                skins,
                config: AppConfig::default(),
            }
        }

        fn resolver(&self) -> PathResolver<'_> {
            PathResolver::new(&self.store, &self.skins, self.env.as_ref(), &self.config)
        }
    }

    #[test]
    fn empty_path_uses_root_default_action() {
        let fx = Fixture::new();
        let resolved = fx.resolver().resolve("").unwrap();
        assert_eq!(resolved.path, vec![fx.store.root()]);
        assert_eq!(resolved.action.exposed_name(), "main");
    }

    #[test]
    fn explicit_action_suffix_is_kept() {
        let fx = Fixture::new();
        let resolved = fx.resolver().resolve("products/42/edit_action").unwrap();
        let ids: Vec<&str> = resolved.path.iter().map(ObjectRef::id).collect();
        assert_eq!(ids, ["root", "root/products", "root/products/42"]);
        assert_eq!(
            resolved.action,
            Action::Function {
                name: "edit_action".into()
            }
        );
        assert_eq!(resolved.action.exposed_name(), "edit");
    }

    #[test]
    fn last_segment_prefers_action_over_child() {
        let fx = Fixture::new();
        // `products` defines 42_action, so the child named 42 is not entered
        let resolved = fx.resolver().resolve("/products//42/").unwrap();
        assert_eq!(resolved.context.id(), "root/products");
        assert_eq!(resolved.action.exposed_name(), "42");
    }

    #[test]
    fn template_action_carries_content_type() {
        let fx = Fixture::new();
        let resolved = fx.resolver().resolve("catalog/list.html").unwrap();
        assert_eq!(
            resolved.action,
            Action::Template {
                requested: "list.html".into(),
                name: "list".into(),
                content_type: "text/html".into(),
            }
        );
        assert_eq!(resolved.action.exposed_name(), "list.html");
    }

    #[test]
    fn unknown_extension_is_not_an_action() {
        let fx = Fixture::new();
        let err = fx.resolver().resolve("catalog/list.exe").unwrap_err();
        assert_eq!(err, EngineError::NotFound("Object not found.".into()));
    }

    #[test]
    fn missing_default_action_is_reported() {
        let fx = Fixture::new();
        let err = fx.resolver().resolve("catalog").unwrap_err();
        assert_eq!(err, EngineError::NotFound("Action not found".into()));
    }

    #[test]
    fn missing_child_is_reported() {
        let fx = Fixture::new();
        let err = fx.resolver().resolve("nowhere/else").unwrap_err();
        assert_eq!(err, EngineError::NotFound("Object not found.".into()));
    }

    struct CountingGraph {
        lookups: AtomicUsize,
    }

    impl ObjectGraph for CountingGraph {
        fn root(&self) -> ObjectRef {
            ObjectRef::new("root")
        }

        fn child(&self, parent: &ObjectRef, name: &str) -> Option<ObjectRef> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Some(ObjectRef::new(&format!("{}/{}", parent, name)))
        }

        fn type_tag(&self, _: &ObjectRef) -> String {
            "Node".into()
        }
    }

    #[test]
    fn overlong_path_is_rejected_before_lookup() {
        let fx = Fixture::new();
        let graph = CountingGraph {
            lookups: AtomicUsize::new(0),
        };
        let resolver = PathResolver::new(&graph, &fx.skins, fx.env.as_ref(), &fx.config);
        let path = vec!["x"; MAX_PATH_SEGMENTS + 1].join("/");
        assert_eq!(resolver.resolve(&path), Err(EngineError::PathTooLong));
        assert_eq!(graph.lookups.load(Ordering::SeqCst), 0);

        let path = vec!["x"; MAX_PATH_SEGMENTS].join("/");
        assert!(matches!(resolver.resolve(&path), Err(EngineError::NotFound(_))));
        assert_eq!(graph.lookups.load(Ordering::SeqCst), MAX_PATH_SEGMENTS);
    }

    #[test]
    fn root_action_lookup() {
        let fx = Fixture::new();
        assert!(fx.resolver().root_action("notfound").is_none());
        let main = fx.resolver().root_action("main").unwrap();
        assert_eq!(main.context, fx.store.root());
    }
}

use std::fmt;
use std::sync::Arc;

/// Opaque handle to a node in the application's object tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(Arc<str>);

impl ObjectRef {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Navigation over the object tree that request paths are resolved against.
pub trait ObjectGraph: Send + Sync {
    fn root(&self) -> ObjectRef;

    /// Named child of `parent`, if any.
    fn child(&self, parent: &ObjectRef, name: &str) -> Option<ObjectRef>;

    /// Prototype name of `object`, used for skin and action lookup.
    fn type_tag(&self, object: &ObjectRef) -> String;
}

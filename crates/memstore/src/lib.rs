//! In-memory implementations of the engine's collaborators: an object tree
//! with transactional properties, a closure-backed scripting engine and a
//! placeholder template registry.

mod scripting;
mod store;
mod templates;

pub use scripting::{ScriptFn, ScriptedEngine};
pub use store::{MemoryStore, StoreStats};
pub use templates::TemplateSet;

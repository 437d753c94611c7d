//! Shared data model for the request engine: object references, request
//! descriptors, collaborator traits and the error taxonomy.

pub mod config;
mod error;
mod object;
mod principal;
mod request;
mod script;
mod store;
pub mod upload;

pub use config::AppConfig;
pub use error::{ActionError, ConfigError, ConflictError, EngineError, ScriptError, StoreError};
pub use object::{ObjectGraph, ObjectRef};
pub use principal::Principal;
pub use request::{RequestDescriptor, RequestKey, RequestKind};
pub use script::{ExecutionContext, Renderable, ScriptEnvironment, ScriptingEngine, SkinResolver};
pub use store::{Store, StoreTransaction};
pub use upload::UploadStatus;

pub use serde_json::Value;

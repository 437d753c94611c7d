use std::path::PathBuf;

use response::{RedirectSignal, ResponseError};
use thiserror::Error;

/// Failure surfaced to callers of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(String),

    #[error("Path too long")]
    PathTooLong,

    #[error("{0}")]
    Concurrency(String),

    #[error("{message}")]
    Application {
        message: String,
        trace: Option<String>,
    },

    #[error("Request timed out")]
    Timeout,

    #[error(transparent)]
    Encoding(#[from] ResponseError),

    #[error("Application is stopped")]
    Stopped,

    #[error("Maximum number of evaluators exceeded")]
    Busy,

    #[error("{0}")]
    Forbidden(String),
}

impl EngineError {
    pub fn application(message: impl Into<String>) -> Self {
        EngineError::Application {
            message: message.into(),
            trace: None,
        }
    }

    pub fn trace(&self) -> Option<&str> {
        match self {
            EngineError::Application { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }
}

/// Error raised by user code or the scripting layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    pub trace: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl From<ScriptError> for EngineError {
    fn from(err: ScriptError) -> Self {
        EngineError::Application {
            message: err.message,
            trace: err.trace,
        }
    }
}

/// Write/write conflict detected by the store. Retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConflictError(pub String);

/// Outcome of an action other than a plain return value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("{0}")]
    Redirect(#[from] RedirectSignal),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl From<StoreError> for ActionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(conflict) => ActionError::Conflict(conflict),
            other => ActionError::Script(ScriptError::new(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error("Transaction {0} is no longer open")]
    Closed(String),

    #[error("Unknown object {0}")]
    UnknownObject(String),

    #[error("Store failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_stay_retryable() {
        let err: ActionError = StoreError::Conflict(ConflictError("stale write".into())).into();
        assert!(matches!(err, ActionError::Conflict(_)));

        let err: ActionError = StoreError::Closed("app/x".into()).into();
        assert!(matches!(err, ActionError::Script(_)));
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use response::Conditional;
use serde::Serialize;

use crate::Principal;

/// What kind of invocation an evaluator is currently serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    None,
    Http,
    Rpc,
    Internal,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::None => "none",
            RequestKind::Http => "http",
            RequestKind::Rpc => "rpc",
            RequestKind::Internal => "internal",
        }
    }
}

/// Immutable description of one inbound call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub conditional: Conditional,
    pub principal: Option<Arc<Principal>>,
    /// Error carried over from an earlier stage; routes straight to the error action.
    pub error: Option<String>,
    /// Conflict retries already spent on this request.
    pub conflict_retries: u32,
    pub created: Instant,
}

impl RequestDescriptor {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            params: BTreeMap::new(),
            conditional: Conditional::default(),
            principal: None,
            error: None,
            conflict_retries: 0,
            created: Instant::now(),
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: &str) -> Self {
        Self::new("POST", path)
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_principal(mut self, principal: Arc<Principal>) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_etag(mut self, etag: &str) -> Self {
        self.conditional.etags.push(etag.to_string());
        self
    }

    pub fn with_if_modified_since(mut self, millis: i64) -> Self {
        self.conditional.if_modified_since = Some(millis);
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn principal_id(&self) -> Option<&str> {
        self.principal.as_deref().map(Principal::id)
    }

    /// Identity used to detect identical in-flight requests.
    pub fn key(&self) -> RequestKey {
        RequestKey {
            principal: self.principal_id().map(str::to_string),
            method: self.method.clone(),
            path: self.path.clone(),
            params: self
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    principal: Option<String>,
    method: String,
    path: String,
    params: Vec<(String, String)>,
}

impl RequestKey {
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_match_for_identical_requests() {
        let alice = Arc::new(Principal::new("alice"));
        let a = RequestDescriptor::get("catalog")
            .with_param("page", "2")
            .with_principal(alice.clone());
        let b = RequestDescriptor::new("get", "catalog")
            .with_param("page", "2")
            .with_principal(alice);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn keys_differ_by_principal_and_params() {
        let base = RequestDescriptor::get("catalog");
        let other_user = base
            .clone()
            .with_principal(Arc::new(Principal::new("bob")));
        let other_param = base.clone().with_param("page", "3");
        assert_ne!(base.key(), other_user.key());
        assert_ne!(base.key(), other_param.key());
    }
}

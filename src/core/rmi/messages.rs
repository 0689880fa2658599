// src/core/rmi/messages.rs

//! The request and response payloads that carry a remote method call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// One remote method invocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteAccessRequest {
    pub correlation_id: Uuid,
    /// Name of the remote interface.
    pub class: String,
    pub method: String,
    pub args: Vec<Value>,
}

/// The answer to a `RemoteAccessRequest`, matched by `correlation_id`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteAccessResponse {
    pub correlation_id: Uuid,
    pub failure: Option<RemoteFailure>,
    pub result: Value,
}

impl RemoteAccessResponse {
    pub fn success(correlation_id: Uuid, result: Value) -> Self {
        Self {
            correlation_id,
            failure: None,
            result,
        }
    }

    pub fn failure(correlation_id: Uuid, failure: RemoteFailure) -> Self {
        Self {
            correlation_id,
            failure: Some(failure),
            result: Value::Null,
        }
    }
}

/// Why the peer could not produce a result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RemoteFailureKind {
    ObjectNotRegistered,
    MethodNotFound,
    InvalidArguments,
    /// An error raised by the implementation, named by the implementation.
    Application(String),
}

impl fmt::Display for RemoteFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteFailureKind::ObjectNotRegistered => f.write_str("ObjectNotRegistered"),
            RemoteFailureKind::MethodNotFound => f.write_str("MethodNotFound"),
            RemoteFailureKind::InvalidArguments => f.write_str("InvalidArguments"),
            RemoteFailureKind::Application(name) => f.write_str(name),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    pub kind: RemoteFailureKind,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(kind: RemoteFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

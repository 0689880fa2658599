// src/core/rmi/errors.rs

//! Errors observed by the caller of a remote method.

use super::messages::{RemoteFailure, RemoteFailureKind};
use crate::core::NetError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The request could not be written to the connection.
    #[error("Failed to send remote request: {0}")]
    SendFailed(String),

    /// The connection closed while the call was outstanding.
    #[error("Connection closed before the remote call completed")]
    ConnectionClosed,

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The peer has no object registered for the interface.
    #[error("No remote object registered for '{0}'")]
    ObjectNotRegistered(String),

    /// The remote implementation failed; the failure is wrapped.
    #[error("Remote request failed: {0}")]
    RequestFailed(RemoteFailure),

    /// A remote failure exempted from wrapping, surfaced as the peer reported it.
    #[error("{0}")]
    Exception(RemoteFailure),

    /// Raised by an implementation to report an application level failure.
    #[error("{kind}: {message}")]
    Application { kind: String, message: String },

    #[error("Codec Error: {0}")]
    Codec(String),
}

impl RemoteError {
    pub fn application(kind: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Application {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The failure kind of a wrapped or exempted remote failure, if any.
    pub fn failure_kind(&self) -> Option<&RemoteFailureKind> {
        match self {
            RemoteError::RequestFailed(f) | RemoteError::Exception(f) => Some(&f.kind),
            _ => None,
        }
    }

    /// Converts an implementation's error into what travels back to the caller.
    pub(crate) fn into_failure(self) -> RemoteFailure {
        match self {
            RemoteError::Application { kind, message } => RemoteFailure {
                kind: RemoteFailureKind::Application(kind),
                message,
            },
            // A nested call failed; forward what the innermost peer reported.
            RemoteError::RequestFailed(f) | RemoteError::Exception(f) => f,
            other => RemoteFailure {
                kind: RemoteFailureKind::Application("RemoteError".to_string()),
                message: other.to_string(),
            },
        }
    }
}

impl From<NetError> for RemoteError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Codec(msg) => RemoteError::Codec(msg),
            NetError::ConnectionDisconnected => RemoteError::ConnectionClosed,
            other => RemoteError::SendFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::Codec(e.to_string())
    }
}

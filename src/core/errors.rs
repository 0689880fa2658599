// src/core/errors.rs

//! Defines the primary error type for the dispatch core.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure the transport, routing and
/// pipeline layers can surface to a caller.
#[derive(Error, Debug, Clone)]
pub enum NetError {
    // --- Transport failures ---
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection disconnected")]
    ConnectionDisconnected,

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    // --- Routing failures ---
    /// No pipeline is registered for the type and no default handler exists.
    #[error("No communication specified for '{0}'")]
    CommunicationNotSpecified(String),

    /// The runtime type of a triggered value differs from its registration key.
    #[error("Type mismatch: expected '{expected}', got '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    // --- Pipeline access failures ---
    #[error("Pipeline access denied: {0}")]
    PipelineAccess(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    // --- Codec failures ---
    #[error("Codec Error: {0}")]
    Codec(String),

    #[error("Frame of {length} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { length: usize, limit: usize },

    // --- Configuration and internal failures ---
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl NetError {
    /// True for the routing failures that point at a configuration bug rather than
    /// a transient network problem.
    pub fn is_routing_failure(&self) -> bool {
        matches!(
            self,
            NetError::CommunicationNotSpecified(_) | NetError::TypeMismatch { .. }
        )
    }

    /// True if the error means the peer is gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            NetError::ConnectionDisconnected => true,
            NetError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

impl PartialEq for NetError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NetError::Io(e1), NetError::Io(e2)) => e1.kind() == e2.kind(),
            (NetError::SendFailed(s1), NetError::SendFailed(s2)) => s1 == s2,
            (NetError::Unsupported(s1), NetError::Unsupported(s2)) => s1 == s2,
            (NetError::CommunicationNotSpecified(s1), NetError::CommunicationNotSpecified(s2)) => {
                s1 == s2
            }
            (
                NetError::TypeMismatch {
                    expected: e1,
                    actual: a1,
                },
                NetError::TypeMismatch {
                    expected: e2,
                    actual: a2,
                },
            ) => e1 == e2 && a1 == a2,
            (NetError::PipelineAccess(s1), NetError::PipelineAccess(s2)) => s1 == s2,
            (NetError::Timeout(s1), NetError::Timeout(s2)) => s1 == s2,
            (NetError::Codec(s1), NetError::Codec(s2)) => s1 == s2,
            (
                NetError::FrameTooLarge {
                    length: l1,
                    limit: m1,
                },
                NetError::FrameTooLarge {
                    length: l2,
                    limit: m2,
                },
            ) => l1 == l2 && m1 == m2,
            (NetError::Config(s1), NetError::Config(s2)) => s1 == s2,
            (NetError::Internal(s1), NetError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        NetError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for NetError {
    fn from(e: serde_json::Error) -> Self {
        NetError::Codec(format!("JSON serialization/deserialization error: {e}"))
    }
}

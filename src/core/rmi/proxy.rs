// src/core/rmi/proxy.rs

//! The calling side of remote method invocation.
//!
//! A `RemoteProxy<dyn I>` implements `I` by turning every method call into a
//! `RemoteAccessRequest`, blocking until the matching response arrives on the bound
//! context, and resolving the response into the method's result. Failures that a
//! fallback may absorb are routed to it before they reach the caller.

use super::errors::RemoteError;
use super::messages::{RemoteAccessRequest, RemoteFailure, RemoteFailureKind};
use super::objects::RemoteInterface;
use crate::connection::ConnectionContext;
use crate::core::metrics;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// A local substitute used when a remote call cannot be satisfied.
pub enum Fallback<I: ?Sized> {
    /// A local implementation of the interface, called with the same arguments.
    Instance(Arc<I>),
    /// A side effect run in place of the call. The method result is decoded from `null`.
    Runnable(Arc<dyn Fn() + Send + Sync>),
}

impl<I: ?Sized> Clone for Fallback<I> {
    fn clone(&self) -> Self {
        match self {
            Fallback::Instance(instance) => Fallback::Instance(instance.clone()),
            Fallback::Runnable(runnable) => Fallback::Runnable(runnable.clone()),
        }
    }
}

/// Which remote failures are surfaced as they were reported instead of wrapped.
#[derive(Debug, Clone, Default)]
pub struct Exemptions {
    all: bool,
    kinds: HashSet<RemoteFailureKind>,
    methods: HashMap<String, HashSet<RemoteFailureKind>>,
}

impl Exemptions {
    pub fn exempts(&self, method: &str, kind: &RemoteFailureKind) -> bool {
        self.all
            || self.kinds.contains(kind)
            || self
                .methods
                .get(method)
                .is_some_and(|kinds| kinds.contains(kind))
    }
}

/// A dynamically dispatched stand-in for a remote object.
pub struct RemoteProxy<I: ?Sized> {
    context: Arc<ConnectionContext>,
    fallback: Option<Fallback<I>>,
    exemptions: Exemptions,
    timeout: Option<Duration>,
}

impl<I: ?Sized> Clone for RemoteProxy<I> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            fallback: self.fallback.clone(),
            exemptions: self.exemptions.clone(),
            timeout: self.timeout,
        }
    }
}

impl<I: RemoteInterface + ?Sized> fmt::Debug for RemoteProxy<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("interface", &I::NAME)
            .field("connection", &self.context.connection().id())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<I: RemoteInterface + ?Sized> RemoteProxy<I> {
    fn new(
        context: Arc<ConnectionContext>,
        fallback: Option<Fallback<I>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            context,
            fallback,
            exemptions: Exemptions::default(),
            timeout,
        }
    }

    /// Surfaces every remote failure of this interface unwrapped.
    pub fn ignore_remote_failures(mut self) -> Self {
        self.exemptions.all = true;
        self
    }

    pub fn ignore_remote_failure(mut self, kind: RemoteFailureKind) -> Self {
        self.exemptions.kinds.insert(kind);
        self
    }

    pub fn ignore_method_failure(mut self, method: &str, kind: RemoteFailureKind) -> Self {
        self.exemptions
            .methods
            .entry(method.to_string())
            .or_default()
            .insert(kind);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }

    /// Performs one remote call. `call_fallback` runs the same method on a fallback
    /// instance when one is configured and the call cannot be satisfied remotely.
    pub fn invoke<R, F>(&self, method: &str, args: Vec<Value>, call_fallback: F) -> Result<R, RemoteError>
    where
        R: DeserializeOwned,
        F: FnOnce(&I) -> Result<R, RemoteError>,
    {
        metrics::REMOTE_CALLS_TOTAL.inc();
        let correlation_id = Uuid::new_v4();
        let request = RemoteAccessRequest {
            correlation_id,
            class: I::NAME.to_string(),
            method: method.to_string(),
            args,
        };

        let blocks = self.context.remote_blocks();
        let pending = match blocks.register(correlation_id) {
            Ok(pending) => pending,
            Err(e) => return self.fall_back(e, call_fallback),
        };

        if let Err(e) = self.context.send(&request) {
            drop(pending);
            debug!("Remote call {}::{} could not be sent: {}", I::NAME, method, e);
            return self.fall_back(RemoteError::SendFailed(e.to_string()), call_fallback);
        }

        let response = match pending.wait(self.timeout) {
            Ok(response) => response,
            Err(RemoteError::ConnectionClosed) => {
                return self.fall_back(RemoteError::ConnectionClosed, call_fallback);
            }
            Err(e) => return Err(e),
        };

        match response.failure {
            None => Ok(serde_json::from_value(response.result)?),
            Some(RemoteFailure {
                kind: RemoteFailureKind::ObjectNotRegistered,
                ..
            }) => self.fall_back(
                RemoteError::ObjectNotRegistered(I::NAME.to_string()),
                call_fallback,
            ),
            Some(failure) if self.exemptions.exempts(method, &failure.kind) => {
                if self.fallback.is_some() {
                    self.fall_back(RemoteError::Exception(failure), call_fallback)
                } else {
                    Err(RemoteError::Exception(failure))
                }
            }
            Some(failure) => Err(RemoteError::RequestFailed(failure)),
        }
    }

    fn fall_back<R, F>(&self, error: RemoteError, call_fallback: F) -> Result<R, RemoteError>
    where
        R: DeserializeOwned,
        F: FnOnce(&I) -> Result<R, RemoteError>,
    {
        match &self.fallback {
            Some(Fallback::Instance(instance)) => {
                debug!("Resolving {} via fallback instance ({})", I::NAME, error);
                call_fallback(instance.as_ref())
            }
            Some(Fallback::Runnable(runnable)) => {
                debug!("Resolving {} via fallback runnable ({})", I::NAME, error);
                runnable();
                // A runnable has no value to give; only null-decodable results resolve.
                serde_json::from_value(Value::Null).map_err(|_| error)
            }
            None => Err(error),
        }
    }
}

/// Builds proxies bound to one connection context.
#[derive(Clone)]
pub struct RemoteObjectFactory {
    context: Arc<ConnectionContext>,
    timeout: Option<Duration>,
}

impl RemoteObjectFactory {
    pub fn new(context: Arc<ConnectionContext>, timeout: Option<Duration>) -> Self {
        Self { context, timeout }
    }

    pub fn create<I: RemoteInterface + ?Sized>(&self) -> RemoteProxy<I> {
        RemoteProxy::new(self.context.clone(), None, self.timeout)
    }

    pub fn create_with_fallback<I: RemoteInterface + ?Sized>(
        &self,
        fallback: Arc<I>,
    ) -> RemoteProxy<I> {
        RemoteProxy::new(
            self.context.clone(),
            Some(Fallback::Instance(fallback)),
            self.timeout,
        )
    }

    /// Builds a proxy that runs `runnable` whenever a call cannot be satisfied
    /// remotely. Methods returning `()` or an `Option` then resolve to `()` or `None`.
    /// For any other return type the runnable still runs, but the call reports the
    /// original failure because there is no value to return.
    pub fn create_with_runnable<I, F>(&self, runnable: F) -> RemoteProxy<I>
    where
        I: RemoteInterface + ?Sized,
        F: Fn() + Send + Sync + 'static,
    {
        RemoteProxy::new(
            self.context.clone(),
            Some(Fallback::Runnable(Arc::new(runnable))),
            self.timeout,
        )
    }
}

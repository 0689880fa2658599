// src/core/rmi/objects.rs

//! The receiving side of remote method invocation: objects exposed to peers and
//! the dispatch from a `RemoteAccessRequest` to the implementation.

use super::errors::RemoteError;
use super::messages::{RemoteAccessRequest, RemoteAccessResponse, RemoteFailure, RemoteFailureKind};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// An interface that can be called across the wire. Implemented for `dyn Trait` by
/// the `remote_interface!` macro.
pub trait RemoteInterface: Send + Sync + 'static {
    /// The name both peers use for this interface.
    const NAME: &'static str;

    /// Calls `method` on `target` with JSON-encoded arguments and returns the
    /// JSON-encoded result.
    fn dispatch(target: &Self, method: &str, args: Vec<Value>) -> Result<Value, RemoteFailure>;
}

type Invoker = Arc<dyn Fn(&str, Vec<Value>) -> Result<Value, RemoteFailure> + Send + Sync>;

/// The objects this peer exposes, keyed by interface name.
#[derive(Default)]
pub struct RemoteObjectRegistration {
    objects: DashMap<String, Invoker>,
}

impl RemoteObjectRegistration {
    pub fn new() -> Self {
        Default::default()
    }

    /// Exposes `object` under `I::NAME`, replacing any previous object for the interface.
    pub fn register<I>(&self, object: Arc<I>)
    where
        I: RemoteInterface + ?Sized,
    {
        let invoker: Invoker = Arc::new(move |method: &str, args: Vec<Value>| {
            I::dispatch(&*object, method, args)
        });
        self.objects.insert(I::NAME.to_string(), invoker);
        debug!("Registered remote object for '{}'", I::NAME);
    }

    pub fn unregister<I>(&self) -> bool
    where
        I: RemoteInterface + ?Sized,
    {
        self.objects.remove(I::NAME).is_some()
    }

    pub fn is_registered<I>(&self) -> bool
    where
        I: RemoteInterface + ?Sized,
    {
        self.objects.contains_key(I::NAME)
    }

    pub fn clear(&self) {
        self.objects.clear();
    }

    /// Runs a request against the registered object and builds the response.
    pub fn handle(&self, request: &RemoteAccessRequest) -> RemoteAccessResponse {
        let invoker = self
            .objects
            .get(&request.class)
            .map(|entry| entry.value().clone());
        let Some(invoker) = invoker else {
            debug!(
                "Remote call {}::{} refused: no object registered",
                request.class, request.method
            );
            return RemoteAccessResponse::failure(
                request.correlation_id,
                RemoteFailure::new(
                    RemoteFailureKind::ObjectNotRegistered,
                    format!("no remote object registered for '{}'", request.class),
                ),
            );
        };
        match invoker(&request.method, request.args.clone()) {
            Ok(result) => RemoteAccessResponse::success(request.correlation_id, result),
            Err(failure) => RemoteAccessResponse::failure(request.correlation_id, failure),
        }
    }
}

// --- Helpers used by `remote_interface!` expansions ---

pub fn encode_argument<T: Serialize>(value: &T) -> Result<Value, RemoteError> {
    Ok(serde_json::to_value(value)?)
}

/// Decodes argument `index` of `method`, mapping a missing or malformed argument to
/// an `InvalidArguments` failure.
pub fn decode_argument<T: DeserializeOwned>(
    method: &str,
    args: &mut std::vec::IntoIter<Value>,
    index: usize,
) -> Result<T, RemoteFailure> {
    let value = args.next().ok_or_else(|| {
        RemoteFailure::new(
            RemoteFailureKind::InvalidArguments,
            format!("{method}: missing argument {index}"),
        )
    })?;
    serde_json::from_value(value).map_err(|e| {
        RemoteFailure::new(
            RemoteFailureKind::InvalidArguments,
            format!("{method}: argument {index}: {e}"),
        )
    })
}

/// Encodes an implementation's return value, or turns its error into a failure.
pub fn encode_result<R: Serialize>(result: Result<R, RemoteError>) -> Result<Value, RemoteFailure> {
    match result {
        Ok(value) => serde_json::to_value(value).map_err(|e| {
            RemoteFailure::new(
                RemoteFailureKind::Application("Codec".to_string()),
                e.to_string(),
            )
        }),
        Err(e) => Err(e.into_failure()),
    }
}

pub fn method_not_found(interface: &str, method: &str) -> RemoteFailure {
    RemoteFailure::new(
        RemoteFailureKind::MethodNotFound,
        format!("'{interface}' has no method '{method}'"),
    )
}

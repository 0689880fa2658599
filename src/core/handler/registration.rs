// src/core/handler/registration.rs

//! The type-to-pipeline registry: the single entry point that turns "a value of
//! type `T` arrived on this context" into "run the pipeline for `T`".

use super::dispatcher::CommunicationDispatcher;
use super::pipeline::ReceivePipeline;
use crate::connection::{ConnectionContext, Session};
use crate::core::NetError;
use crate::core::protocol::{AnyValue, MessageTypes, TypeKey, WireMessage};
use parking_lot::RwLock;
use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A `ReceivePipeline<T>` with `T` erased, as stored in the registry.
pub trait AnyPipeline: Send + Sync {
    /// Runs the pipeline after downcasting `value` to the pipeline's type.
    fn run_any(
        &self,
        context: &ConnectionContext,
        session: &Session,
        value: &(dyn Any + Send + Sync),
    ) -> Result<(), NetError>;

    fn is_closed(&self) -> bool;

    fn close(&self);

    fn type_name(&self) -> &'static str;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static> AnyPipeline for ReceivePipeline<T> {
    fn run_any(
        &self,
        context: &ConnectionContext,
        session: &Session,
        value: &(dyn Any + Send + Sync),
    ) -> Result<(), NetError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| NetError::TypeMismatch {
                expected: type_name::<T>().to_string(),
                actual: format!("{:?}", (*value).type_id()),
            })?;
        self.run(context, session, value)
    }

    fn is_closed(&self) -> bool {
        ReceivePipeline::is_closed(self)
    }

    fn close(&self) {
        ReceivePipeline::close(self)
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

type ValueHandler = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> anyhow::Result<()> + Send + Sync>;
type ContextHandler = Arc<
    dyn Fn(&ConnectionContext, &Session, &(dyn Any + Send + Sync)) -> anyhow::Result<()>
        + Send
        + Sync,
>;

/// Invoked for values whose type has no pipeline.
#[derive(Clone)]
enum DefaultHandler {
    Value(ValueHandler),
    Contextual(ContextHandler),
}

/// Maps each registered type to exactly one `ReceivePipeline`.
pub struct CommunicationRegistration {
    pipelines: RwLock<HashMap<TypeKey, Arc<dyn AnyPipeline>>>,
    defaults: RwLock<Vec<DefaultHandler>>,
    dispatcher: CommunicationDispatcher,
    types: Arc<MessageTypes>,
    acquire_timeout: Option<Duration>,
}

impl Default for CommunicationRegistration {
    fn default() -> Self {
        Self::new(
            CommunicationDispatcher::default(),
            Arc::new(MessageTypes::new()),
            None,
        )
    }
}

impl CommunicationRegistration {
    pub fn new(
        dispatcher: CommunicationDispatcher,
        types: Arc<MessageTypes>,
        acquire_timeout: Option<Duration>,
    ) -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
            defaults: RwLock::new(Vec::new()),
            dispatcher,
            types,
            acquire_timeout,
        }
    }

    pub fn dispatcher(&self) -> &CommunicationDispatcher {
        &self.dispatcher
    }

    pub fn types(&self) -> &Arc<MessageTypes> {
        &self.types
    }

    /// Returns the pipeline for `T`, creating it on first use. `T` is also declared
    /// so frames carrying it decode to `T`.
    pub fn register<T: WireMessage>(&self) -> Arc<ReceivePipeline<T>> {
        self.types.declare::<T>();
        let key = TypeKey::of::<T>();

        if let Some(existing) = self.typed_pipeline::<T>(&key) {
            return existing;
        }

        let mut pipelines = self.pipelines.write();
        // Another thread may have registered between the read and the write lock.
        if let Some(existing) = pipelines.get(&key).cloned()
            && let Ok(typed) = existing.into_any().downcast::<ReceivePipeline<T>>()
        {
            return typed;
        }
        let pipeline = Arc::new(ReceivePipeline::<T>::new(self.acquire_timeout));
        pipelines.insert(key, pipeline.clone());
        debug!("Registered receive pipeline for '{}'", key);
        pipeline
    }

    fn typed_pipeline<T: Send + Sync + 'static>(
        &self,
        key: &TypeKey,
    ) -> Option<Arc<ReceivePipeline<T>>> {
        let existing = self.pipelines.read().get(key).cloned()?;
        existing.into_any().downcast::<ReceivePipeline<T>>().ok()
    }

    /// The pipeline for `T`, if registered.
    pub fn pipeline<T: Send + Sync + 'static>(&self) -> Option<Arc<ReceivePipeline<T>>> {
        self.typed_pipeline::<T>(&TypeKey::of::<T>())
    }

    /// Declares `T` for decoding without creating a pipeline. Values of `T` then
    /// reach the default handlers as `T` rather than as a raw envelope.
    pub fn declare<T: WireMessage>(&self) {
        self.types.declare::<T>();
    }

    /// Removes and closes the pipeline for `T`.
    pub fn unregister<T: 'static>(&self) -> bool {
        match self.pipelines.write().remove(&TypeKey::of::<T>()) {
            Some(pipeline) => {
                pipeline.close();
                true
            }
            None => false,
        }
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.pipelines.read().contains_key(&TypeKey::of::<T>())
    }

    /// Removes and closes every pipeline. Default handlers stay.
    pub fn clear(&self) {
        let drained: Vec<_> = self.pipelines.write().drain().collect();
        for (_, pipeline) in drained {
            pipeline.close();
        }
    }

    pub fn registered_count(&self) -> usize {
        self.pipelines.read().len()
    }

    /// Adds a handler for unregistered types that receives the raw value only.
    pub fn add_default_handler<F>(&self, handler: F)
    where
        F: Fn(&(dyn Any + Send + Sync)) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.defaults
            .write()
            .push(DefaultHandler::Value(Arc::new(handler)));
    }

    /// Adds a handler for unregistered types that also receives the context and session.
    pub fn add_default_context_handler<F>(&self, handler: F)
    where
        F: Fn(&ConnectionContext, &Session, &(dyn Any + Send + Sync)) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.defaults
            .write()
            .push(DefaultHandler::Contextual(Arc::new(handler)));
    }

    pub fn clear_default_handlers(&self) {
        self.defaults.write().clear();
    }

    pub fn default_handler_count(&self) -> usize {
        self.defaults.read().len()
    }

    /// Routes `value` to the pipeline registered for `key`.
    ///
    /// The runtime type of `value` must be exactly `key`'s type. Without a pipeline,
    /// every default handler runs in order; without default handlers the value is
    /// rejected with `CommunicationNotSpecified`. Routing failures are always returned
    /// synchronously, whatever the dispatcher.
    pub fn trigger(
        &self,
        key: TypeKey,
        context: &Arc<ConnectionContext>,
        session: &Arc<Session>,
        value: AnyValue,
    ) -> Result<(), NetError> {
        if !key.matches(&*value) {
            return Err(NetError::TypeMismatch {
                expected: key.name().to_string(),
                actual: format!("{:?}", (*value).type_id()),
            });
        }

        let pipeline = self.pipelines.read().get(&key).cloned();
        if let Some(pipeline) = pipeline {
            return self
                .dispatcher
                .dispatch(pipeline, context.clone(), session.clone(), value);
        }

        let defaults = self.defaults.read().clone();
        if defaults.is_empty() {
            return Err(NetError::CommunicationNotSpecified(key.name().to_string()));
        }
        for handler in defaults {
            let result = match &handler {
                DefaultHandler::Value(h) => h(&*value),
                DefaultHandler::Contextual(h) => h(context, session, &*value),
            };
            if let Err(e) = result {
                warn!("Default handler failed for '{}': {:#}", key, e);
            }
        }
        Ok(())
    }

    /// Typed convenience over `trigger`.
    pub fn trigger_value<T: Send + Sync + 'static>(
        &self,
        context: &Arc<ConnectionContext>,
        session: &Arc<Session>,
        value: T,
    ) -> Result<(), NetError> {
        self.trigger(TypeKey::of::<T>(), context, session, Box::new(value))
    }
}

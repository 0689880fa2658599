// src/core/handler/pipeline.rs

//! Implements `ReceivePipeline`, the ordered and guarded handler chain for one
//! message type.
//!
//! Every entry whose guards pass runs, in list order. Runs on one pipeline are
//! serialized by a per-pipeline lock; each run iterates a snapshot of the entry list,
//! so entries added or removed during a run only affect later runs.

use crate::connection::{ConnectionContext, Session};
use crate::core::NetError;
use crate::core::metrics;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Application code invoked for each received value of type `T`.
pub trait OnReceive<T>: Send + Sync {
    fn on_receive(
        &self,
        context: &ConnectionContext,
        session: &Session,
        value: &T,
    ) -> anyhow::Result<()>;

    /// Called right before `on_receive`.
    fn before_execution(&self, _value: &T) {}

    /// Called after `on_receive` returned `Ok`.
    fn successfully_executed(&self, _value: &T) {}

    /// Called after `on_receive` returned an error. The run continues with the next entry.
    fn exception_encountered(&self, _value: &T, _error: &anyhow::Error) {}
}

struct FnHandler<F>(F);

impl<T, F> OnReceive<T> for FnHandler<F>
where
    F: Fn(&ConnectionContext, &Session, &T) -> anyhow::Result<()> + Send + Sync,
{
    fn on_receive(
        &self,
        context: &ConnectionContext,
        session: &Session,
        value: &T,
    ) -> anyhow::Result<()> {
        (self.0)(context, session, value)
    }
}

type Guard<T> = Arc<dyn Fn(&Session, &T) -> bool + Send + Sync>;

/// Identifies one entry of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Entry<T> {
    id: HandlerId,
    handler: Arc<dyn OnReceive<T>>,
    guards: RwLock<Vec<Guard<T>>>,
}

impl<T> Entry<T> {
    fn passes(&self, session: &Session, value: &T) -> bool {
        self.guards.read().iter().all(|guard| guard(session, value))
    }
}

/// Returned by `add_first`/`add_last`; chains guards onto the new entry.
pub struct PipelineCondition<T> {
    entry: Arc<Entry<T>>,
}

impl<T: 'static> PipelineCondition<T> {
    /// Adds a guard over the session and the value. The handler runs only if every
    /// guard returns `true`.
    pub fn require<P>(self, predicate: P) -> Self
    where
        P: Fn(&Session, &T) -> bool + Send + Sync + 'static,
    {
        self.entry.guards.write().push(Arc::new(predicate));
        self
    }

    pub fn require_session<P>(self, predicate: P) -> Self
    where
        P: Fn(&Session) -> bool + Send + Sync + 'static,
    {
        self.require(move |session, _| predicate(session))
    }

    pub fn require_value<P>(self, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.require(move |_, value| predicate(value))
    }

    pub fn id(&self) -> HandlerId {
        self.entry.id
    }
}

/// The handler chain for one message type.
pub struct ReceivePipeline<T> {
    entries: RwLock<Vec<Arc<Entry<T>>>>,
    access: Mutex<()>,
    closed: AtomicBool,
    next_id: AtomicU64,
    acquire_timeout: Option<Duration>,
}

impl<T> fmt::Debug for ReceivePipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivePipeline")
            .field("type", &type_name::<T>())
            .field("entries", &self.entries.read().len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Send + Sync + 'static> Default for ReceivePipeline<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T: Send + Sync + 'static> ReceivePipeline<T> {
    /// Creates a pipeline whose `run` waits at most `acquire_timeout` for the access
    /// lock. `None` waits forever.
    pub fn new(acquire_timeout: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            access: Mutex::new(()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            acquire_timeout,
        }
    }

    fn entry(&self, handler: Arc<dyn OnReceive<T>>) -> Arc<Entry<T>> {
        Arc::new(Entry {
            id: HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            handler,
            guards: RwLock::new(Vec::new()),
        })
    }

    /// Inserts a closure handler before every existing entry.
    pub fn add_first<F>(&self, handler: F) -> PipelineCondition<T>
    where
        F: Fn(&ConnectionContext, &Session, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_first_handler(Arc::new(FnHandler(handler)))
    }

    /// Appends a closure handler after every existing entry.
    pub fn add_last<F>(&self, handler: F) -> PipelineCondition<T>
    where
        F: Fn(&ConnectionContext, &Session, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_last_handler(Arc::new(FnHandler(handler)))
    }

    pub fn add_first_handler(&self, handler: Arc<dyn OnReceive<T>>) -> PipelineCondition<T> {
        let entry = self.entry(handler);
        self.entries.write().insert(0, entry.clone());
        PipelineCondition { entry }
    }

    pub fn add_last_handler(&self, handler: Arc<dyn OnReceive<T>>) -> PipelineCondition<T> {
        let entry = self.entry(handler);
        self.entries.write().push(entry.clone());
        PipelineCondition { entry }
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Removes every entry that runs `handler`.
    pub fn remove_handler(&self, handler: &Arc<dyn OnReceive<T>>) -> bool {
        let target = Arc::as_ptr(handler) as *const ();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| Arc::as_ptr(&e.handler) as *const () != target);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Disables `run` and `acquire` until `open` is called.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn open(&self) {
        self.closed.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), NetError> {
        if self.is_closed() {
            return Err(NetError::PipelineAccess(format!(
                "pipeline for '{}' is closed",
                type_name::<T>()
            )));
        }
        Ok(())
    }

    /// Takes the pipeline's access lock, honouring the configured acquire timeout.
    pub fn acquire(&self) -> Result<PipelineAccess<'_, T>, NetError> {
        match self.acquire_timeout {
            Some(timeout) => self.try_acquire_for(timeout),
            None => {
                self.ensure_open()?;
                let lock = self.access.lock();
                Ok(PipelineAccess {
                    pipeline: self,
                    _lock: lock,
                })
            }
        }
    }

    pub fn try_acquire_for(&self, timeout: Duration) -> Result<PipelineAccess<'_, T>, NetError> {
        self.ensure_open()?;
        let lock = self.access.try_lock_for(timeout).ok_or_else(|| {
            NetError::Timeout(format!(
                "pipeline for '{}' not acquired within {:?}",
                type_name::<T>(),
                timeout
            ))
        })?;
        Ok(PipelineAccess {
            pipeline: self,
            _lock: lock,
        })
    }

    /// Runs every eligible entry in order while holding the access lock.
    pub fn run(
        &self,
        context: &ConnectionContext,
        session: &Session,
        value: &T,
    ) -> Result<(), NetError> {
        self.acquire()?.run(context, session, value)
    }

    fn execute(&self, context: &ConnectionContext, session: &Session, value: &T) {
        metrics::PIPELINE_RUNS_TOTAL.inc();
        let snapshot: Vec<Arc<Entry<T>>> = self.entries.read().clone();
        for entry in snapshot {
            if !entry.passes(session, value) {
                continue;
            }
            let handler = &entry.handler;
            handler.before_execution(value);
            match handler.on_receive(context, session, value) {
                Ok(()) => handler.successfully_executed(value),
                Err(e) => {
                    metrics::HANDLER_FAILURES_TOTAL.inc();
                    warn!(
                        "Handler {:?} for '{}' failed: {:#}",
                        entry.id,
                        type_name::<T>(),
                        e
                    );
                    handler.exception_encountered(value, &e);
                }
            }
        }
        debug!("Pipeline for '{}' finished a run", type_name::<T>());
    }
}

/// Exclusive access to a pipeline. Runs issued through it do not re-acquire the lock;
/// dropping it releases the pipeline.
pub struct PipelineAccess<'a, T> {
    pipeline: &'a ReceivePipeline<T>,
    _lock: MutexGuard<'a, ()>,
}

impl<T: Send + Sync + 'static> PipelineAccess<'_, T> {
    pub fn run(
        &self,
        context: &ConnectionContext,
        session: &Session,
        value: &T,
    ) -> Result<(), NetError> {
        self.pipeline.ensure_open()?;
        self.pipeline.execute(context, session, value);
        Ok(())
    }

    pub fn release(self) {}
}

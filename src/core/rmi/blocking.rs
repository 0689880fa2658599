// src/core/rmi/blocking.rs

//! Manages callers that are blocked waiting for a remote response.
//!
//! # Avoiding lost wakeups
//!
//! A correlation id is registered before its request is written, so a response that
//! arrives before the caller starts waiting is stored in the slot and picked up by
//! the later `wait`. Each slot accepts one value; the first response or failure wins.

use super::errors::RemoteError;
use super::messages::RemoteAccessResponse;
use crate::core::metrics;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// The outcome of waiting on a `ResponseSlot`.
#[derive(Debug, PartialEq)]
pub enum WaitOutcome<T> {
    Ready(T),
    /// The slot was failed before a value arrived.
    Closed,
    TimedOut,
}

#[derive(Debug)]
enum SlotState<T> {
    Empty,
    Filled(T),
    Failed,
    Consumed,
}

/// A single-assignment cell that one thread fills and another blocks on.
#[derive(Debug)]
pub struct ResponseSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Default for ResponseSlot<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
            ready: Condvar::new(),
        }
    }
}

impl<T> ResponseSlot<T> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Stores `value` and wakes the waiter. Returns `false` if the slot was already
    /// resolved, in which case `value` is dropped.
    pub fn fill(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Empty) {
            return false;
        }
        *state = SlotState::Filled(value);
        self.ready.notify_all();
        true
    }

    /// Resolves the slot without a value.
    pub fn fail(&self) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Empty) {
            return false;
        }
        *state = SlotState::Failed;
        self.ready.notify_all();
        true
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(*self.state.lock(), SlotState::Empty)
    }

    /// Blocks until the slot is resolved or `timeout` expires. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> WaitOutcome<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if matches!(*state, SlotState::Filled(_)) {
                if let SlotState::Filled(value) =
                    std::mem::replace(&mut *state, SlotState::Consumed)
                {
                    return WaitOutcome::Ready(value);
                }
            }
            if !matches!(*state, SlotState::Empty) {
                return WaitOutcome::Closed;
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out()
                        && matches!(*state, SlotState::Empty)
                    {
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }
}

/// The correlation table of one connection context: correlation id to response slot.
#[derive(Debug, Default)]
pub struct RemoteAccessBlockRegistration {
    pending: DashMap<Uuid, Arc<ResponseSlot<RemoteAccessResponse>>>,
    closed: AtomicBool,
}

impl RemoteAccessBlockRegistration {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `correlation_id` and returns the guard the caller blocks on. The id
    /// is removed when the guard drops.
    pub fn register(&self, correlation_id: Uuid) -> Result<PendingCall<'_>, RemoteError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RemoteError::ConnectionClosed);
        }
        let slot = Arc::new(ResponseSlot::new());
        self.pending.insert(correlation_id, slot.clone());
        metrics::PENDING_REMOTE_CALLS.inc();
        let call = PendingCall {
            registration: self,
            correlation_id,
            slot,
        };
        // `fail_all` may have run between the check and the insert.
        if self.closed.load(Ordering::Acquire) {
            return Err(RemoteError::ConnectionClosed);
        }
        Ok(call)
    }

    /// Stores a response for its waiting caller. Returns `false` for an unknown or
    /// already resolved correlation id.
    pub fn respond(&self, response: RemoteAccessResponse) -> bool {
        let id = response.correlation_id;
        let slot = self.pending.get(&id).map(|entry| entry.value().clone());
        match slot {
            Some(slot) => slot.fill(response),
            None => {
                warn!("Received a remote response for unknown correlation id {}", id);
                false
            }
        }
    }

    /// Releases every blocked caller with `ConnectionClosed` and refuses new calls.
    pub fn fail_all(&self) {
        self.closed.store(true, Ordering::Release);
        let mut failed = 0;
        for entry in self.pending.iter() {
            if entry.value().fail() {
                failed += 1;
            }
        }
        if failed > 0 {
            debug!("Released {} pending remote call(s) on close", failed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, correlation_id: &Uuid) -> bool {
        self.pending.contains_key(correlation_id)
    }
}

/// A registered, not yet consumed remote call.
pub struct PendingCall<'a> {
    registration: &'a RemoteAccessBlockRegistration,
    correlation_id: Uuid,
    slot: Arc<ResponseSlot<RemoteAccessResponse>>,
}

impl PendingCall<'_> {
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Blocks until the response for this call arrives.
    pub fn wait(self, timeout: Option<Duration>) -> Result<RemoteAccessResponse, RemoteError> {
        match self.slot.wait(timeout) {
            WaitOutcome::Ready(response) => Ok(response),
            WaitOutcome::Closed => Err(RemoteError::ConnectionClosed),
            WaitOutcome::TimedOut => {
                metrics::REMOTE_CALL_TIMEOUTS_TOTAL.inc();
                let waited = timeout.unwrap_or_default();
                warn!(
                    "Remote call {} timed out after {:?}",
                    self.correlation_id, waited
                );
                Err(RemoteError::Timeout(waited))
            }
        }
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.registration.pending.remove(&self.correlation_id).is_some() {
            metrics::PENDING_REMOTE_CALLS.dec();
        }
    }
}

// src/connection/hooks.rs

//! Close-time callbacks attached to a connection.

use super::Connection;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// A callback run once when its connection closes.
pub type ShutdownHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// An ordered set of shutdown hooks that fires at most once.
pub(crate) struct ShutdownHooks {
    hooks: Mutex<Option<Vec<ShutdownHook>>>,
}

impl ShutdownHooks {
    pub(crate) fn new() -> Self {
        Self {
            hooks: Mutex::new(Some(Vec::new())),
        }
    }

    /// Adds a hook unless the same hook is already present. Returns `false` if the
    /// hook was already registered or the hooks have already fired.
    pub(crate) fn add(&self, hook: ShutdownHook) -> bool {
        let mut guard = self.hooks.lock();
        let Some(hooks) = guard.as_mut() else {
            return false;
        };
        if hooks.iter().any(|h| Arc::ptr_eq(h, &hook)) {
            return false;
        }
        hooks.push(hook);
        true
    }

    pub(crate) fn remove(&self, hook: &ShutdownHook) -> bool {
        let mut guard = self.hooks.lock();
        let Some(hooks) = guard.as_mut() else {
            return false;
        };
        let before = hooks.len();
        hooks.retain(|h| !Arc::ptr_eq(h, hook));
        hooks.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.hooks.lock().as_ref().map_or(0, Vec::len)
    }

    /// Runs every hook in registration order. Later calls are no-ops.
    pub(crate) fn fire(&self, connection: &Connection) {
        // Take the list out before running so hooks may touch the connection freely.
        let Some(hooks) = self.hooks.lock().take() else {
            return;
        };
        debug!(
            "Running {} shutdown hook(s) for connection {}",
            hooks.len(),
            connection.id()
        );
        for hook in hooks {
            hook(connection);
        }
    }
}

// src/connection/client.rs

//! Defines `Client`, the logical peer behind one or more connections, and the
//! `ClientList` that tracks every connected client of a runtime.

use super::context::{ConnectionContext, ConnectionKey};
use super::session::Session;
use crate::core::NetError;
use crate::core::protocol::WireMessage;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies a client across all of its connections.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One logical peer: an id assigned at most once, a session shared by all of its
/// connections, and one context per connection key.
#[derive(Debug, Default)]
pub struct Client {
    id: OnceLock<ClientId>,
    session: Arc<Session>,
    contexts: DashMap<ConnectionKey, Arc<ConnectionContext>>,
}

impl Client {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_id(id: ClientId) -> Arc<Self> {
        let client = Self::default();
        let _ = client.id.set(id);
        Arc::new(client)
    }

    pub fn id(&self) -> Option<ClientId> {
        self.id.get().copied()
    }

    /// Sets the id. An id, once set, never changes; returns `false` if one was set already.
    pub fn set_id(&self, id: ClientId) -> bool {
        self.id.set(id).is_ok()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn context(&self, key: &ConnectionKey) -> Option<Arc<ConnectionContext>> {
        self.contexts.get(key).map(|c| c.value().clone())
    }

    pub fn default_context(&self) -> Option<Arc<ConnectionContext>> {
        self.context(&ConnectionKey::default())
    }

    pub fn contexts(&self) -> Vec<Arc<ConnectionContext>> {
        self.contexts.iter().map(|c| c.value().clone()).collect()
    }

    pub fn keys(&self) -> Vec<ConnectionKey> {
        self.contexts.iter().map(|c| c.key().clone()).collect()
    }

    /// Binds `context` under its key. A context previously bound under the same key
    /// is killed.
    pub fn bind(&self, context: Arc<ConnectionContext>) {
        let key = context.key().clone();
        if let Some(previous) = self.contexts.insert(key, context.clone()) {
            if !Arc::ptr_eq(&previous, &context) {
                previous.kill();
            }
        }
    }

    /// Removes the context bound under `key` if it is `context`.
    pub(crate) fn unbind_if(&self, key: &ConnectionKey, context: &ConnectionContext) -> bool {
        self.contexts
            .remove_if(key, |_, bound| std::ptr::eq(Arc::as_ptr(bound), context))
            .is_some()
    }

    /// Sends through the default connection.
    pub fn send<T: WireMessage>(&self, value: &T) -> Result<(), NetError> {
        match self.default_context() {
            Some(context) => context.send(value),
            None => Err(NetError::SendFailed(
                "client has no default connection".to_string(),
            )),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.default_context().is_some_and(|c| c.is_alive())
    }

    /// Kills every context of this client.
    pub fn disconnect(&self) {
        for context in self.contexts() {
            context.kill();
        }
    }
}

/// A callback run after a client has been removed from its `ClientList`.
pub type DisconnectHandler = Arc<dyn Fn(&Arc<Client>) + Send + Sync>;

/// Every identified client of a runtime, by id.
#[derive(Default)]
pub struct ClientList {
    clients: DashMap<ClientId, Arc<Client>>,
    disconnect_handlers: RwLock<Vec<DisconnectHandler>>,
}

impl ClientList {
    pub fn new() -> Self {
        Default::default()
    }

    /// Stores a client under its id. The client must already have an id.
    pub fn store(&self, client: Arc<Client>) -> Result<(), NetError> {
        let id = client.id().ok_or_else(|| {
            NetError::Internal("cannot store a client without an id".to_string())
        })?;
        self.clients.insert(id, client);
        Ok(())
    }

    pub fn get(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| c.value().clone())
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    pub fn remove(&self, id: &ClientId) -> Option<Arc<Client>> {
        self.clients.remove(id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.iter().map(|c| c.value().clone()).collect()
    }

    /// Sends `value` to every client. Returns how many sends succeeded.
    pub fn send_to_all<T: WireMessage>(&self, value: &T) -> usize {
        self.send_where(value, |_| true)
    }

    /// Sends `value` to every client whose session is identified.
    pub fn send_to_identified<T: WireMessage>(&self, value: &T) -> usize {
        self.send_where(value, |c| c.session().is_identified())
    }

    fn send_where<T, P>(&self, value: &T, filter: P) -> usize
    where
        T: WireMessage,
        P: Fn(&Client) -> bool,
    {
        let mut sent = 0;
        for client in self.snapshot() {
            if !filter(&client) {
                continue;
            }
            match client.send(value) {
                Ok(()) => sent += 1,
                Err(e) => debug!("Skipping client {:?}: {}", client.id(), e),
            }
        }
        sent
    }

    pub fn on_disconnect(&self, handler: DisconnectHandler) {
        self.disconnect_handlers.write().push(handler);
    }

    /// Disconnects `client`, removes it and runs the disconnect callbacks. Does
    /// nothing for a client that is not stored.
    pub fn client_disconnected(&self, client: &Arc<Client>) {
        client.disconnect();
        let Some(id) = client.id() else {
            return;
        };
        if self.clients.remove_if(&id, |_, c| Arc::ptr_eq(c, client)).is_none() {
            return;
        }
        debug!("Client {} disconnected", id);
        let handlers = self.disconnect_handlers.read().clone();
        for handler in handlers {
            handler(client);
        }
    }

    /// Disconnects every client.
    pub fn clear(&self) {
        for client in self.snapshot() {
            self.client_disconnected(&client);
        }
        if !self.clients.is_empty() {
            warn!("{} client(s) remained after clearing", self.clients.len());
            self.clients.clear();
        }
    }
}

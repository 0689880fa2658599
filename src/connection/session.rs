// src/connection/session.rs

//! Defines the state associated with a single client session.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// Holds the per-client state handed to every pipeline handler.
///
/// The dispatch core reads only the identified flag; the identifier and the property
/// bag belong to application code.
#[derive(Debug, Default)]
pub struct Session {
    /// True once the application has identified the peer.
    identified: AtomicBool,
    /// Free-form name chosen by the application.
    identifier: RwLock<String>,
    properties: DashMap<String, Value>,
}

impl Session {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_identified(&self) -> bool {
        self.identified.load(Ordering::Acquire)
    }

    pub fn set_identified(&self, identified: bool) {
        self.identified.store(identified, Ordering::Release);
    }

    pub fn identifier(&self) -> String {
        self.identifier.read().clone()
    }

    pub fn set_identifier(&self, identifier: impl Into<String>) {
        *self.identifier.write() = identifier.into();
    }

    /// Stores a property, returning the previous value under the same name.
    pub fn set_property(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.properties.insert(name.into(), value)
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).map(|v| v.value().clone())
    }

    pub fn remove_property(&self, name: &str) -> Option<Value> {
        self.properties.remove(name).map(|(_, v)| v)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }
}

// src/core/protocol/adapter.rs

//! Pluggable serialization and encryption adapters, and the `MessageCodec` that
//! ties them to the message type table.

use super::envelope::{AnyValue, Envelope, MessageTypes, TypeKey, WireMessage};
use crate::core::NetError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Turns an `Envelope` into its wire representation and back.
pub trait SerializationAdapter: Send + Sync {
    /// A short name used in diagnostics.
    fn name(&self) -> &str;
    fn serialize(&self, envelope: &Envelope) -> Result<Bytes, NetError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope, NetError>;
}

/// Applied to the serialized bytes before they are framed, and after they are unframed.
pub trait EncryptionAdapter: Send + Sync {
    fn encrypt(&self, bytes: Bytes) -> Result<Bytes, NetError>;
    fn decrypt(&self, bytes: Bytes) -> Result<Bytes, NetError>;
}

/// The default adapter: compact JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonAdapter;

impl SerializationAdapter for JsonAdapter {
    fn name(&self) -> &str {
        "json"
    }

    fn serialize(&self, envelope: &Envelope) -> Result<Bytes, NetError> {
        Ok(Bytes::from(serde_json::to_vec(envelope)?))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope, NetError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The default encryption adapter: passes bytes through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainText;

impl EncryptionAdapter for PlainText {
    fn encrypt(&self, bytes: Bytes) -> Result<Bytes, NetError> {
        Ok(bytes)
    }

    fn decrypt(&self, bytes: Bytes) -> Result<Bytes, NetError> {
        Ok(bytes)
    }
}

/// A primary serialization adapter plus ordered fallbacks, and one encryption adapter.
///
/// Both directions try the primary first and then each fallback in registration
/// order; the first success wins.
pub struct AdapterChain {
    primary: RwLock<Arc<dyn SerializationAdapter>>,
    fallbacks: RwLock<Vec<Arc<dyn SerializationAdapter>>>,
    encryption: RwLock<Arc<dyn EncryptionAdapter>>,
}

impl Default for AdapterChain {
    fn default() -> Self {
        Self {
            primary: RwLock::new(Arc::new(JsonAdapter)),
            fallbacks: RwLock::new(Vec::new()),
            encryption: RwLock::new(Arc::new(PlainText)),
        }
    }
}

impl AdapterChain {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_primary(&self, adapter: Arc<dyn SerializationAdapter>) {
        *self.primary.write() = adapter;
    }

    pub fn add_fallback(&self, adapter: Arc<dyn SerializationAdapter>) {
        self.fallbacks.write().push(adapter);
    }

    pub fn set_encryption(&self, adapter: Arc<dyn EncryptionAdapter>) {
        *self.encryption.write() = adapter;
    }

    fn adapters(&self) -> Vec<Arc<dyn SerializationAdapter>> {
        let mut adapters = vec![self.primary.read().clone()];
        adapters.extend(self.fallbacks.read().iter().cloned());
        adapters
    }

    /// Serializes and then encrypts an envelope.
    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes, NetError> {
        let mut last_error = None;
        for adapter in self.adapters() {
            match adapter.serialize(envelope) {
                Ok(bytes) => return self.encryption.read().encrypt(bytes),
                Err(e) => {
                    debug!("Adapter '{}' failed to serialize: {}", adapter.name(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| NetError::Codec("no serialization adapter".into())))
    }

    /// Decrypts and then deserializes one frame payload.
    pub fn decode(&self, bytes: Bytes) -> Result<Envelope, NetError> {
        let plain = self.encryption.read().decrypt(bytes)?;
        let mut last_error = None;
        for adapter in self.adapters() {
            match adapter.deserialize(&plain) {
                Ok(envelope) => return Ok(envelope),
                Err(e) => {
                    debug!("Adapter '{}' failed to deserialize: {}", adapter.name(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| NetError::Codec("no serialization adapter".into())))
    }
}

/// Converts typed messages into frame payloads and frame payloads into typed values.
#[derive(Clone)]
pub struct MessageCodec {
    adapters: Arc<AdapterChain>,
    types: Arc<MessageTypes>,
}

impl MessageCodec {
    pub fn new(adapters: Arc<AdapterChain>, types: Arc<MessageTypes>) -> Self {
        Self { adapters, types }
    }

    pub fn adapters(&self) -> &Arc<AdapterChain> {
        &self.adapters
    }

    pub fn types(&self) -> &Arc<MessageTypes> {
        &self.types
    }

    pub fn encode<T: WireMessage>(&self, value: &T) -> Result<Bytes, NetError> {
        self.adapters.encode(&Envelope::wrap(value)?)
    }

    pub fn decode(&self, payload: Bytes) -> Result<(TypeKey, AnyValue), NetError> {
        let envelope = self.adapters.decode(payload)?;
        self.types.decode(envelope)
    }
}

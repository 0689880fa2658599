// src/core/protocol/envelope.rs

//! Defines the wire representation of a typed message and the table that maps
//! wire names back to concrete Rust types.

use crate::core::NetError;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A received, deserialized object whose concrete type is only known at runtime.
pub type AnyValue = Box<dyn Any + Send + Sync>;

/// Any type that can travel over the wire.
///
/// The wire name is the Rust type path, so both peers must be built from the same
/// message definitions.
pub trait WireMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn wire_name() -> &'static str;
}

impl<T> WireMessage for T
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn wire_name() -> &'static str {
        std::any::type_name::<T>()
    }
}

/// The exact runtime type a pipeline is registered for.
///
/// Equality and hashing only consider the `TypeId`; the name is kept for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True if `value`'s concrete type is exactly this key's type.
    pub fn matches(&self, value: &(dyn Any + Send + Sync)) -> bool {
        value.type_id() == self.id
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The serialized form of one message: its wire name plus a self-describing payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub type_name: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn wrap<T: WireMessage>(value: &T) -> Result<Self, NetError> {
        Ok(Self {
            type_name: T::wire_name().to_string(),
            payload: serde_json::to_value(value)?,
        })
    }

    pub fn unwrap_as<T: WireMessage>(&self) -> Result<T, NetError> {
        if self.type_name != T::wire_name() {
            return Err(NetError::TypeMismatch {
                expected: T::wire_name().to_string(),
                actual: self.type_name.clone(),
            });
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

type DecodeFn = fn(serde_json::Value) -> Result<AnyValue, NetError>;

fn decode_as<T: WireMessage>(payload: serde_json::Value) -> Result<AnyValue, NetError> {
    let value: T = serde_json::from_value(payload)?;
    Ok(Box::new(value))
}

/// Maps wire names to typed decoders.
#[derive(Default)]
pub struct MessageTypes {
    by_name: DashMap<String, (TypeKey, DecodeFn)>,
}

impl MessageTypes {
    pub fn new() -> Self {
        Default::default()
    }

    /// Declares `T` so incoming envelopes carrying its wire name decode to `T`.
    pub fn declare<T: WireMessage>(&self) {
        self.by_name
            .entry(T::wire_name().to_string())
            .or_insert((TypeKey::of::<T>(), decode_as::<T>));
    }

    pub fn is_declared(&self, type_name: &str) -> bool {
        self.by_name.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Turns an envelope into a typed value. Undeclared wire names come back as the
    /// raw `Envelope`, keyed by `TypeKey::of::<Envelope>()`.
    pub fn decode(&self, envelope: Envelope) -> Result<(TypeKey, AnyValue), NetError> {
        let entry = self
            .by_name
            .get(&envelope.type_name)
            .map(|e| *e.value());
        match entry {
            Some((key, decode)) => Ok((key, decode(envelope.payload)?)),
            None => Ok((TypeKey::of::<Envelope>(), Box::new(envelope))),
        }
    }
}

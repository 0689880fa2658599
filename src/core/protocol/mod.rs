// src/core/protocol/mod.rs

pub mod adapter;
pub mod envelope;
pub mod frame;

pub use adapter::{
    AdapterChain, EncryptionAdapter, JsonAdapter, MessageCodec, PlainText, SerializationAdapter,
};
pub use envelope::{AnyValue, Envelope, MessageTypes, TypeKey, WireMessage};
pub use frame::{FrameCodec, FramingKind};

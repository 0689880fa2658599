// src/core/mod.rs

//! The dispatch core: wire encoding, type-routed handler pipelines, and remote
//! method invocation.

pub mod errors;
pub mod handler;
pub mod metrics;
pub mod protocol;
pub mod rmi;

pub use errors::NetError;
pub use handler::{CommunicationRegistration, ReceivePipeline};
pub use rmi::RemoteError;

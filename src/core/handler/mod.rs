// src/core/handler/mod.rs

//! Type-routed dispatch of received values to ordered, guarded handlers.

pub mod dispatcher;
pub mod pipeline;
pub mod registration;

pub use dispatcher::{CommunicationDispatcher, DispatchMode, WorkerPool};
pub use pipeline::{HandlerId, OnReceive, PipelineAccess, PipelineCondition, ReceivePipeline};
pub use registration::{AnyPipeline, CommunicationRegistration};

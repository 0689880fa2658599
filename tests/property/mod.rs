// tests/property/mod.rs

//! Property-based tests for commlink
//!
//! These tests use property-based testing to verify invariants that should hold
//! for any payloads and any way the transport splits the byte stream.

pub mod delivery_test;
pub mod framing_test;

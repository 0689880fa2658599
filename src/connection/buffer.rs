// src/connection/buffer.rs

//! Defines `ConnectionBuffer`, the per-connection raw byte accumulator.

use bytes::BytesMut;
use parking_lot::Mutex;

/// Accumulates raw bytes in arrival order.
///
/// `append` and `take` share one lock, so a `take` racing an `append` either sees
/// the whole chunk or leaves it for the next `take`; bytes are never lost or reordered.
#[derive(Debug, Default)]
pub struct ConnectionBuffer {
    inner: Mutex<BytesMut>,
}

impl ConnectionBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BytesMut::with_capacity(capacity)),
        }
    }

    /// Appends a chunk after everything appended so far.
    pub fn append(&self, chunk: &[u8]) {
        self.inner.lock().extend_from_slice(chunk);
    }

    /// Atomically returns the current content and leaves the buffer empty.
    pub fn take(&self) -> BytesMut {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

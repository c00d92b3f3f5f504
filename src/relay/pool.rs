//! Scratch buffer pools
//!
//! Diagnostic capture buffers and stream scan buffers are checked out per request
//! and returned, cleared, when the guard drops. A checked-out buffer is owned by
//! exactly one request.

use bytes::BytesMut;
use once_cell::sync::Lazy;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use tracing::debug;

/// Initial capacity of capture buffers
pub const CAPTURE_BUFFER_SIZE: usize = 64 * 1024;

/// Initial capacity of line scan buffers
pub const SCAN_BUFFER_SIZE: usize = 32 * 1024;

/// Global pool for diagnostic capture buffers
pub static CAPTURE_POOL: Lazy<BufferPool> = Lazy::new(|| BufferPool::new(CAPTURE_BUFFER_SIZE, 256));

/// Global pool for stream scan buffers
pub static SCAN_POOL: Lazy<BufferPool> = Lazy::new(|| BufferPool::new(SCAN_BUFFER_SIZE, 256));

/// A pool of reusable byte buffers
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    max_idle: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            buffer_size,
            max_idle,
        }
    }

    /// Check a buffer out of the pool
    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self
            .idle
            .lock()
            .ok()
            .and_then(|mut idle| idle.pop())
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size));
        PooledBuffer {
            buf,
            pool: self,
        }
    }

    /// Number of idle buffers waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or_default()
    }

    fn put(&self, mut buf: BytesMut) {
        buf.clear();
        // Buffers that grew far past their nominal size are not worth keeping.
        if buf.capacity() > self.buffer_size * 16 {
            debug!("Dropping oversized pooled buffer ({} bytes)", buf.capacity());
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(buf);
            }
        }
    }
}

/// Exclusive checkout of a pooled buffer; returned to the pool on drop
#[derive(Debug)]
pub struct PooledBuffer<'p> {
    buf: BytesMut,
    pool: &'p BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

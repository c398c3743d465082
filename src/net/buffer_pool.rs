//! Reusable fixed-size copy buffers.
//!
//! # Responsibilities
//! - Bound per-connection allocation for the forwarding copy loops
//! - Hand out buffers behind a guard that returns them on drop
//!
//! # Design Decisions
//! - One pool per process, shared via `Arc` by every forwarder
//! - Buffers are never retained across connections by callers
//! - Retention is capped so an idle pool does not pin a burst's worth of memory

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Default size of a single copy buffer (32 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 15;

/// Default number of idle buffers kept for reuse.
pub const DEFAULT_MAX_RETAINED: usize = 1024;

/// A pool of fixed-size byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
    buffer_size: usize,
    max_retained: usize,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize, max_retained: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            buffer_size: buffer_size.max(1),
            max_retained,
        })
    }

    /// Take a buffer from the pool, allocating if none is free.
    ///
    /// The buffer goes back to the pool when the guard is dropped, on every
    /// exit path of the caller.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        let buf = reused.unwrap_or_else(|| vec![0u8; self.buffer_size].into_boxed_slice());

        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    /// Size in bytes of each buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of idle buffers currently held.
    pub fn idle_count(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn release(&self, buf: Box<[u8]>) {
        let mut free = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < self.max_retained {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_retained: DEFAULT_MAX_RETAINED,
        }
    }
}

/// A buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Box<[u8]>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

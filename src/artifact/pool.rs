//! Reusable transfer buffers.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Pool of equally sized byte buffers
///
/// Buffers return to the pool when their [`PooledBuffer`] guard is dropped.
/// At most `max_idle` buffers are retained.
#[derive(Clone, Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buffer_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` bytes
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffer_size: buffer_size.max(1),
                max_idle,
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Size of every buffer in this pool
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Borrow a buffer, allocating a new one when none is idle
    pub fn get(&self) -> PooledBuffer {
        let reused = self
            .inner
            .idle
            .lock()
            .ok()
            .and_then(|mut idle| idle.pop());
        let buf = reused.unwrap_or_else(|| vec![0u8; self.inner.buffer_size]);
        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of buffers currently waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

/// A buffer on loan from a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
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
        let Some(buf) = self.buf.take() else { return };
        if buf.len() != self.pool.buffer_size {
            return;
        }
        if let Ok(mut idle) = self.pool.idle.lock()
            && idle.len() < self.pool.max_idle
        {
            idle.push(buf);
        }
    }
}

//! Reusable pixel buffer pool
//!
//! Pre-allocates the compositor's output buffers so the per-frame path
//! never heap-allocates. Borrowed buffers return to the pool when the last
//! handle drops; once the pool is exhausted, `acquire` reports failure and
//! the caller skips the frame.

use parking_lot::Mutex;
use std::sync::Arc;

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_len: usize,
}

/// A fixed-capacity pool of equally sized byte buffers.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    /// Pre-allocate `capacity` buffers of `buffer_len` bytes each.
    pub fn new(buffer_len: usize, capacity: usize) -> Self {
        let free = (0..capacity).map(|_| vec![0u8; buffer_len]).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                buffer_len,
            }),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.inner.buffer_len
    }

    /// Borrow a buffer, or `None` when the pool is exhausted.
    pub fn acquire(&self) -> Option<PooledBuffer> {
        let data = self.inner.free.lock().pop()?;
        Some(PooledBuffer {
            data: Some(data),
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Number of buffers currently available.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// A buffer borrowed from a [`FramePool`]; returns on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    pool: std::sync::Weak<PoolInner>,
}

impl PooledBuffer {
    pub fn bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let (Some(data), Some(pool)) = (self.data.take(), self.pool.upgrade()) {
            // A buffer that was resized by the borrower is discarded instead
            // of poisoning the pool.
            if data.len() == pool.buffer_len {
                pool.free.lock().push(data);
            }
        }
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("buffer_len", &self.inner.buffer_len)
            .field("available", &self.available())
            .finish()
    }
}

// Buffer pool for the relay copy loops

use bytes::BytesMut;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

/// A thread-safe, bounded pool of fixed-size relay buffers. Clones share
/// the same pool
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<BufferPoolInner>>,
}

struct BufferPoolInner {
    /// Idle buffers, all cleared
    buffers: Vec<BytesMut>,
    buffer_size: usize,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferPoolInner {
                buffers: Vec::with_capacity(max_pooled),
                buffer_size,
                max_pooled,
            })),
        }
    }

    /// checkout takes an idle buffer, or allocates one when none is idle.
    /// The buffer is zero-filled to its full size and goes back to the pool
    /// when dropped
    pub fn checkout(&self) -> PooledBuffer {
        let (mut buf, size) = {
            let mut inner = self.lock();
            let size = inner.buffer_size;
            let buf = inner
                .buffers
                .pop()
                .unwrap_or_else(|| BytesMut::with_capacity(size));
            (buf, size)
        };
        buf.resize(size, 0);

        PooledBuffer {
            buf: Some(buf),
            pool: self.clone(),
        }
    }

    fn checkin(&self, mut buf: BytesMut) {
        // Drop contents before the buffer becomes visible to another session
        buf.clear();

        let mut inner = self.lock();
        if inner.buffers.len() >= inner.max_pooled || buf.capacity() < inner.buffer_size {
            return;
        }
        inner.buffers.push(buf);
    }

    /// idle returns the number of buffers currently waiting in the pool
    pub fn idle(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.lock().buffer_size
    }

    // A panic while holding the lock cannot leave the Vec half-updated
    fn lock(&self) -> MutexGuard<'_, BufferPoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// PooledBuffer is a checked-out buffer. It derefs to the full byte slice
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.checkin(buf);
        }
    }
}

//! Reusable request-body buffers for the webhook ingress.
//!
//! Request bodies are accumulated into buffers drawn from a fixed-size pool
//! so steady-state ingress does not allocate per request. When the pool runs
//! dry a plain heap buffer is handed out instead and simply freed on drop.
//! Pooled buffers keep their grown capacity across reuses; growth doubles up
//! to the body ceiling.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

/// Hard ceiling on an accumulated request body (512 KiB).
pub const BODY_MAX: usize = 512 * 1024;

/// Pool size bounds.
const POOL_MIN: usize = 1;
const POOL_MAX: usize = 64;

/// Initial capacity given to a buffer on its first growth.
const INITIAL_CAPACITY: usize = 4096;

/// Returned by [`BodyBuffer::extend`] when the ceiling would be exceeded.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("request body exceeds {BODY_MAX} bytes")]
pub struct BodyTooLarge;

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
}

/// Fixed-size pool of body buffers with heap fallback.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool of `size` buffers, clamped to [1, 64].
    pub fn new(size: usize) -> BufferPool {
        let size = size.clamp(POOL_MIN, POOL_MAX);
        BufferPool {
            inner: Arc::new(PoolInner {
                free: Mutex::new((0..size).map(|_| Vec::new()).collect()),
            }),
        }
    }

    /// Takes a buffer from the pool, or falls back to a heap buffer when
    /// every pooled one is in use. Constant-time under the pool mutex.
    pub fn acquire(&self) -> BodyBuffer {
        let pooled = self
            .inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match pooled {
            Some(data) => BodyBuffer {
                data,
                pool: Some(Arc::clone(&self.inner)),
            },
            None => BodyBuffer {
                data: Vec::new(),
                pool: None,
            },
        }
    }

    /// Number of buffers currently sitting in the free list.
    pub fn idle(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// An accumulation buffer checked out of a [`BufferPool`].
///
/// Dropping the buffer returns it to the pool (keeping its capacity) when it
/// came from there, or frees it when it was a heap fallback.
pub struct BodyBuffer {
    data: Vec<u8>,
    pool: Option<Arc<PoolInner>>,
}

impl BodyBuffer {
    /// Appends `chunk`, growing by doubling. Fails without storing anything
    /// once the total would pass [`BODY_MAX`]; the caller keeps draining the
    /// request and answers 413.
    pub fn extend(&mut self, chunk: &[u8]) -> Result<(), BodyTooLarge> {
        let need = self.data.len() + chunk.len();
        if need > BODY_MAX {
            return Err(BodyTooLarge);
        }
        if need > self.data.capacity() {
            let mut target = self.data.capacity().max(INITIAL_CAPACITY);
            while target < need {
                target *= 2;
            }
            self.data.reserve_exact(target.min(BODY_MAX) - self.data.len());
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for BodyBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let mut data = std::mem::take(&mut self.data);
            data.clear();
            pool.free
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(data);
        }
    }
}

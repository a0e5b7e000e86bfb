use std::{
    ops::{Deref, DerefMut},
    sync::{Mutex, OnceLock, PoisonError},
};

use crate::defaults::{BUFFER_SIZE, MAX_POOLED_BUFFERS};

type Buffer = Box<[u8; BUFFER_SIZE]>;

/// A bounded pool of fixed-size read buffers shared by every main loop of the process.
///
/// Pooling only saves allocations, a buffer handed out is always exclusively owned by its
/// [`PooledBuffer`] guard.
pub struct BufferPool {
    buffers: Mutex<Vec<Buffer>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// The process-wide pool.
    pub fn global() -> &'static BufferPool {
        static POOL: OnceLock<BufferPool> = OnceLock::new();
        POOL.get_or_init(|| BufferPool::new(MAX_POOLED_BUFFERS))
    }

    /// Take a buffer from the pool, allocating a fresh one if the pool is empty.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buffer = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| Box::new([0; BUFFER_SIZE]));

        PooledBuffer {
            buffer: Some(buffer),
            pool: self,
        }
    }

    fn release(&self, buffer: Buffer) {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.capacity {
            buffers.push(buffer);
        }
    }

    /// The number of buffers currently waiting in the pool.
    pub fn available(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A buffer borrowed from a [`BufferPool`], returned to it when dropped.
pub struct PooledBuffer<'a> {
    buffer: Option<Buffer>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => &buffer[..],
            None => &[],
        }
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.buffer {
            Some(buffer) => &mut buffer[..],
            None => &mut [],
        }
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BufferPool;
    use crate::defaults::BUFFER_SIZE;

    #[test]
    fn reuses_released_buffers() {
        let pool = BufferPool::new(4);
        assert_eq!(pool.available(), 0);

        {
            let mut buf = pool.acquire();
            assert_eq!(buf.len(), BUFFER_SIZE);
            buf[0] = 7;
        }
        assert_eq!(pool.available(), 1);

        let buf = pool.acquire();
        assert_eq!(pool.available(), 0);
        // the same allocation came back
        assert_eq!(buf[0], 7);
    }

    #[test]
    fn never_keeps_more_than_capacity() {
        let pool = BufferPool::new(2);
        let held: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.available(), 0);

        drop(held);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn global_pool_is_shared() {
        let a = BufferPool::global() as *const BufferPool;
        let b = BufferPool::global() as *const BufferPool;
        assert_eq!(a, b);
    }
}

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// Relay loops churn through one buffer per read; keeping a bounded
/// free-list caps that allocation pressure without a global allocator
/// dependency. Contents are not zeroed between uses.
pub struct BufferPool {
    buffer_size: usize,
    free: spin::Mutex<Vec<Vec<u8>>>,
}

// Returned buffers beyond this many are dropped instead of pooled.
const MAX_POOLED: usize = 256;

impl BufferPool {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            free: spin::Mutex::new(Vec::new()),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Leases a buffer of `buffer_size` bytes. Never fails: allocates when
    /// the free-list is empty. The lease returns itself on drop.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);

        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buf: Vec<u8>) {
        let mut free = self.free.lock();
        if free.len() < MAX_POOLED {
            free.push(buf);
        }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}

/// A buffer leased from a [`BufferPool`], handed back on drop.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn acquire_allocates_then_reuses() {
        let pool = Arc::new(BufferPool::new(4096));

        let a = pool.acquire();
        assert_eq!(a.len(), 4096);
        assert_eq!(pool.pooled(), 0);

        drop(a);
        assert_eq!(pool.pooled(), 1);

        let _b = pool.acquire();
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn leases_are_independent() {
        let pool = Arc::new(BufferPool::new(16));

        let mut a = pool.acquire();
        let mut b = pool.acquire();
        a[0] = 1;
        b[0] = 2;
        assert_eq!(a[0], 1);
        assert_eq!(b[0], 2);
    }

    #[test]
    fn concurrent_lease_and_return() {
        let pool = Arc::new(BufferPool::new(1024));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let mut buf = pool.acquire();
                        buf[0] = buf[0].wrapping_add(1);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(pool.pooled() <= 8);
    }
}

//! Tiered buffer pool.
//!
//! Buffers are recycled in five size classes. A request is served from the
//! smallest class that fits; anything above the largest class is allocated
//! fresh and never pooled. Every buffer goes back to the shelf it was issued
//! from, and one that grew past twice that class's capacity is dropped
//! instead of cached so the pool cannot accumulate oversized memory.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

/// Pooled buffer capacities, smallest to largest.
pub const SIZE_CLASSES: [usize; 5] = [128, 1024, 4096, 16 * 1024, 64 * 1024];

const DEFAULT_MAX_PER_CLASS: usize = 32;

struct PoolInner {
    shelves: [Mutex<Vec<BytesMut>>; SIZE_CLASSES.len()],
    max_per_class: usize,
}

/// Shared, thread-safe buffer pool. Cloning is cheap and all clones feed
/// the same shelves.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    /// Create a pool retaining up to 32 buffers per size class.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_per_class(DEFAULT_MAX_PER_CLASS)
    }

    /// Create a pool with an explicit per-class retention cap.
    #[must_use]
    pub fn with_max_per_class(max_per_class: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                shelves: std::array::from_fn(|_| Mutex::new(Vec::new())),
                max_per_class,
            }),
        }
    }

    /// Smallest class index that fits `size`, or None for overflow sizes.
    fn class_for(size: usize) -> Option<usize> {
        SIZE_CLASSES.iter().position(|&class| size <= class)
    }

    /// Get a buffer with at least `size` bytes of capacity.
    ///
    /// The returned handle gives the buffer back to the pool on drop.
    /// Requests above the largest class get a fresh unpooled allocation.
    #[must_use]
    pub fn get(&self, size: usize) -> PooledBuf {
        match Self::class_for(size) {
            Some(idx) => {
                let recycled = match self.inner.shelves[idx].lock() {
                    Ok(mut shelf) => shelf.pop(),
                    Err(_) => None,
                };
                let buf = recycled.unwrap_or_else(|| BytesMut::with_capacity(SIZE_CLASSES[idx]));
                PooledBuf {
                    buf: Some(buf),
                    pool: Some(self.clone()),
                    class: idx,
                }
            }
            None => PooledBuf {
                buf: Some(BytesMut::with_capacity(size)),
                pool: None,
                class: 0,
            },
        }
    }

    /// Return a buffer to the shelf it was issued from, or drop it if its
    /// capacity no longer fits that class.
    fn put(&self, class: usize, mut buf: BytesMut) {
        buf.clear();
        let capacity = buf.capacity();
        if capacity < SIZE_CLASSES[class] || capacity > SIZE_CLASSES[class] * 2 {
            return;
        }
        if let Ok(mut shelf) = self.inner.shelves[class].lock() {
            if shelf.len() < self.inner.max_per_class {
                shelf.push(buf);
            }
        }
    }

    /// Try to take back a frozen buffer once every other `Bytes` clone is
    /// gone. A no-op while clones remain.
    ///
    /// The issuing class is no longer known here, so only buffers whose
    /// capacity still sits exactly on a class boundary are re-shelved; a
    /// grown one is dropped.
    pub fn reclaim(&self, bytes: Bytes) {
        if let Ok(buf) = bytes.try_into_mut() {
            if let Some(idx) = SIZE_CLASSES.iter().position(|&class| class == buf.capacity()) {
                self.put(idx, buf);
            }
        }
    }

    /// Buffers currently cached across all classes.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.inner
            .shelves
            .iter()
            .map(|shelf| shelf.lock().map(|s| s.len()).unwrap_or(0))
            .sum()
    }
}

/// Move-only handle to a pooled buffer.
///
/// Dropping the handle returns the buffer; `detach` and `freeze` take it
/// out of the pool's custody. There is no way to return a buffer twice or
/// touch one after returning it.
pub struct PooledBuf {
    buf: Option<BytesMut>,
    pool: Option<BufferPool>,
    /// Class index this buffer was issued from; unused when unpooled.
    class: usize,
}

impl PooledBuf {
    /// Capacity of the underlying buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.as_ref().capacity()
    }

    /// Take the buffer out, detaching it from the pool permanently.
    #[must_use]
    pub fn detach(mut self) -> BytesMut {
        match self.buf.take() {
            Some(buf) => buf,
            None => unreachable!(),
        }
    }

    /// Freeze into shared `Bytes`. Pass the result to
    /// [`BufferPool::reclaim`] after the last clone drops to re-pool it.
    #[must_use]
    pub fn freeze(self) -> Bytes {
        self.detach().freeze()
    }

    fn as_ref(&self) -> &BytesMut {
        match &self.buf {
            Some(buf) => buf,
            None => unreachable!(),
        }
    }

    fn as_mut(&mut self) -> &mut BytesMut {
        match &mut self.buf {
            Some(buf) => buf,
            None => unreachable!(),
        }
    }
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.as_ref()
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.as_mut()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let (Some(buf), Some(pool)) = (self.buf.take(), self.pool.take()) {
            pool.put(self.class, buf);
        }
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.as_ref().len())
            .field("capacity", &self.capacity())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smallest_fitting_class() {
        let pool = BufferPool::new();
        assert_eq!(pool.get(1).capacity(), 128);
        assert_eq!(pool.get(128).capacity(), 128);
        assert_eq!(pool.get(129).capacity(), 1024);
        assert_eq!(pool.get(4096).capacity(), 4096);
        assert_eq!(pool.get(5000).capacity(), 16 * 1024);
        assert_eq!(pool.get(64 * 1024).capacity(), 64 * 1024);
    }

    #[test]
    fn test_overflow_sizes_not_pooled() {
        let pool = BufferPool::new();
        let big = pool.get(100_000);
        assert!(big.capacity() >= 100_000);
        drop(big);
        assert_eq!(pool.cached(), 0);
    }

    #[test]
    fn test_drop_returns_buffer() {
        let pool = BufferPool::new();
        let buf = pool.get(1024);
        assert_eq!(pool.cached(), 0);
        drop(buf);
        assert_eq!(pool.cached(), 1);

        // The next request of the same class reuses it.
        let _buf = pool.get(1024);
        assert_eq!(pool.cached(), 0);
    }

    #[test]
    fn test_detach_removes_from_pool() {
        let pool = BufferPool::new();
        let buf = pool.get(1024);
        let inner = buf.detach();
        drop(inner);
        assert_eq!(pool.cached(), 0);
    }

    #[test]
    fn test_written_buffer_comes_back_empty() {
        let pool = BufferPool::new();
        let mut buf = pool.get(128);
        buf.extend_from_slice(b"leftover");
        drop(buf);
        let buf = pool.get(128);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_grown_buffer_discarded() {
        let pool = BufferPool::new();
        let mut buf = pool.get(128);
        // Grow well past twice the class capacity.
        buf.extend_from_slice(&vec![0u8; 4096]);
        drop(buf);
        assert_eq!(pool.cached(), 0);
    }

    #[test]
    fn test_grown_buffer_never_moves_to_larger_shelf() {
        // A 128-class buffer grown to roughly 4 KiB must not end up on the
        // 4 KiB shelf; the next 4 KiB request gets a fresh exact-capacity
        // allocation.
        let pool = BufferPool::new();
        let mut buf = pool.get(128);
        buf.extend_from_slice(&vec![0u8; 4096]);
        drop(buf);
        assert_eq!(pool.cached(), 0);
        assert_eq!(pool.get(4096).capacity(), 4096);
    }

    #[test]
    fn test_reclaim_off_class_capacity_discarded() {
        let pool = BufferPool::new();
        let bytes = Bytes::from(vec![0u8; 200]);
        pool.reclaim(bytes);
        assert_eq!(pool.cached(), 0);
    }

    #[test]
    fn test_retention_cap() {
        let pool = BufferPool::with_max_per_class(2);
        let bufs: Vec<_> = (0..5).map(|_| pool.get(1024)).collect();
        drop(bufs);
        assert_eq!(pool.cached(), 2);
    }

    #[test]
    fn test_reclaim_frozen_buffer() {
        let pool = BufferPool::new();
        let mut buf = pool.get(4096);
        buf.extend_from_slice(b"broadcast frame");
        let bytes = buf.freeze();
        let clone = bytes.clone();

        // A live clone blocks reclamation.
        pool.reclaim(bytes);
        assert_eq!(pool.cached(), 0);

        pool.reclaim(clone);
        assert_eq!(pool.cached(), 1);
    }

    #[test]
    fn test_many_cycles_stay_bounded() {
        let pool = BufferPool::new();
        for i in 0..10_000 {
            let size = SIZE_CLASSES[i % SIZE_CLASSES.len()];
            let mut buf = pool.get(size);
            buf.extend_from_slice(&[0xA5; 64]);
            drop(buf);
        }
        assert!(pool.cached() <= DEFAULT_MAX_PER_CLASS * SIZE_CLASSES.len());
        // Every class still serves correctly sized buffers.
        for &size in &SIZE_CLASSES {
            assert_eq!(pool.get(size).capacity(), size);
        }
    }

    #[test]
    fn test_clones_share_shelves() {
        let pool = BufferPool::new();
        let clone = pool.clone();
        drop(clone.get(1024));
        assert_eq!(pool.cached(), 1);
    }
}

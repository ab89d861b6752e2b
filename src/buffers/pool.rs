//! Fixed buffer pool with a never-blocking overflow path

use super::buffer::BufferInner;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A pool of preallocated buffers plus one designated overflow buffer.
///
/// `acquire` never blocks and never fails: when every pooled buffer is
/// outstanding it returns a handle to the overflow buffer instead. Overflow
/// handles are flagged so downstream stages can refuse work that would
/// observe overwritten shared state; losing the occasional frame under
/// saturation is the accepted degradation mode.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    slots: Vec<Arc<RwLock<BufferInner>>>,
    overflow: Arc<RwLock<BufferInner>>,
    free: Mutex<Vec<usize>>,
    acquired: AtomicU64,
    released: AtomicU64,
    overflow_acquires: AtomicU64,
}

/// Counter snapshot for logging and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub overflow_acquires: u64,
    pub available: usize,
}

impl BufferPool {
    /// Create a pool of `count` resizable buffers of `capacity` bytes each
    pub fn new(count: usize, capacity: usize) -> Self {
        Self::build(count, capacity, true)
    }

    /// Create a pool of fixed-length buffers (`len == capacity` always)
    pub fn fixed(count: usize, capacity: usize) -> Self {
        Self::build(count, capacity, false)
    }

    fn build(count: usize, capacity: usize, resizable: bool) -> Self {
        let slots = (0..count)
            .map(|_| Arc::new(RwLock::new(BufferInner::new(capacity, resizable))))
            .collect();
        Self {
            shared: Arc::new(PoolShared {
                slots,
                overflow: Arc::new(RwLock::new(BufferInner::new(capacity, resizable))),
                free: Mutex::new((0..count).rev().collect()),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                overflow_acquires: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire a buffer, falling back to the overflow buffer when the pool
    /// is exhausted. Never blocks, never fails.
    pub fn acquire(&self) -> BufferHandle {
        let slot = self.shared.free.lock().pop();
        match slot {
            Some(index) => {
                self.shared.acquired.fetch_add(1, Ordering::Relaxed);
                let buf = Arc::clone(&self.shared.slots[index]);
                buf.write().reset();
                BufferHandle {
                    shared: Arc::new(HandleShared {
                        buf,
                        slot: Some(index),
                        pool: Arc::clone(&self.shared),
                    }),
                }
            }
            None => {
                let n = self.shared.overflow_acquires.fetch_add(1, Ordering::Relaxed) + 1;
                if n % 100 == 1 {
                    log::warn!("buffer pool exhausted, handing out overflow buffer ({n} total)");
                } else {
                    log::trace!("buffer pool exhausted, handing out overflow buffer");
                }
                let buf = Arc::clone(&self.shared.overflow);
                buf.write().reset();
                BufferHandle {
                    shared: Arc::new(HandleShared {
                        buf,
                        slot: None,
                        pool: Arc::clone(&self.shared),
                    }),
                }
            }
        }
    }

    /// Number of buffers currently on the free list
    pub fn available(&self) -> usize {
        self.shared.free.lock().len()
    }

    /// Number of pooled (non-overflow) buffers
    pub fn size(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.shared.acquired.load(Ordering::Relaxed),
            released: self.shared.released.load(Ordering::Relaxed),
            overflow_acquires: self.shared.overflow_acquires.load(Ordering::Relaxed),
            available: self.available(),
        }
    }
}

/// Shared, reference-counted ownership of one pooled buffer.
///
/// Clones share the same underlying buffer; when the last clone drops, a
/// non-overflow buffer goes back on the free list. Dropping an overflow
/// handle is a no-op since the overflow buffer is always available.
#[derive(Clone)]
pub struct BufferHandle {
    shared: Arc<HandleShared>,
}

struct HandleShared {
    buf: Arc<RwLock<BufferInner>>,
    slot: Option<usize>,
    pool: Arc<PoolShared>,
}

impl BufferHandle {
    /// True when this handle refers to the overflow buffer
    pub fn is_overflow(&self) -> bool {
        self.shared.slot.is_none()
    }

    /// Lock the buffer contents for reading. Multiple read guards may be
    /// held at once, so fanning the same buffer out to several writers
    /// never serializes their socket writes on each other.
    pub fn read(&self) -> RwLockReadGuard<'_, BufferInner> {
        self.shared.buf.read()
    }

    /// Lock the buffer contents for writing
    pub fn write(&self) -> RwLockWriteGuard<'_, BufferInner> {
        self.shared.buf.write()
    }

    pub fn capacity(&self) -> usize {
        self.shared.buf.read().capacity()
    }
}

impl Drop for HandleShared {
    fn drop(&mut self) {
        if let Some(index) = self.slot {
            self.pool.free.lock().push(index);
            self.pool.released.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("slot", &self.shared.slot)
            .finish()
    }
}

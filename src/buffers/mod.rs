//! Pooled media buffers
//!
//! A fixed set of preallocated buffers plus a single always-available
//! overflow buffer. Producers must never block waiting for memory, so an
//! exhausted pool hands out the overflow buffer instead and accepts that
//! its contents may be overwritten under sustained load.

mod buffer;
mod pool;

pub use buffer::BufferInner;
pub use pool::{BufferHandle, BufferPool, PoolStats};

//! Lock-free buffer pools built above the tracked substrate.
//!
//! - [`Buffer`]: storage wrapper for exactly one `T`, heap-aligned or inline.
//! - [`RingPool`]: fixed-capacity, waste-one-slot SPSC ring of buffers.
//! - [`PoolChain`]: growable chain of ring pools, appended on demand when a
//!   pop drains every existing pool.
//!
//! The pools are single-producer / single-consumer: exactly one thread may
//! push and exactly one thread may pop at a time. Concurrent producers or
//! concurrent consumers are out of contract. Buffer heap storage goes through
//! the global allocator, so it is tracked whenever the
//! [`TrackedAllocator`](crate::TrackedAllocator) adapter is installed.

mod buffer;
mod chain;
mod ring;

pub use buffer::Buffer;
pub use chain::PoolChain;
pub use ring::RingPool;

use crate::constants::memory::CACHE_LINE_SIZE;

/// Gives a value a full cache line to prevent false sharing between the
/// producer-owned and consumer-owned indices.
#[repr(align(64))]
pub(crate) struct CacheAligned<T>(pub(crate) T);

// The alignment literal above must stay in lockstep with the constant.
const _: () = assert!(std::mem::align_of::<CacheAligned<u8>>() == CACHE_LINE_SIZE);

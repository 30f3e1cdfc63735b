//! Waste-one-slot SPSC ring pool.
//!
//! A fixed-capacity circular queue of boxed [`Buffer`]s for real-time-safe
//! hand-off between one producer thread and one consumer thread. One
//! physical slot is always kept empty so full and empty are distinguishable
//! without a shared flag: usable capacity is `capacity - 1`.
//!
//! Capacity is the requested size rounded up to the next power of two, so
//! index wrapping is a bit-and with `capacity - 1`. The write index is owned
//! by the producer, the read index by the consumer; each lives on its own
//! cache line. The hand-off points use release stores paired with acquire
//! loads: a buffer stored into a slot happens-before the consumer's read of
//! that slot.
//!
//! Two ownership modes:
//!
//! - **Full**: the pool pre-constructs `capacity - 1` buffers and destroys
//!   whatever is still queued at teardown.
//! - **Empty**: the pool starts empty and never destroys the buffers the
//!   caller pushes in; anything still queued at teardown is leaked (and
//!   logged), because it belongs to the caller.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{error, warn};

use super::{Buffer, CacheAligned};
use crate::constants::pool::MIN_QUEUE_SIZE;
use crate::error::MemError;

/// Lock-free single-producer / single-consumer ring of boxed buffers.
///
/// `push` must only ever be called by the producer thread and `pop` only by
/// the consumer thread; concurrent producers or consumers are out of
/// contract.
///
/// # Example
///
/// ```
/// use memwarden::{Buffer, RingPool};
///
/// let pool = RingPool::with_buffers(4, || Buffer::heap(0u32));
/// assert!(pool.is_valid());
/// assert_eq!(pool.usable_capacity(), 3);
///
/// let mut buffer = pool.pop().expect("pre-constructed buffer");
/// *buffer.get_mut() = 7;
/// pool.push(buffer).expect("ring has room");
/// ```
pub struct RingPool<T> {
    /// Producer-owned position; isolated on its own cache line.
    write_index: CacheAligned<AtomicUsize>,
    /// Consumer-owned position; isolated on its own cache line.
    read_index: CacheAligned<AtomicUsize>,
    /// Slot storage; null means empty.
    slots: Box<[UnsafeCell<*mut Buffer<T>>]>,
    /// Physical capacity; always a power of two, at least 2.
    capacity: usize,
    /// `capacity - 1`, used for index wrapping.
    mask: usize,
    /// False when full-mode initialization failed; such a pool rejects all
    /// traffic.
    valid: bool,
    /// Whether teardown destroys queued buffers (full mode).
    owns_buffers: bool,
}

// SAFETY: slot contents are owned boxes handed between exactly one producer
// and one consumer; the release/acquire index pair orders every slot access.
unsafe impl<T: Send> Send for RingPool<T> {}
// SAFETY: see Send; shared access is what the SPSC protocol is for.
unsafe impl<T: Send> Sync for RingPool<T> {}

impl<T> RingPool<T> {
    fn with_capacity(queue_size: usize, owns_buffers: bool) -> Self {
        let capacity = queue_size.next_power_of_two().max(MIN_QUEUE_SIZE);
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            write_index: CacheAligned(AtomicUsize::new(0)),
            read_index: CacheAligned(AtomicUsize::new(0)),
            slots,
            capacity,
            mask: capacity - 1,
            valid: true,
            owns_buffers,
        }
    }

    /// Empty-mode pool: starts with no buffers, never owns what is pushed.
    pub fn empty(queue_size: usize) -> Self {
        Self::with_capacity(queue_size, false)
    }

    /// Full-mode pool: pre-constructs `capacity - 1` buffers via `factory`
    /// and owns them.
    pub fn with_buffers(queue_size: usize, mut factory: impl FnMut() -> Buffer<T>) -> Self {
        Self::try_with_buffers(queue_size, || Ok(factory()))
    }

    /// Fallible full-mode construction. A factory failure destroys the
    /// buffers constructed so far and leaves the pool invalid; callers must
    /// consult [`is_valid`](Self::is_valid) before use.
    pub fn try_with_buffers(
        queue_size: usize,
        mut factory: impl FnMut() -> Result<Buffer<T>, MemError>,
    ) -> Self {
        let mut pool = Self::with_capacity(queue_size, true);
        let wanted = pool.capacity - 1;
        for i in 0..wanted {
            match factory() {
                Ok(buffer) => {
                    // SAFETY: construction is single-threaded; slot i is null.
                    unsafe { *pool.slots[i].get() = Box::into_raw(Box::new(buffer)) };
                }
                Err(err) => {
                    error!(
                        constructed = i,
                        wanted,
                        %err,
                        "ring pool initialization failed; pool is invalid"
                    );
                    pool.release_owned_slots();
                    pool.valid = false;
                    return pool;
                }
            }
        }
        pool.write_index.0.store(wanted, Ordering::Relaxed);
        pool
    }

    /// Whether the pool initialized successfully and accepts traffic.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Physical capacity (usable capacity is one less).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffers the pool can hold simultaneously.
    pub fn usable_capacity(&self) -> usize {
        self.capacity - 1
    }

    /// Buffers currently queued. Observational only: acquire-loads both
    /// indices but the answer may be stale by the time it returns.
    pub fn current_size(&self) -> usize {
        let write = self.write_index.0.load(Ordering::Acquire);
        let read = self.read_index.0.load(Ordering::Acquire);
        write.wrapping_sub(read) & self.mask
    }

    /// Producer-only: queues a buffer.
    ///
    /// Returns the buffer back when the ring is full (or the pool is
    /// invalid) so the caller keeps ownership.
    pub fn push(&self, buffer: Box<Buffer<T>>) -> Result<(), Box<Buffer<T>>> {
        if !self.valid {
            return Err(buffer);
        }
        let write = self.write_index.0.load(Ordering::Relaxed);
        let read = self.read_index.0.load(Ordering::Acquire);
        let available = write.wrapping_sub(read) & self.mask;
        let free = self.capacity - available - 1;
        if free == 0 {
            return Err(buffer);
        }
        // SAFETY: the producer is the only writer of `slots[write]` until the
        // release store below publishes the slot to the consumer.
        unsafe { *self.slots[write].get() = Box::into_raw(buffer) };
        self.write_index
            .0
            .store((write + 1) & self.mask, Ordering::Release);
        Ok(())
    }

    /// Consumer-only: takes the oldest queued buffer, or `None` when empty.
    pub fn pop(&self) -> Option<Box<Buffer<T>>> {
        if !self.valid {
            return None;
        }
        let write = self.write_index.0.load(Ordering::Acquire);
        let read = self.read_index.0.load(Ordering::Relaxed);
        if write.wrapping_sub(read) & self.mask == 0 {
            return None;
        }
        // SAFETY: the acquire load of the write index orders this read after
        // the producer's slot store; the consumer is the only reader.
        let raw = unsafe {
            let slot = self.slots[read].get();
            let raw = *slot;
            *slot = ptr::null_mut();
            raw
        };
        self.read_index
            .0
            .store((read + 1) & self.mask, Ordering::Release);
        debug_assert!(!raw.is_null(), "occupied ring slot held a null buffer");
        // SAFETY: every occupied slot holds a pointer produced by
        // Box::into_raw in push or full-mode construction.
        Some(unsafe { Box::from_raw(raw) })
    }

    /// Destroys every owned buffer still in the slots.
    fn release_owned_slots(&mut self) {
        for slot in self.slots.iter() {
            // SAFETY: teardown/cleanup is exclusive (&mut self).
            let raw = unsafe { *slot.get() };
            if !raw.is_null() {
                // SAFETY: occupied slots hold Box::into_raw pointers.
                drop(unsafe { Box::from_raw(raw) });
                // SAFETY: as above.
                unsafe { *slot.get() = ptr::null_mut() };
            }
        }
        self.write_index.0.store(0, Ordering::Relaxed);
        self.read_index.0.store(0, Ordering::Relaxed);
    }
}

impl<T> Drop for RingPool<T> {
    fn drop(&mut self) {
        if self.owns_buffers {
            self.release_owned_slots();
        } else {
            let queued = self.current_size();
            if queued > 0 {
                // The caller owns these; dropping them here would be a
                // double-free from the caller's point of view.
                warn!(
                    queued,
                    "empty-mode ring pool dropped with caller-owned buffers still queued; they are leaked"
                );
            }
        }
    }
}

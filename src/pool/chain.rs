//! Growable chain of ring pools.
//!
//! A singly-linked list of nodes, each owning one full-mode [`RingPool`]
//! built from a factory captured at construction (same queue size, same
//! buffer constructor). `push` offers the buffer to each pool from the head;
//! `pop` drains the pools from the head and, when every pool is empty,
//! appends a fresh pool and pops from it. Growth happens only on the pop
//! path: that is the only place where the absence of a buffer blocks
//! progress, while `push` can simply report failure.
//!
//! Traversal is lock-free: nodes are published with a release store of the
//! `next` link after the node's pool pointer is in place, and readers use
//! acquire loads, so a node is never observed before its pool. The producer
//! that grows the chain is the single writer of `tail`. Teardown is not safe
//! under concurrent access; callers must quiesce first.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use tracing::{debug, error};

use super::{Buffer, CacheAligned, RingPool};
use crate::constants::pool::MIN_QUEUE_SIZE;

/// One link in the chain, owning a single ring pool.
struct ChainNode<T> {
    /// The node's pool; written once before the node is published.
    pool: CacheAligned<AtomicPtr<RingPool<T>>>,
    /// Next node towards the tail; null at the end.
    next: CacheAligned<AtomicPtr<ChainNode<T>>>,
}

/// Growable pool-of-pools preserving the SPSC discipline of its rings.
///
/// # Example
///
/// ```
/// use memwarden::{Buffer, PoolChain};
///
/// // Usable capacity 1 per pool: the second pop grows the chain.
/// let chain = PoolChain::new(2, || Buffer::heap(0u8));
/// let first = chain.pop().expect("initial pool");
/// let second = chain.pop().expect("appended pool");
/// assert_eq!(chain.pool_count(), 2);
///
/// chain.push(first).expect("pool 1 has room");
/// chain.push(second).expect("pool 2 has room");
/// ```
pub struct PoolChain<T> {
    /// First pool; fixed after construction.
    head: CacheAligned<AtomicPtr<ChainNode<T>>>,
    /// Last pool; advanced only by the single consumer that grows the chain.
    tail: CacheAligned<AtomicPtr<ChainNode<T>>>,
    /// Builds each appended pool with the captured construction arguments.
    factory: Box<dyn Fn() -> RingPool<T> + Send + Sync>,
}

// SAFETY: nodes and pools are owned by the chain; cross-thread hand-off of
// buffer contents is governed by the rings' SPSC protocol.
unsafe impl<T: Send> Send for PoolChain<T> {}
// SAFETY: see Send.
unsafe impl<T: Send> Sync for PoolChain<T> {}

impl<T> PoolChain<T> {
    /// Builds a chain with one initial full-mode pool of `queue_size`
    /// (rounded up to a power of two), constructing buffers with
    /// `buffer_factory`.
    pub fn new<F>(queue_size: usize, buffer_factory: F) -> Self
    where
        F: Fn() -> Buffer<T> + Send + Sync + 'static,
    {
        let queue_size = queue_size.next_power_of_two().max(MIN_QUEUE_SIZE);
        let factory: Box<dyn Fn() -> RingPool<T> + Send + Sync> =
            Box::new(move || RingPool::with_buffers(queue_size, &buffer_factory));
        let first = Self::new_node(&factory);
        Self {
            head: CacheAligned(AtomicPtr::new(first)),
            tail: CacheAligned(AtomicPtr::new(first)),
            factory,
        }
    }

    fn new_node(factory: &(dyn Fn() -> RingPool<T> + Send + Sync)) -> *mut ChainNode<T> {
        let pool = factory();
        if !pool.is_valid() {
            // Treated as catastrophic: the chain stays usable but this pool
            // will never yield a buffer.
            error!("pool chain factory produced an invalid ring pool");
        }
        let pool = Box::into_raw(Box::new(pool));
        Box::into_raw(Box::new(ChainNode {
            pool: CacheAligned(AtomicPtr::new(pool)),
            next: CacheAligned(AtomicPtr::new(ptr::null_mut())),
        }))
    }

    /// Producer-only: offers the buffer to each pool from the head; the
    /// buffer comes back if every pool is full.
    pub fn push(&self, mut buffer: Box<Buffer<T>>) -> Result<(), Box<Buffer<T>>> {
        let mut current = self.head.0.load(Ordering::Acquire);
        while !current.is_null() {
            // SAFETY: published nodes stay alive until the chain is dropped,
            // and dropping requires exclusive access.
            let node = unsafe { &*current };
            // SAFETY: the pool pointer is written before the node is
            // published and never changes afterwards.
            let pool = unsafe { &*node.pool.0.load(Ordering::Acquire) };
            match pool.push(buffer) {
                Ok(()) => return Ok(()),
                Err(back) => buffer = back,
            }
            current = node.next.0.load(Ordering::Acquire);
        }
        Err(buffer)
    }

    /// Consumer-only: takes the oldest buffer from the first non-empty pool,
    /// growing the chain when every pool is drained.
    ///
    /// `None` is only possible when pool construction failed, which the
    /// chain treats as catastrophic (and has already logged).
    pub fn pop(&self) -> Option<Box<Buffer<T>>> {
        let mut current = self.head.0.load(Ordering::Acquire);
        while !current.is_null() {
            // SAFETY: see `push`.
            let node = unsafe { &*current };
            // SAFETY: see `push`.
            let pool = unsafe { &*node.pool.0.load(Ordering::Acquire) };
            if let Some(buffer) = pool.pop() {
                return Some(buffer);
            }
            current = node.next.0.load(Ordering::Acquire);
        }
        self.add_pool();
        let tail = self.tail.0.load(Ordering::Acquire);
        // SAFETY: `add_pool` just stored a valid node into `tail`.
        let node = unsafe { &*tail };
        // SAFETY: see `push`.
        let pool = unsafe { &*node.pool.0.load(Ordering::Acquire) };
        pool.pop()
    }

    /// Appends a freshly constructed pool at the tail.
    ///
    /// Single-writer: only the consumer that observed exhaustion grows the
    /// chain, so the tail advance needs no compare-and-swap.
    fn add_pool(&self) {
        let node = Self::new_node(self.factory.as_ref());
        let current_tail = self.tail.0.load(Ordering::Acquire);
        // SAFETY: the tail node is published and alive.
        let tail_ref = unsafe { &*current_tail };
        // Release-publish: the new node's pool pointer must be visible
        // before any traversal can reach the node through `next`.
        tail_ref.next.0.store(node, Ordering::Release);
        self.tail.0.store(node, Ordering::Relaxed);
        debug!(pools = self.pool_count(), "pool chain grew");
    }

    /// Number of pools currently chained. Observational.
    pub fn pool_count(&self) -> usize {
        let mut n = 0;
        let mut current = self.head.0.load(Ordering::Acquire);
        while !current.is_null() {
            n += 1;
            // SAFETY: published nodes stay alive until the chain is dropped.
            current = unsafe { &*current }.next.0.load(Ordering::Acquire);
        }
        n
    }

    /// Buffers currently queued across every pool. Observational.
    pub fn current_size(&self) -> usize {
        let mut total = 0;
        let mut current = self.head.0.load(Ordering::Acquire);
        while !current.is_null() {
            // SAFETY: published nodes stay alive until the chain is dropped.
            let node = unsafe { &*current };
            // SAFETY: see `push`.
            total += unsafe { &*node.pool.0.load(Ordering::Acquire) }.current_size();
            current = node.next.0.load(Ordering::Acquire);
        }
        total
    }
}

impl<T> Drop for PoolChain<T> {
    fn drop(&mut self) {
        // Exclusive access: plain walk, free every pool then every node.
        let mut current = self.head.0.load(Ordering::Relaxed);
        while !current.is_null() {
            // SAFETY: nodes and pools were created with Box::into_raw and
            // are freed exactly once, here.
            unsafe {
                let node = Box::from_raw(current);
                let next = node.next.0.load(Ordering::Relaxed);
                let pool = node.pool.0.load(Ordering::Relaxed);
                if !pool.is_null() {
                    drop(Box::from_raw(pool));
                }
                current = next;
            }
        }
        self.head.0.store(ptr::null_mut(), Ordering::Relaxed);
        self.tail.0.store(ptr::null_mut(), Ordering::Relaxed);
    }
}

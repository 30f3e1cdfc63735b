//! Pool chain growth, cross-pool cleanup, and concurrency tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use memwarden::{Buffer, PoolChain};
use rstest::*;

/// Counts live instances against a per-test counter so teardown leaks are
/// observable without cross-test interference.
#[derive(Debug)]
struct LifeTracker {
    live: Arc<AtomicI64>,
}

impl LifeTracker {
    fn new(live: &Arc<AtomicI64>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self { live: Arc::clone(live) }
    }
}

impl Drop for LifeTracker {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

#[rstest]
#[case(4, 3, 9)] // usable 3, 9 pops -> 3 pools
#[case(4, 3, 10)] // usable 3, 10 pops -> 4 pools
#[case(2, 1, 5)] // usable 1, 5 pops -> 5 pools
fn growth_matches_ceiling_rule(
    #[case] queue_size: usize,
    #[case] usable: usize,
    #[case] pops: usize,
) {
    crate::init_test_env();
    let chain = PoolChain::new(queue_size, || Buffer::heap(7u32));

    let mut held = Vec::new();
    for _ in 0..pops {
        held.push(chain.pop().expect("buffer or growth"));
    }
    assert_eq!(chain.pool_count(), pops.div_ceil(usable));
}

/// Ten single-buffer pools, drain all, push back in a foreign order, tear
/// down, and demand a zero live-instance count.
#[rstest]
fn cross_pool_cleanup_leaks_nothing() {
    crate::init_test_env();
    let live = Arc::new(AtomicI64::new(0));
    {
        let counter = Arc::clone(&live);
        let chain = PoolChain::new(2, move || Buffer::heap(LifeTracker::new(&counter)));

        // Force 10 pools into existence by draining without returning.
        let mut held = Vec::new();
        for _ in 0..10 {
            held.push(chain.pop().expect("buffer or growth"));
        }
        assert_eq!(chain.pool_count(), 10);
        assert_eq!(live.load(Ordering::Relaxed), 10);

        // Return the buffers in a permuted order so nearly every buffer
        // lands in a pool other than its birth pool.
        for i in 0..held.len() {
            let buffer = held.swap_remove((i * 7) % held.len());
            chain.push(buffer).expect("room across pools");
        }
    }
    // Chain teardown destroys every pool and every buffer it holds.
    assert_eq!(live.load(Ordering::Relaxed), 0);
}

#[rstest]
fn push_fails_only_when_every_pool_is_full() {
    crate::init_test_env();
    let chain = PoolChain::new(2, || Buffer::heap(0u8));

    let a = chain.pop().expect("pool 1");
    let b = chain.pop().expect("growth");
    assert_eq!(chain.pool_count(), 2);

    chain.push(a).expect("pool 1 has room");
    chain.push(b).expect("pool 2 has room");
    let rejected = chain.push(Box::new(Buffer::heap(9u8)));
    assert!(rejected.is_err());

    // Freeing one slot makes the push succeed again.
    let reopened = chain.pop().expect("queued buffer");
    drop(reopened);
    chain
        .push(Box::new(Buffer::heap(9u8)))
        .expect("slot freed by the pop");
}

#[rstest]
fn buffers_recycle_through_a_side_channel() {
    crate::init_test_env();
    const TOTAL: usize = 10_000;

    let chain = Arc::new(PoolChain::new(4, || Buffer::heap(0usize)));
    let (hand_off, worker_inbox) = mpsc::channel::<Box<Buffer<usize>>>();

    // Consumer of the chain: pops (growing on exhaustion) and hands the
    // buffer off for processing.
    let popper_chain = Arc::clone(&chain);
    let popper = thread::spawn(move || {
        for i in 0..TOTAL {
            let mut buffer = popper_chain.pop().expect("pop or growth");
            *buffer.get_mut() = i;
            hand_off.send(buffer).expect("worker alive");
        }
    });

    // Producer of the chain: receives processed buffers and returns them.
    let pusher_chain = Arc::clone(&chain);
    let pusher = thread::spawn(move || {
        let mut returned = 0usize;
        while returned < TOTAL {
            let buffer = worker_inbox.recv().expect("popper alive");
            pusher_chain.push(buffer).expect("chain grew to fit");
            returned += 1;
        }
    });

    popper.join().expect("popper panicked");
    pusher.join().expect("pusher panicked");

    // Everything came back: the pools hold every buffer ever constructed.
    assert!(chain.current_size() > 0);
}

#[rstest]
fn lifecycle_counts_match_pool_growth() {
    crate::init_test_env();
    let live = Arc::new(AtomicI64::new(0));
    {
        let counter = Arc::clone(&live);
        let chain = PoolChain::new(2, move || Buffer::heap(LifeTracker::new(&counter)));
        assert_eq!(live.load(Ordering::Relaxed), 1);

        let first = chain.pop().expect("pool 1");
        let second = chain.pop().expect("growth");
        assert_eq!(live.load(Ordering::Relaxed), 2);

        chain.push(first).expect("room");
        chain.push(second).expect("room");
    }
    assert_eq!(live.load(Ordering::Relaxed), 0);
}

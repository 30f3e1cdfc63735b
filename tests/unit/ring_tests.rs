//! SPSC ring pool invariants and thread-ordering tests.

use std::sync::Arc;
use std::thread;

use memwarden::{Buffer, MemError, RingPool};
use rstest::*;

#[rstest]
#[case(2)]
#[case(4)]
#[case(16)]
#[case(64)]
fn at_most_capacity_minus_one_in_flight(#[case] queue_size: usize) {
    crate::init_test_env();
    let pool = RingPool::<usize>::empty(queue_size);
    let capacity = pool.capacity();

    let mut accepted = 0;
    loop {
        match pool.push(Box::new(Buffer::heap(accepted))) {
            Ok(()) => accepted += 1,
            Err(_rejected) => break,
        }
    }
    assert_eq!(accepted, capacity - 1);
    assert_eq!(pool.current_size(), capacity - 1);

    // Drain completely so nothing is left for the empty-mode teardown.
    for expected in 0..accepted {
        let buffer = pool.pop().expect("queued buffer");
        assert_eq!(*buffer.get(), expected);
    }
    assert!(pool.pop().is_none());
}

#[rstest]
fn fifo_pointer_identity() {
    crate::init_test_env();
    let pool = RingPool::<u32>::empty(8);

    let mut addresses = Vec::new();
    for i in 0..7u32 {
        let buffer = Box::new(Buffer::heap(i));
        addresses.push(buffer.as_ptr());
        pool.push(buffer).expect("ring has room");
    }
    for expected in addresses {
        let buffer = pool.pop().expect("queued buffer");
        assert_eq!(buffer.as_ptr(), expected);
    }
}

#[rstest]
fn wraparound_preserves_order() {
    crate::init_test_env();
    let pool = RingPool::<usize>::empty(4);
    let mut next_in = 0usize;
    let mut next_out = 0usize;

    // Interleave pushes and pops far beyond one lap of the ring.
    for _ in 0..50 {
        while pool.push(Box::new(Buffer::heap(next_in))).is_ok() {
            next_in += 1;
        }
        while let Some(buffer) = pool.pop() {
            assert_eq!(*buffer.get(), next_out);
            next_out += 1;
        }
    }
    assert_eq!(next_in, next_out);
}

#[rstest]
fn full_mode_owns_and_recycles() {
    crate::init_test_env();
    let pool = RingPool::with_buffers(8, || Buffer::heap(0u64));
    assert!(pool.is_valid());
    assert_eq!(pool.usable_capacity(), 7);
    assert_eq!(pool.current_size(), 7);

    let mut buffer = pool.pop().expect("pre-constructed buffer");
    *buffer.get_mut() = 42;
    pool.push(buffer).expect("ring has room");
    assert_eq!(pool.current_size(), 7);
}

#[rstest]
fn invalid_pool_rejects_traffic() {
    crate::init_test_env();
    let pool = RingPool::<u8>::try_with_buffers(4, || {
        Err(MemError::BufferInit { size: 1, align: 1 })
    });
    assert!(!pool.is_valid());
    assert!(pool.pop().is_none());
    assert!(pool.push(Box::new(Buffer::heap(1u8))).is_err());
    assert_eq!(pool.current_size(), 0);
}

#[rstest]
fn inline_buffers_flow_through_the_ring() {
    crate::init_test_env();
    let pool = RingPool::<String>::empty(4);
    pool.push(Box::new(Buffer::inline("inline".to_owned())))
        .expect("ring has room");
    let buffer = pool.pop().expect("queued buffer");
    assert!(!buffer.is_heap());
    assert_eq!(buffer.get(), "inline");
}

/// Single producer pushes 0..999, single consumer pops; the recorded
/// sequence must come back in order through a capacity-16 ring.
#[rstest]
fn spsc_sequence_is_fifo_across_threads() {
    crate::init_test_env();
    const COUNT: usize = 1000;
    let pool = Arc::new(RingPool::<usize>::empty(16));

    let producer_pool = Arc::clone(&pool);
    let producer = thread::spawn(move || {
        for i in 0..COUNT {
            let mut buffer = Box::new(Buffer::heap(i));
            loop {
                match producer_pool.push(buffer) {
                    Ok(()) => break,
                    Err(back) => {
                        buffer = back;
                        thread::yield_now();
                    }
                }
            }
        }
    });

    let consumer_pool = Arc::clone(&pool);
    let consumer = thread::spawn(move || {
        let mut recorded = Vec::with_capacity(COUNT);
        while recorded.len() < COUNT {
            match consumer_pool.pop() {
                Some(buffer) => recorded.push(*buffer.get()),
                None => thread::yield_now(),
            }
        }
        recorded
    });

    producer.join().expect("producer panicked");
    let recorded = consumer.join().expect("consumer panicked");
    assert_eq!(recorded, (0..COUNT).collect::<Vec<_>>());
}

//! Substrate layout and failure-detection tests.
//!
//! Exercises both block layouts, the integrity sentinels, the nothrow
//! paths, and the informational size/alignment hints on release.

use memwarden::{track, Arena, ArenaBox};
use rstest::*;

#[fixture]
fn arena() -> Arena {
    crate::init_test_env();
    Arena::new("track-unit")
}

#[rstest]
#[case(16)]
#[case(128)]
#[case(4096)]
fn aligned_allocations_are_congruent(arena: Arena, #[case] align: usize) {
    // SAFETY: released below.
    let ptr = unsafe { track::allocate_aligned_in(64, align, &arena) };
    assert_eq!(ptr as usize % align, 0);
    // SAFETY: live tracked block.
    let header = unsafe { track::header_of(ptr) };
    assert!(header.is_active());
    assert_eq!(header.alignment(), align);
    assert_eq!(header.size(), 64);
    // SAFETY: allocated above, released exactly once.
    unsafe { track::deallocate(ptr) };
    assert_eq!(arena.count(), 0);
}

#[rstest]
fn default_blocks_carry_live_headers(arena: Arena) {
    // SAFETY: released below.
    let ptr = unsafe { track::allocate_in(24, &arena) };
    // SAFETY: live tracked block.
    let header = unsafe { track::header_of(ptr) };
    assert!(header.is_active());
    assert!(header.is_tracked());
    assert!(!header.is_freed());
    assert_eq!(header.alignment(), 0);
    assert_eq!(header.alloc_id(), 1);
    // SAFETY: allocated above.
    unsafe { track::deallocate(ptr) };
}

#[rstest]
fn payload_is_fully_usable(arena: Arena) {
    // Writing every payload byte must not disturb the sentinels.
    // SAFETY: released below; writes stay inside the payload.
    unsafe {
        let ptr = track::allocate_in(256, &arena);
        for i in 0..256 {
            ptr.add(i).write(0xA5);
        }
        track::deallocate(ptr);
    }
    assert_eq!(arena.total_bytes(), 0);
}

#[rstest]
#[should_panic(expected = "double free")]
fn double_free_is_fatal(arena: Arena) {
    // SAFETY: deliberately released twice to trip the signature check.
    unsafe {
        let ptr = track::allocate_in(8, &arena);
        track::deallocate(ptr);
        track::deallocate(ptr);
    }
}

#[rstest]
#[should_panic(expected = "heap overrun")]
fn footer_corruption_is_fatal(arena: Arena) {
    // SAFETY: the write lands in the footer region of our own block, which
    // is exactly the corruption the sentinel exists to catch.
    unsafe {
        let ptr = track::allocate_in(16, &arena);
        ptr.add(16).write(0x00);
        track::deallocate(ptr);
    }
}

#[rstest]
#[should_panic(expected = "does not own")]
fn wild_signature_is_fatal(arena: Arena) {
    // A block whose header was stomped is indistinguishable from a foreign
    // pointer; both must abort. The signature is the last header field, 8
    // bytes below the user pointer in the repr(C) layout.
    // SAFETY: the corrupting write stays inside our own allocation's header.
    unsafe {
        let ptr = track::allocate_in(16, &arena);
        assert!(track::header_of(ptr).is_active());
        ptr.sub(8).cast::<u32>().write(0x1234_5678);
        track::deallocate(ptr);
    }
}

#[rstest]
fn sized_hints_are_informational(arena: Arena) {
    // SAFETY: released below with a wrong-but-harmless hint.
    unsafe {
        let ptr = track::allocate_in(40, &arena);
        track::deallocate_sized(ptr, 999);
    }
    assert_eq!(arena.count(), 0);
    assert_eq!(arena.total_bytes(), 0);

    // SAFETY: aligned release with a wrong alignment hint.
    unsafe {
        let ptr = track::allocate_aligned_in(8, 64, &arena);
        track::deallocate_sized_aligned(ptr, 8, 128);
    }
    assert_eq!(arena.count(), 0);
}

#[rstest]
fn nothrow_paths_return_null_without_side_effects(arena: Arena) {
    // SAFETY: nothrow path allocates nothing on failure.
    let huge = unsafe { track::try_allocate_in(isize::MAX as usize, &arena) };
    assert!(huge.is_null());
    assert_eq!(arena.count(), 0);
    assert_eq!(arena.total_bytes(), 0);

    // A satisfiable nothrow request behaves like the throwing path.
    // SAFETY: released below.
    let ok = unsafe { track::try_allocate_aligned_in(32, 16, &arena) };
    assert!(!ok.is_null());
    assert_eq!(ok as usize % 16, 0);
    // SAFETY: allocated above.
    unsafe { track::deallocate(ok) };
}

#[rstest]
fn null_free_is_a_noop() {
    crate::init_test_env();
    // SAFETY: null is explicitly allowed.
    unsafe { track::deallocate(std::ptr::null_mut()) };
}

#[rstest]
fn deletion_finds_the_true_arena(arena: Arena) {
    // Blocks freed through the header route to their birth arena even if
    // the caller has moved on to another arena since.
    let other = Arena::new("track-other");
    // SAFETY: released below.
    let ptr = unsafe { track::allocate_in(12, &arena) };
    let _decoy = ArenaBox::new_in(0u8, &other);
    // SAFETY: allocated above.
    unsafe { track::deallocate(ptr) };
    assert_eq!(arena.count(), 0);
    assert_eq!(other.count(), 1);
}

#[rstest]
fn substrate_counters_advance(arena: Arena) {
    let before = memwarden::memory_stats();
    let block = ArenaBox::new_in(7u128, &arena);
    drop(block);
    let after = memwarden::memory_stats();
    assert!(after.tracked_allocations > before.tracked_allocations);
    assert!(after.tracked_deallocations > before.tracked_deallocations);
}

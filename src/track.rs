//! Tracked allocation substrate.
//!
//! Lays out every allocation as `[header | payload | footer]`, charges it to
//! an arena, and verifies the integrity sentinels on release. The raw entry
//! points mirror `std::alloc`; [`TrackedAllocator`] adapts them to
//! [`GlobalAlloc`] so downstream code can route every heap allocation in the
//! process through the substrate with `#[global_allocator]`. Not installing
//! the adapter leaves the platform allocator in charge — that is the
//! build-time disable switch.
//!
//! Two block layouts exist (see [`crate::header`]): default-aligned blocks
//! place the header directly at the start of the raw allocation; aligned
//! blocks over-allocate `alignment` bytes of slack, round the user pointer
//! up, and rely on the header's `original` field to find the raw block again
//! at free time.
//!
//! # Reentrancy
//!
//! Reporter callbacks, tracing events, and the topology map all allocate. If
//! the adapter is installed those allocations re-enter the substrate, so a
//! thread-local guard is held for the duration of every tracked operation:
//! allocations observed while the guard is held are laid out with a header
//! but never registered (dead arena weak, id 0, no statistics). Such pass-through
//! blocks still verify their sentinels on free. This is also how placement
//! semantics surface here: constructing into caller-owned storage never
//! touches the substrate at all, and pass-through blocks never touch arena
//! state.

use std::alloc::{handle_alloc_error, GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::mem::{align_of, size_of};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::arena::{default_arena, Arena, ArenaCore};
use crate::constants::signature::{ACTIVE, FREED};
use crate::header::{self, AllocHeader, FOOTER_SIZE};

/// Size of the per-block metadata header in bytes.
pub(crate) const HEADER_SIZE: usize = size_of::<AllocHeader>();

/// Smallest alignment accepted on the aligned path.
const MIN_ALIGN: usize = size_of::<*const u8>();

static TRACKED_ALLOCS: AtomicU64 = AtomicU64::new(0);
static TRACKED_FREES: AtomicU64 = AtomicU64::new(0);
static UNTRACKED_ALLOCS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static IN_SUBSTRATE: Cell<bool> = const { Cell::new(false) };
}

/// Scoped reentrancy marker. The outermost holder tracks; nested entries are
/// routed to the pass-through form.
pub(crate) struct ReentrancyGuard {
    outermost: bool,
}

/// Routes every allocation in the caller's scope to the untracked
/// pass-through form. Used where tracking would recurse into state that is
/// still being initialized (the default arena's own shared core).
pub(crate) fn suppress_tracking() -> ReentrancyGuard {
    ReentrancyGuard::enter()
}

impl ReentrancyGuard {
    fn enter() -> Self {
        // try_with: during thread teardown the TLS slot is gone; treating
        // that as "nested" routes the allocation to the pass-through form
        // instead of panicking inside the allocator.
        let outermost = IN_SUBSTRATE
            .try_with(|flag| {
                let was = flag.get();
                flag.set(true);
                !was
            })
            .unwrap_or(false);
        Self { outermost }
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        if self.outermost {
            let _ = IN_SUBSTRATE.try_with(|flag| flag.set(false));
        }
    }
}

/// Process-wide substrate counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Blocks charged to an arena since process start.
    pub tracked_allocations: u64,
    /// Tracked blocks released since process start.
    pub tracked_deallocations: u64,
    /// Pass-through blocks (reentrant allocations) since process start.
    pub untracked_allocations: u64,
}

/// Snapshot of the substrate counters.
pub fn memory_stats() -> MemoryStats {
    MemoryStats {
        tracked_allocations: TRACKED_ALLOCS.load(Ordering::Relaxed),
        tracked_deallocations: TRACKED_FREES.load(Ordering::Relaxed),
        untracked_allocations: UNTRACKED_ALLOCS.load(Ordering::Relaxed),
    }
}

/// Raw layout for a block of `size` user bytes at the given alignment
/// (0 = default). None on address-space overflow.
fn block_layout(size: usize, align: usize) -> Option<Layout> {
    let slack = if align == 0 { 0 } else { align };
    let total = HEADER_SIZE
        .checked_add(size)?
        .checked_add(slack)?
        .checked_add(FOOTER_SIZE)?;
    Layout::from_size_align(total, align_of::<AllocHeader>()).ok()
}

/// Places the header and footer into a raw block and returns the user
/// pointer.
///
/// # Safety
/// `raw` must point at a live allocation of `block_layout(size, align)`
/// bytes; `size` must already be clamped to at least 1.
unsafe fn write_block(
    raw: *mut u8,
    size: usize,
    align: usize,
    arena: Weak<ArenaCore>,
    alloc_id: u64,
) -> *mut u8 {
    let user = if align == 0 {
        // SAFETY: the raw block reserves HEADER_SIZE bytes before the payload.
        unsafe { raw.add(HEADER_SIZE) }
    } else {
        // SAFETY: the aligned layout reserves `align + HEADER_SIZE` bytes of
        // slack, so rounding up stays in-bounds and leaves room for the
        // header below the user pointer.
        let base = unsafe { raw.add(HEADER_SIZE) } as usize;
        ((base + align - 1) & !(align - 1)) as *mut u8
    };
    // SAFETY: `user` points into the raw block with HEADER_SIZE writable
    // bytes below it and `size + FOOTER_SIZE` writable bytes at and above it.
    unsafe {
        AllocHeader::from_user_ptr(user).write(AllocHeader {
            arena,
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
            original: raw,
            size,
            align,
            alloc_id,
            signature: ACTIVE,
        });
        header::write_footer(user, size);
    }
    user
}

/// Shared allocation path.
///
/// # Safety
/// See the public entry points; `align` is 0 or a validated alignment.
unsafe fn allocate_impl(
    size: usize,
    align: usize,
    core: Option<&Arc<ArenaCore>>,
    nothrow: bool,
) -> *mut u8 {
    if align != 0 {
        assert!(
            align.is_power_of_two() && align >= MIN_ALIGN,
            "invalid alignment {align}: must be a power of two and at least {MIN_ALIGN}"
        );
    }
    let size = size.max(1);
    let Some(layout) = block_layout(size, align) else {
        if nothrow {
            return ptr::null_mut();
        }
        panic!("allocation request overflows the address space: {size} bytes aligned to {align}");
    };
    // SAFETY: `layout` has non-zero size.
    let raw = unsafe { System.alloc(layout) };
    if raw.is_null() {
        if nothrow {
            return ptr::null_mut();
        }
        handle_alloc_error(layout);
    }
    let guard = ReentrancyGuard::enter();
    if guard.outermost {
        let core = core.unwrap_or_else(|| default_arena().core());
        let id = core.next_id();
        // SAFETY: `raw` is a live allocation of `layout` bytes.
        let user = unsafe { write_block(raw, size, align, Arc::downgrade(core), id) };
        // SAFETY: the header was just initialized for this arena and is not
        // linked anywhere yet.
        unsafe { core.register(AllocHeader::from_user_ptr(user)) };
        TRACKED_ALLOCS.fetch_add(1, Ordering::Relaxed);
        user
    } else {
        UNTRACKED_ALLOCS.fetch_add(1, Ordering::Relaxed);
        // SAFETY: `raw` is a live allocation of `layout` bytes.
        unsafe { write_block(raw, size, align, Weak::new(), 0) }
    }
}

/// Shared release path. Hints are informational; the recorded header values
/// take precedence.
///
/// # Safety
/// See [`deallocate`].
unsafe fn deallocate_impl(user: *mut u8, size_hint: Option<usize>, align_hint: Option<usize>) {
    if user.is_null() {
        return;
    }
    // SAFETY: a non-null pointer handed to the substrate must carry a header
    // laid out by it; anything else is caught by the signature check below
    // (or is undefined behaviour exactly as freeing a wild pointer always is).
    let header_ptr = unsafe { AllocHeader::from_user_ptr(user) };
    // SAFETY: as above.
    let (signature, size, align, original) = unsafe {
        let h = &*header_ptr;
        (h.signature, h.size, h.align, h.original)
    };
    match signature {
        ACTIVE => {}
        FREED => panic!("double free detected: block at {user:p} was already released"),
        other => panic!(
            "free of a block the tracked allocator does not own: {user:p} has signature {other:#010X}"
        ),
    }
    // SAFETY: an active block keeps `size + FOOTER_SIZE` bytes readable past
    // the user pointer.
    assert!(
        unsafe { header::footer_intact(user, size) },
        "heap overrun detected: footer sentinel after block at {user:p} ({size} bytes) is damaged"
    );
    if let Some(hint) = size_hint {
        if hint.max(1) != size {
            warn!(
                recorded = size,
                hinted = hint,
                "sized free disagrees with the recorded block size; using the recorded value"
            );
        }
    }
    if let Some(hint) = align_hint {
        let normalized = if hint <= align_of::<AllocHeader>() { 0 } else { hint };
        if normalized != align {
            warn!(
                recorded = align,
                hinted = hint,
                "aligned free disagrees with the recorded alignment; using the recorded value"
            );
        }
    }
    // FREED is written before the underlying free so the next delete of the
    // same user pointer trips the double-free check.
    // SAFETY: the header is live until the System free below.
    unsafe { (*header_ptr).signature = FREED };
    let _guard = ReentrancyGuard::enter();
    // SAFETY: the weak is moved out exactly once and the arena field is
    // never touched again before the raw block is freed.
    let arena = unsafe { ptr::read(ptr::addr_of!((*header_ptr).arena)) };
    if let Some(core) = arena.upgrade() {
        // SAFETY: the header was registered with exactly this arena core.
        unsafe { core.unregister(header_ptr) };
        TRACKED_FREES.fetch_add(1, Ordering::Relaxed);
    }
    let Some(layout) = block_layout(size, align) else {
        unreachable!("block layout was validated at allocation time")
    };
    // SAFETY: `original` is the pointer System handed out for `layout`.
    unsafe { System.dealloc(original, layout) };
}

/// Allocates `size` bytes charged to the default arena.
///
/// Aborts on out-of-memory. A zero `size` is clamped to 1.
///
/// # Safety
/// The returned pointer must be released with one of the `deallocate`
/// entry points of this crate, exactly once.
pub unsafe fn allocate(size: usize) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { allocate_impl(size, 0, None, false) }
}

/// Allocates `size` bytes charged to `arena`.
///
/// # Example
///
/// ```
/// use memwarden::{track, Arena};
///
/// let arena = Arena::new("raw");
/// // SAFETY: released exactly once below.
/// let ptr = unsafe { track::allocate_in(32, &arena) };
/// assert_eq!(arena.total_bytes(), 32);
/// // SAFETY: allocated above.
/// unsafe { track::deallocate(ptr) };
/// assert_eq!(arena.total_bytes(), 0);
/// ```
///
/// # Safety
/// As [`allocate`].
pub unsafe fn allocate_in(size: usize, arena: &Arena) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { allocate_impl(size, 0, Some(arena.core()), false) }
}

/// Allocates `size` bytes at `align`, charged to the default arena.
///
/// `align` must be a power of two no smaller than the pointer size;
/// violating that is a contract violation and aborts.
///
/// # Safety
/// As [`allocate`].
pub unsafe fn allocate_aligned(size: usize, align: usize) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { allocate_impl(size, align, None, false) }
}

/// Allocates `size` bytes at `align`, charged to `arena`.
///
/// # Safety
/// As [`allocate_in`].
pub unsafe fn allocate_aligned_in(size: usize, align: usize, arena: &Arena) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { allocate_impl(size, align, Some(arena.core()), false) }
}

/// Nothrow variant of [`allocate`]: returns null instead of aborting when
/// the underlying allocator fails.
///
/// # Safety
/// As [`allocate`].
pub unsafe fn try_allocate(size: usize) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { allocate_impl(size, 0, None, true) }
}

/// Nothrow variant of [`allocate_in`].
///
/// # Safety
/// As [`allocate_in`].
pub unsafe fn try_allocate_in(size: usize, arena: &Arena) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { allocate_impl(size, 0, Some(arena.core()), true) }
}

/// Nothrow variant of [`allocate_aligned`]. Alignment violations still
/// abort: they are programmer errors, not resource exhaustion.
///
/// # Safety
/// As [`allocate`].
pub unsafe fn try_allocate_aligned(size: usize, align: usize) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { allocate_impl(size, align, None, true) }
}

/// Nothrow variant of [`allocate_aligned_in`].
///
/// # Safety
/// As [`allocate_in`].
pub unsafe fn try_allocate_aligned_in(size: usize, align: usize, arena: &Arena) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { allocate_impl(size, align, Some(arena.core()), true) }
}

/// Releases a block previously returned by an `allocate` entry point.
///
/// Freeing null is a no-op. A freed or foreign pointer, or a damaged footer
/// sentinel, aborts: those are memory-safety bugs, never runtime conditions.
///
/// # Safety
/// `ptr` must be null or a pointer obtained from this crate's allocation
/// entry points that has not been released yet.
pub unsafe fn deallocate(ptr: *mut u8) {
    // SAFETY: forwarded contract.
    unsafe { deallocate_impl(ptr, None, None) }
}

/// Sized variant of [`deallocate`]. The recorded size takes precedence; a
/// mismatching hint is logged.
///
/// # Safety
/// As [`deallocate`].
pub unsafe fn deallocate_sized(ptr: *mut u8, size: usize) {
    // SAFETY: forwarded contract.
    unsafe { deallocate_impl(ptr, Some(size), None) }
}

/// Aligned variant of [`deallocate`]. The recorded alignment takes
/// precedence; a mismatching hint is logged.
///
/// # Safety
/// As [`deallocate`].
pub unsafe fn deallocate_aligned(ptr: *mut u8, align: usize) {
    // SAFETY: forwarded contract.
    unsafe { deallocate_impl(ptr, None, Some(align)) }
}

/// Sized and aligned variant of [`deallocate`].
///
/// # Safety
/// As [`deallocate`].
pub unsafe fn deallocate_sized_aligned(ptr: *mut u8, size: usize, align: usize) {
    // SAFETY: forwarded contract.
    unsafe { deallocate_impl(ptr, Some(size), Some(align)) }
}

/// Allocates charged to a specific arena core (the per-type binding path).
///
/// # Safety
/// As [`allocate`].
pub(crate) unsafe fn allocate_with_core(size: usize, align: usize, core: &Arc<ArenaCore>) -> *mut u8 {
    // SAFETY: forwarded contract.
    unsafe { allocate_impl(size, align, Some(core), false) }
}

/// Borrows the metadata header of a live block for inspection.
///
/// # Safety
/// `user` must point at the payload of a live block allocated by this crate,
/// and the borrow must end before the block is released.
pub unsafe fn header_of<'a>(user: *const u8) -> &'a AllocHeader {
    // SAFETY: forwarded contract.
    unsafe { &*AllocHeader::from_user_ptr(user.cast_mut()) }
}

/// [`GlobalAlloc`] adapter charging every process allocation to the default
/// arena.
///
/// Install with:
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: memwarden::TrackedAllocator = memwarden::TrackedAllocator;
/// ```
///
/// Layouts whose alignment fits the header's own alignment take the default
/// block layout; larger alignments take the aligned layout. Allocation
/// failure returns null per the `GlobalAlloc` contract.
pub struct TrackedAllocator;

// SAFETY: blocks are laid out and released by the substrate above, which
// delegates the actual memory to `System` and hands back pointers that stay
// valid until deallocated. Layout round-trips are exact because the header
// records size and alignment.
unsafe impl GlobalAlloc for TrackedAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = if layout.align() <= align_of::<AllocHeader>() {
            0
        } else {
            layout.align()
        };
        // SAFETY: nothrow path; null propagates per the GlobalAlloc contract.
        unsafe { allocate_impl(layout.size(), align, None, true) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: `ptr` came from `alloc` with this layout.
        unsafe { deallocate_impl(ptr, Some(layout.size()), Some(layout.align())) }
    }
}

//! Named allocation arenas.
//!
//! An [`Arena`] is an accounting bucket: every tracked block is charged to
//! exactly one arena, which owns an intrusive doubly-linked list of the live
//! headers, a running byte total, and a monotonic allocation id counter.
//! Arenas also form the nodes of the directed arena graph (see
//! [`crate::graph`]) used by the hierarchical aggregation queries.
//!
//! `Arena` is a handle over a shared [`ArenaCore`]: headers and the topology
//! hold weak references to the core, so blocks and graph edges never dangle
//! even if they outlive the handle. A block freed after its arena is gone is
//! still released correctly; only its statistics have nowhere to go.
//!
//! The list and the attached reporter are guarded by one per-arena lock; the
//! byte total and the id counter are atomics so the observational reads stay
//! lock-free. The running total is not strictly consistent with `count()`
//! under concurrent mutation, which is acceptable for a diagnostic facility.

use std::str;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, trace, warn};

use crate::constants::arena::{DEFAULT_ARENA_NAME, NAME_BUF, NAME_MAX};
use crate::graph;
use crate::header::AllocHeader;
use crate::reporter::{BlockReport, Reporter};

/// State guarded by the arena list lock.
struct ArenaInner {
    /// Head of the intrusive tracking list; null iff the list is empty.
    head: *mut AllocHeader,
    /// Tail of the intrusive tracking list; null iff the list is empty.
    tail: *mut AllocHeader,
    /// Event sink; consulted under the lock on every register/unregister.
    reporter: Option<Arc<dyn Reporter>>,
}

/// Shared state behind an [`Arena`] handle.
///
/// Headers and topology edges reference the core weakly, which is what makes
/// late frees and dead-neighbour traversal safe.
pub(crate) struct ArenaCore {
    /// Inline name storage, truncated to [`NAME_MAX`] bytes.
    name: [u8; NAME_BUF],
    /// Length of the stored name in bytes.
    name_len: usize,
    /// Tracking list and reporter, behind the arena list lock.
    inner: Mutex<ArenaInner>,
    /// Running byte total (`size + alignment` per block). Mutated only under
    /// the list lock; read lock-free.
    total: AtomicUsize,
    /// Next allocation id; starts at 1 and only grows.
    next_id: AtomicU64,
}

// SAFETY: the raw header pointers in `ArenaInner` are only dereferenced under
// the arena list lock, and the headers they point at are owned by this arena
// for as long as they are linked.
unsafe impl Send for ArenaCore {}
// SAFETY: see the Send justification; all shared mutation is lock- or
// atomic-mediated.
unsafe impl Sync for ArenaCore {}

/// Named accounting unit owning a list of live tracked blocks.
///
/// The name is bounded and fixed at construction; construction performs one
/// shared-state allocation and nothing else, so the default arena can be
/// built from inside the allocation path.
pub struct Arena {
    core: Arc<ArenaCore>,
}

/// Observational snapshot of one arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaStats {
    /// Arena name.
    pub name: String,
    /// Number of live tracked blocks.
    pub live_blocks: usize,
    /// Running byte total (`size + alignment` per block).
    pub total_bytes: usize,
    /// Next allocation id the arena will hand out.
    pub next_alloc_id: u64,
}

impl ArenaCore {
    /// Arena name as given at construction (post truncation).
    pub(crate) fn name(&self) -> &str {
        // SAFETY: `name[..name_len]` was copied from a `&str` on a char
        // boundary, so it is valid UTF-8.
        unsafe { str::from_utf8_unchecked(&self.name[..self.name_len]) }
    }

    /// Hands out the next allocation id.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Running byte total, lock-free.
    pub(crate) fn total_bytes(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Live block count; walks the list under the lock.
    pub(crate) fn count(&self) -> usize {
        let inner = self.inner.lock();
        let mut n = 0;
        let mut cur = inner.head;
        while !cur.is_null() {
            n += 1;
            // SAFETY: linked headers are live and owned by this arena; the
            // list lock is held.
            cur = unsafe { (*cur).next };
        }
        n
    }

    /// Charges a freshly laid-out block to this arena.
    ///
    /// Adds `size + alignment` to the running total, notifies the reporter,
    /// and appends the header at the tail of the tracking list.
    ///
    /// # Safety
    /// `header` must point at a live, fully initialized header whose `arena`
    /// field refers to this core, and must not already be linked anywhere.
    pub(crate) unsafe fn register(&self, header: *mut AllocHeader) {
        let mut inner = self.inner.lock();
        // SAFETY: caller guarantees the header is live and exclusively ours.
        let (size, align, id) = unsafe { ((*header).size, (*header).align, (*header).alloc_id) };
        self.total.fetch_add(size + align, Ordering::Relaxed);
        if let Some(reporter) = inner.reporter.as_ref() {
            // SAFETY: header is live and owned by this arena.
            reporter.on_alloc(unsafe { &BlockReport::from_header(self, header) });
        }
        // SAFETY: list surgery under the lock; all linked headers are live.
        unsafe {
            (*header).next = std::ptr::null_mut();
            (*header).prev = inner.tail;
            if inner.tail.is_null() {
                inner.head = header;
            } else {
                (*inner.tail).next = header;
            }
        }
        inner.tail = header;
        trace!(arena = self.name(), id, size, align, "block registered");
    }

    /// Releases a block from this arena.
    ///
    /// Subtracts `size + alignment` from the running total, notifies the
    /// reporter, and unlinks the header. An inconsistent list (an unlink
    /// with an empty list) indicates a tracking bug; it is logged and the
    /// operation continues.
    ///
    /// # Safety
    /// `header` must point at a live header previously registered with this
    /// arena and not yet unregistered.
    pub(crate) unsafe fn unregister(&self, header: *mut AllocHeader) {
        let mut inner = self.inner.lock();
        // SAFETY: caller guarantees the header is live and linked here.
        let (size, align, id) = unsafe { ((*header).size, (*header).align, (*header).alloc_id) };
        // The total never goes negative, even if tracking state was damaged.
        let _ = self
            .total
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
                Some(t.saturating_sub(size + align))
            });
        if let Some(reporter) = inner.reporter.as_ref() {
            // SAFETY: header is still live until the caller frees it.
            reporter.on_dealloc(unsafe { &BlockReport::from_header(self, header) });
        }
        if inner.head.is_null() {
            error!(
                arena = self.name(),
                id,
                "unlink requested on an empty tracking list; tracking state is inconsistent"
            );
            return;
        }
        // SAFETY: list surgery under the lock; all linked headers are live.
        unsafe {
            let prev = (*header).prev;
            let next = (*header).next;
            if prev.is_null() {
                inner.head = next;
            } else {
                (*prev).next = next;
            }
            if next.is_null() {
                inner.tail = prev;
            } else {
                (*next).prev = prev;
            }
            (*header).next = std::ptr::null_mut();
            (*header).prev = std::ptr::null_mut();
        }
        trace!(arena = self.name(), id, size, "block unregistered");
    }
}

impl Drop for ArenaCore {
    fn drop(&mut self) {
        graph::detach(std::ptr::from_ref(self) as usize);
        let inner = self.inner.get_mut();
        let mut leaked = 0usize;
        let mut cur = inner.head;
        while !cur.is_null() {
            leaked += 1;
            // SAFETY: linked headers are live; we have exclusive access.
            cur = unsafe { (*cur).next };
        }
        if leaked > 0 {
            warn!(
                arena = self.name(),
                leaked,
                bytes = self.total_bytes(),
                "arena dropped with live tracked blocks; they will still free correctly but are no longer accounted"
            );
        }
    }
}

impl Arena {
    /// Creates an arena with the given name, truncated to 99 bytes.
    ///
    /// Truncation respects UTF-8 character boundaries.
    pub fn new(name: &str) -> Self {
        let mut buf = [0u8; NAME_BUF];
        let mut len = name.len().min(NAME_MAX);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            core: Arc::new(ArenaCore {
                name: buf,
                name_len: len,
                inner: Mutex::new(ArenaInner {
                    head: std::ptr::null_mut(),
                    tail: std::ptr::null_mut(),
                    reporter: None,
                }),
                total: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Shared core, for the substrate and the topology.
    pub(crate) fn core(&self) -> &Arc<ArenaCore> {
        &self.core
    }

    /// Arena name as given at construction (post truncation).
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// Attaches or clears the reporter receiving this arena's events.
    ///
    /// Must not be called concurrently with allocations that are expected to
    /// be observed by the new reporter.
    pub fn set_reporter(&self, reporter: Option<Arc<dyn Reporter>>) {
        self.core.inner.lock().reporter = reporter;
    }

    /// Hands out the next allocation id. Starts at 1, never repeats.
    pub fn next_id(&self) -> u64 {
        self.core.next_id()
    }

    /// Current id bookmark: the id the next allocation will receive.
    ///
    /// Bracket a region of interest with two bookmarks and hand them to
    /// [`report_range`](Self::report_range).
    pub fn bookmark(&self) -> u64 {
        self.core.next_id.load(Ordering::Relaxed)
    }

    /// Number of live tracked blocks. Walks the list under the lock, O(n).
    pub fn count(&self) -> usize {
        self.core.count()
    }

    /// Running byte total. Lock-free; may lag `count()` under concurrency.
    pub fn total_bytes(&self) -> usize {
        self.core.total_bytes()
    }

    /// Observational snapshot of the arena.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            name: self.name().to_owned(),
            live_blocks: self.count(),
            total_bytes: self.total_bytes(),
            next_alloc_id: self.bookmark(),
        }
    }

    /// Invokes the reporter's `report_block` for every live block whose
    /// allocation id falls in `[lo, hi]` (inclusive).
    ///
    /// Ids increase roughly in append order but are not guaranteed monotonic
    /// across the list under concurrent registration, so every node is
    /// inspected.
    pub fn report_range(&self, lo: u64, hi: u64) {
        let inner = self.core.inner.lock();
        let Some(reporter) = inner.reporter.as_ref() else {
            return;
        };
        let mut cur = inner.head;
        while !cur.is_null() {
            // SAFETY: linked headers are live; the list lock is held.
            unsafe {
                let id = (*cur).alloc_id;
                if (lo..=hi).contains(&id) {
                    reporter.report_block(&BlockReport::from_header(&self.core, cur));
                }
                cur = (*cur).next;
            }
        }
    }

    /// Invokes the reporter's `report_block` for every live block: the
    /// whole-arena leak report.
    pub fn report_all(&self) {
        self.report_range(1, u64::MAX);
    }

    /// Adds a one-directional edge from this arena to `other`.
    pub fn add_neighbour(&self, other: &Arena) {
        graph::add_edge(self, other);
    }

    /// Sum of `total_bytes()` over every arena reachable from this one,
    /// cycles included.
    pub fn hierarchical_total(&self) -> usize {
        graph::aggregate(self, ArenaCore::total_bytes)
    }

    /// Sum of `count()` over every arena reachable from this one, cycles
    /// included.
    pub fn hierarchical_count(&self) -> usize {
        graph::aggregate(self, ArenaCore::count)
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("name", &self.name())
            .field("total_bytes", &self.total_bytes())
            .field("next_alloc_id", &self.bookmark())
            .finish_non_exhaustive()
    }
}

/// Process-wide default arena, lazily constructed on first use.
///
/// Every allocation lacking an explicit arena is charged here. The singleton
/// lives for the remainder of the program; tests share it and may observe
/// state leaked into it by other tests.
pub fn default_arena() -> &'static Arena {
    static DEFAULT_ARENA: OnceLock<Arena> = OnceLock::new();
    // No logging here: this can run inside the global allocation path before
    // any subscriber machinery is usable. Tracking is suppressed while the
    // singleton's own core is allocated, which would otherwise re-enter this
    // initialization through the installed allocator adapter.
    DEFAULT_ARENA.get_or_init(|| {
        let _guard = crate::track::suppress_tracking();
        Arena::new(DEFAULT_ARENA_NAME)
    })
}

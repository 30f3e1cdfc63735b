//! Per-block allocation metadata.
//!
//! Every tracked block carries an [`AllocHeader`] immediately before the user
//! payload and a 4-byte footer sentinel immediately after it. The header
//! doubles as a node in the owning arena's intrusive tracking list, which
//! keeps the tracking path itself allocation-free. Constant-time recovery
//! from any user pointer is a fixed negative offset.
//!
//! Layout of a tracked block (default alignment):
//!
//! ```text
//! [ AllocHeader | payload (size bytes) | footer sentinel (4 bytes) ]
//!                ^ user pointer
//! ```
//!
//! Aligned blocks over-allocate `alignment` bytes of slack and round the user
//! pointer up, so the header sits at the same fixed offset before the user
//! pointer in both layouts. `original` records the raw pointer returned by
//! the underlying allocator; it is the only way to free an aligned block.

use std::mem::{align_of, size_of};
use std::ptr;
use std::sync::Weak;

use crate::arena::ArenaCore;
use crate::constants::signature::{ACTIVE, FOOTER, FREED};

/// Size of the footer sentinel in bytes.
pub(crate) const FOOTER_SIZE: usize = size_of::<u32>();

/// Metadata record placed immediately before every tracked payload.
///
/// The header is also the intrusive list node: `next`/`prev` are owned by the
/// arena's tracking list and only mutated under the arena list lock.
#[repr(C)]
pub struct AllocHeader {
    /// Owning arena; lookup only, never owning. A dead weak for untracked
    /// blocks (allocations made while the substrate is re-entered) and for
    /// blocks that outlived their arena.
    pub(crate) arena: Weak<ArenaCore>,
    /// Next node in the arena tracking list; null at the tail.
    pub(crate) next: *mut AllocHeader,
    /// Previous node in the arena tracking list; null at the head.
    pub(crate) prev: *mut AllocHeader,
    /// Raw pointer returned by the underlying allocator.
    pub(crate) original: *mut u8,
    /// Requested user bytes, clamped to at least 1.
    pub(crate) size: usize,
    /// Alignment used for the block; 0 for default-aligned blocks.
    pub(crate) align: usize,
    /// Monotonic id unique within the arena; 0 for untracked blocks.
    pub(crate) alloc_id: u64,
    /// Integrity tag: [`ACTIVE`], [`FREED`], or garbage for wild pointers.
    pub(crate) signature: u32,
}

// The user pointer on the default path is `raw + size_of::<AllocHeader>()`
// and must inherit the header's alignment.
const _: () = assert!(size_of::<AllocHeader>() % align_of::<AllocHeader>() == 0);

impl AllocHeader {
    /// Requested payload size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment used for the block; 0 means default-aligned.
    pub fn alignment(&self) -> usize {
        self.align
    }

    /// Monotonic allocation id within the owning arena; 0 if untracked.
    pub fn alloc_id(&self) -> u64 {
        self.alloc_id
    }

    /// Current integrity signature value.
    pub fn signature(&self) -> u32 {
        self.signature
    }

    /// Whether the block is live.
    pub fn is_active(&self) -> bool {
        self.signature == ACTIVE
    }

    /// Whether the block was already released.
    pub fn is_freed(&self) -> bool {
        self.signature == FREED
    }

    /// Whether the block was charged to an arena at allocation time.
    pub fn is_tracked(&self) -> bool {
        self.alloc_id != 0
    }

    /// Recovers the header location from a user pointer.
    ///
    /// # Safety
    /// `user` must point at the payload of a block laid out by this crate.
    pub(crate) unsafe fn from_user_ptr(user: *mut u8) -> *mut AllocHeader {
        // SAFETY: the header sits exactly one header-size before the payload
        // in both the default and the aligned layout.
        unsafe { user.cast::<AllocHeader>().sub(1) }
    }

    /// Returns the user pointer for a header.
    ///
    /// # Safety
    /// `header` must point at a header laid out by this crate.
    pub(crate) unsafe fn user_ptr(header: *const AllocHeader) -> *mut u8 {
        // SAFETY: payload begins immediately after the header.
        unsafe { header.add(1).cast::<u8>().cast_mut() }
    }
}

/// Writes the footer sentinel after a payload.
///
/// # Safety
/// `user..user + size + FOOTER_SIZE` must be writable.
pub(crate) unsafe fn write_footer(user: *mut u8, size: usize) {
    // SAFETY: the footer slot is unaligned by construction, so go through
    // write_unaligned; the caller guarantees the range is in-bounds.
    unsafe { ptr::write_unaligned(user.add(size).cast::<u32>(), FOOTER) }
}

/// Checks the footer sentinel after a payload.
///
/// # Safety
/// `user..user + size + FOOTER_SIZE` must be readable.
pub(crate) unsafe fn footer_intact(user: *const u8, size: usize) -> bool {
    // SAFETY: same bounds argument as `write_footer`.
    unsafe { ptr::read_unaligned(user.add(size).cast::<u32>()) == FOOTER }
}

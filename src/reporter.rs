//! Allocation event reporting.
//!
//! Arenas fan allocation lifecycle events out to an attached [`Reporter`].
//! The core invokes the three callbacks under the arena list lock; the
//! implementation behind them is unconstrained. Reporters must not allocate
//! from or release tracked blocks of the arena that is reporting, since its
//! list lock is held for the duration of the callback.

use crate::arena::ArenaCore;
use crate::header::AllocHeader;

/// Snapshot of one tracked block, handed to reporter callbacks.
#[derive(Debug, Clone, Copy)]
pub struct BlockReport<'a> {
    /// Name of the owning arena.
    pub arena_name: &'a str,
    /// Requested payload size in bytes.
    pub size: usize,
    /// Alignment used for the block; 0 for default-aligned blocks.
    pub alignment: usize,
    /// Monotonic allocation id within the arena.
    pub alloc_id: u64,
    /// Current integrity signature.
    pub signature: u32,
    /// User pointer of the block.
    pub address: *const u8,
    /// Running byte total of the arena at the time of the event.
    pub arena_total: usize,
}

impl<'a> BlockReport<'a> {
    /// Builds a report for `header`, charged against `arena`.
    ///
    /// # Safety
    /// `header` must point at a live header owned by `arena`.
    pub(crate) unsafe fn from_header(arena: &'a ArenaCore, header: *const AllocHeader) -> Self {
        // SAFETY: the caller guarantees the header is live; the user pointer
        // is a fixed offset from it.
        let (size, alignment, alloc_id, signature, address) = unsafe {
            let h = &*header;
            (
                h.size,
                h.align,
                h.alloc_id,
                h.signature,
                AllocHeader::user_ptr(header).cast_const(),
            )
        };
        Self {
            arena_name: arena.name(),
            size,
            alignment,
            alloc_id,
            signature,
            address,
            arena_total: arena.total_bytes(),
        }
    }
}

/// Receiver for allocation lifecycle events.
pub trait Reporter: Send + Sync {
    /// Called after a block is charged to the arena.
    fn on_alloc(&self, block: &BlockReport<'_>);

    /// Called before a block is released from the arena.
    fn on_dealloc(&self, block: &BlockReport<'_>);

    /// Called for each block visited by [`Arena::report_range`].
    ///
    /// [`Arena::report_range`]: crate::arena::Arena::report_range
    fn report_block(&self, block: &BlockReport<'_>);
}

/// Reporter that pretty-prints events to stdout.
///
/// Intended for example programs and manual leak hunts; production consumers
/// are expected to bring their own [`Reporter`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use memwarden::{Arena, ArenaBox, ConsoleReporter};
///
/// let arena = Arena::new("audio");
/// arena.set_reporter(Some(Arc::new(ConsoleReporter)));
/// let _sample = ArenaBox::new_in([0f32; 16], &arena); // prints ALLOC/FREE
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn on_alloc(&self, block: &BlockReport<'_>) {
        println!(
            "[memwarden] ALLOC arena={} id={} size={}B align={} total={}B",
            block.arena_name, block.alloc_id, block.size, block.alignment, block.arena_total,
        );
    }

    fn on_dealloc(&self, block: &BlockReport<'_>) {
        println!(
            "[memwarden] FREE  arena={} id={} size={}B align={} total={}B",
            block.arena_name, block.alloc_id, block.size, block.alignment, block.arena_total,
        );
    }

    fn report_block(&self, block: &BlockReport<'_>) {
        println!("---------------------------------");
        println!("Arena:         {}", block.arena_name);
        println!("Allocation id: {}", block.alloc_id);
        println!("Signature:     {:#010X}", block.signature);
        println!("User size:     {} bytes (align {})", block.size, block.alignment);
        println!("Address:       {:p}", block.address);
        println!("Arena total:   {} bytes", block.arena_total);
        println!("---------------------------------");
    }
}

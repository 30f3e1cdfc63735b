//! Typed owning pointers over the tracked substrate.
//!
//! [`ArenaBox`] is the safe seam for routing a value's heap storage to a
//! chosen arena: allocation goes through the tracked entry points (so the
//! block carries a header, sentinels, and arena statistics), and `Drop`
//! destroys the value and releases the block. The borrow of the arena makes
//! "the arena outlives its blocks" a compile-time fact.

use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::arena::{default_arena, Arena};
use crate::header::AllocHeader;
use crate::track;

/// Owning pointer to a `T` allocated from a specific arena.
///
/// Types with an alignment beyond the header's own (for example
/// `#[repr(align(128))]` wrappers) are routed to the aligned block layout
/// automatically.
///
/// # Example
///
/// ```
/// use memwarden::{Arena, ArenaBox};
///
/// let arena = Arena::new("samples");
/// let value = ArenaBox::new_in(3u64, &arena);
/// assert_eq!(arena.total_bytes(), 8);
/// drop(value);
/// assert_eq!(arena.total_bytes(), 0);
/// ```
pub struct ArenaBox<'a, T> {
    ptr: NonNull<T>,
    _arena: PhantomData<&'a Arena>,
}

// SAFETY: ArenaBox owns its T exclusively; sending it sends the T.
unsafe impl<T: Send> Send for ArenaBox<'_, T> {}
// SAFETY: shared access to ArenaBox only exposes &T.
unsafe impl<T: Sync> Sync for ArenaBox<'_, T> {}

/// Alignment request for `T`: 0 keeps the default block layout, anything
/// beyond the header's own alignment takes the aligned layout.
fn alignment_request<T>() -> usize {
    let align = align_of::<T>();
    if align > align_of::<AllocHeader>() {
        align
    } else {
        0
    }
}

impl<'a, T> ArenaBox<'a, T> {
    /// Allocates `value` from `arena`.
    pub fn new_in(value: T, arena: &'a Arena) -> Self {
        let align = alignment_request::<T>();
        // SAFETY: the block is released exactly once, in Drop.
        let raw = unsafe {
            if align == 0 {
                track::allocate_in(size_of::<T>(), arena)
            } else {
                track::allocate_aligned_in(size_of::<T>(), align, arena)
            }
        };
        // SAFETY: the throwing allocation path never returns null.
        unsafe { Self::write_into(raw, value) }
    }

    /// Takes ownership of a freshly allocated block and moves `value` in.
    ///
    /// # Safety
    /// `raw` must be a non-null user pointer from the tracked substrate,
    /// sized and aligned for `T`, not yet initialized or owned elsewhere.
    unsafe fn write_into(raw: *mut u8, value: T) -> Self {
        let ptr = raw.cast::<T>();
        // SAFETY: freshly allocated, properly aligned for T, and large
        // enough for T (zero-sized T writes are no-ops).
        unsafe { ptr.write(value) };
        Self {
            // SAFETY: per the contract, `raw` is non-null.
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            _arena: PhantomData,
        }
    }

    /// Raw pointer to the value. The block stays owned by the box.
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }
}

impl<T> ArenaBox<'static, T> {
    /// Allocates `value` from the process-wide default arena.
    pub fn new(value: T) -> Self {
        Self::new_in(value, default_arena())
    }
}

impl<T: 'static> ArenaBox<'static, T> {
    /// Allocates `value` from the arena bound to `T` (see
    /// [`bind_arena`](crate::bind_arena)), falling back to the default arena
    /// when no live binding exists.
    ///
    /// The box carries no borrow: if the bound arena dies while the box is
    /// alive, the block simply frees without statistics on drop.
    pub fn new_bound(value: T) -> Self {
        match crate::bound::bound_core::<T>() {
            Some(core) => {
                // SAFETY: the block is released exactly once, in Drop.
                let raw = unsafe {
                    track::allocate_with_core(size_of::<T>(), alignment_request::<T>(), &core)
                };
                // SAFETY: the throwing allocation path never returns null.
                unsafe { Self::write_into(raw, value) }
            }
            None => Self::new(value),
        }
    }
}

impl<T> Deref for ArenaBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the box owns a live, initialized T.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for ArenaBox<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: exclusive borrow of the box gives exclusive access to T.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for ArenaBox<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the value is live and the block came from the tracked
        // substrate; both are consumed exactly once here.
        unsafe {
            std::ptr::drop_in_place(self.ptr.as_ptr());
            track::deallocate(self.ptr.as_ptr().cast());
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ArenaBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

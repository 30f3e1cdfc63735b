//! Core constants for the memwarden instrumentation library.
//!
//! Centralizes the integrity tag values and sizing constants so the rest of
//! the crate never carries magic numbers. The signature values are fixed for
//! compatibility with existing trace tooling and must not change.

/// Block integrity signatures.
pub mod signature {
    /// Signature of a live tracked block.
    pub const ACTIVE: u32 = 0xDEAD_C0DE;

    /// Signature written immediately before the underlying free.
    ///
    /// Seeing this value at delete time means the block was already freed.
    pub const FREED: u32 = 0x0FED_C0DE;

    /// Footer sentinel placed immediately after the user payload.
    ///
    /// A mismatch at delete time means something wrote past the end of the
    /// block.
    pub const FOOTER: u32 = 0x0EED_C0DE;
}

/// Memory layout constants.
pub mod memory {
    /// CPU cache line size (64 bytes for `x86_64`)
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Kilobyte in bytes
    pub const KB: usize = 1024;

    /// Megabyte in bytes
    pub const MB: usize = 1024 * 1024;
}

/// Arena configuration constants.
pub mod arena {
    /// Maximum arena name length in bytes; longer names are truncated.
    pub const NAME_MAX: usize = 99;

    /// Size of the inline name buffer (name plus headroom).
    pub const NAME_BUF: usize = NAME_MAX + 1;

    /// Name of the process-wide default arena.
    pub const DEFAULT_ARENA_NAME: &str = "default";
}

/// Pool sizing constants.
pub mod pool {
    /// Smallest physical ring capacity (one usable slot plus the wasted one).
    pub const MIN_QUEUE_SIZE: usize = 2;
}

//! Error types for fallible construction paths.
//!
//! Memory-safety violations (bad signature, double free, footer corruption,
//! invalid alignment) are bugs, not runtime conditions, and abort via
//! assertion instead of surfacing here. `MemError` covers the cases a caller
//! can reasonably recover from: resource exhaustion and invalid sizing
//! parameters on the nothrow paths.

use thiserror::Error;

/// Errors produced by the fallible construction paths.
#[derive(Debug, Error)]
pub enum MemError {
    /// The underlying allocator could not satisfy a buffer allocation.
    #[error("buffer allocation of {size} bytes (align {align}) failed")]
    BufferInit {
        /// Requested payload size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A size/alignment pair does not form a representable layout.
    #[error("invalid layout: {size} bytes with alignment {align}")]
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A ring pool failed to pre-construct its buffers in full mode.
    #[error("ring pool initialization failed after {constructed} of {wanted} buffers")]
    PoolInit {
        /// Buffers successfully constructed before the failure.
        constructed: usize,
        /// Buffers the pool needed (usable capacity).
        wanted: usize,
    },
}

//! Debug-oriented memory instrumentation and pooling.
//!
//! memwarden categorises every heap allocation into a named [`Arena`] with
//! live statistics, leak detection, and graph-aggregated reporting, and
//! provides a family of lock-free single-producer / single-consumer buffer
//! pools built above that substrate:
//!
//! - **Tracked substrate** ([`track`]): every block carries a metadata
//!   header, an integrity signature, and a footer sentinel; double frees,
//!   wild frees, and heap overruns are caught at release time. A
//!   [`GlobalAlloc`](std::alloc::GlobalAlloc) adapter
//!   ([`TrackedAllocator`]) routes the whole process through the substrate.
//! - **Arenas** ([`arena`]): named accounting units owning an intrusive list
//!   of live blocks, a running byte total, and monotonic allocation ids,
//!   with reporter fan-out ([`reporter`]).
//! - **Arena graph** ([`graph`]): directed adjacency between arenas with
//!   cycle-safe hierarchical aggregation.
//! - **Pools** ([`pool`]): [`Buffer`] storage wrappers, the waste-one-slot
//!   [`RingPool`], and the growable [`PoolChain`].
//!
//! # Example
//!
//! ```
//! use memwarden::{Arena, ArenaBox};
//!
//! let textures = Arena::new("textures");
//! let pixel = ArenaBox::new_in(0xFF00FFu32, &textures);
//! assert_eq!(textures.count(), 1);
//! assert_eq!(textures.total_bytes(), 4);
//! drop(pixel);
//! assert_eq!(textures.count(), 0);
//! ```
//!
//! The tracked fast path takes exactly one arena list lock; ring pool and
//! chain operations take no locks at all. The hierarchical queries take a
//! single process-wide topology lock and are intended for diagnostics, not
//! hot paths.

pub mod arena;
pub mod bound;
pub mod boxed;
pub mod constants;
pub mod error;
pub mod graph;
pub mod header;
pub mod pool;
pub mod reporter;
pub mod track;

pub use arena::{default_arena, Arena, ArenaStats};
pub use bound::{bind_arena, unbind_arena};
pub use boxed::ArenaBox;
pub use error::MemError;
pub use graph::connect;
pub use header::AllocHeader;
pub use pool::{Buffer, PoolChain, RingPool};
pub use reporter::{BlockReport, ConsoleReporter, Reporter};
pub use track::{memory_stats, MemoryStats, TrackedAllocator};

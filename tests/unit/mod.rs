//! Unit suites for the memwarden subsystems.

pub mod bound_tests; // Per-type arena binding and rebinding
pub mod chain_tests; // Pool chain growth, cross-pool cleanup, concurrency
pub mod ring_tests; // SPSC ring invariants and thread ordering
pub mod track_tests; // Substrate layouts, sentinels, failure detection

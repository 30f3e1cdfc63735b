//! Directed arena topology and hierarchical aggregation.
//!
//! Arenas form a directed graph: an edge from `a` to `b` means `b`'s
//! statistics are folded into `a`'s hierarchical queries. Cycles are
//! permitted (and produced by the bidirectional [`connect`]); traversal
//! tolerates them with a visited set.
//!
//! The whole topology lives in one process-wide registry behind a single
//! lock. That is deliberate: the graph operations are diagnostic-only, never
//! on an allocation hot path, and one lock gives a trivially consistent
//! snapshot. The topology lock ranks strictly above the per-arena list
//! locks — traversal takes the topology lock and then each visited arena's
//! list lock in turn, never two list locks at once.
//!
//! Edges hold weak references to the arena cores, so a neighbour that has
//! been dropped is simply skipped; a core additionally scrubs itself from
//! the registry when it drops.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::arena::{Arena, ArenaCore};

/// Adjacency lists keyed by arena core address.
type Topology = FxHashMap<usize, Vec<Weak<ArenaCore>>>;

fn topology() -> &'static Mutex<Topology> {
    static TOPOLOGY: OnceLock<Mutex<Topology>> = OnceLock::new();
    TOPOLOGY.get_or_init(|| Mutex::new(FxHashMap::default()))
}

fn key(core: &ArenaCore) -> usize {
    std::ptr::from_ref(core) as usize
}

/// Records a one-directional edge `from -> to`.
pub(crate) fn add_edge(from: &Arena, to: &Arena) {
    let mut topo = topology().lock();
    topo.entry(key(from.core()))
        .or_default()
        .push(Arc::downgrade(to.core()));
}

/// Connects two arenas in both directions.
pub fn connect(a: &Arena, b: &Arena) {
    a.add_neighbour(b);
    b.add_neighbour(a);
}

/// Folds `per_node` over every arena reachable from `start`, cycles
/// included, under the topology lock. Dropped neighbours are skipped.
pub(crate) fn aggregate(start: &Arena, per_node: fn(&ArenaCore) -> usize) -> usize {
    // Upgraded cores are parked here and released only after the topology
    // lock is gone: dropping the last strong reference runs the core's
    // detach, which takes the topology lock itself.
    let mut upgraded: Vec<Arc<ArenaCore>> = Vec::new();
    let topo = topology().lock();
    let mut visited = FxHashSet::default();
    let start_core = start.core();
    visited.insert(key(start_core));
    let mut sum = per_node(start_core);
    let mut stack: Vec<Weak<ArenaCore>> = topo.get(&key(start_core)).cloned().unwrap_or_default();
    while let Some(weak) = stack.pop() {
        let Some(core) = weak.upgrade() else {
            continue;
        };
        let node = key(&core);
        if visited.insert(node) {
            sum += per_node(&core);
            if let Some(neighbours) = topo.get(&node) {
                stack.extend(neighbours.iter().cloned());
            }
        }
        upgraded.push(core);
    }
    drop(topo);
    drop(upgraded);
    sum
}

/// Removes a dropping core from the topology: its own adjacency entry and
/// every edge pointing at it.
pub(crate) fn detach(gone: usize) {
    let mut topo = topology().lock();
    topo.remove(&gone);
    for neighbours in topo.values_mut() {
        neighbours.retain(|weak| weak.as_ptr() as usize != gone);
    }
}

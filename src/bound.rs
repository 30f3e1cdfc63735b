//! Per-type default arena binding.
//!
//! Routes a type's boxed allocations to a configurable arena without passing
//! the arena at every call site: bind once, then use
//! [`ArenaBox::new_bound`](crate::ArenaBox::new_bound). Unbound types fall
//! back to the process-wide default arena.
//!
//! Bindings hold weak references, so a binding whose arena has been dropped
//! behaves exactly like an unbound type. Rebinding a type between an
//! allocation and its release is fine: deletion always finds the block's
//! birth arena through its header, never through the binding table.
//!
//! # Example
//!
//! ```
//! use memwarden::{bind_arena, Arena, ArenaBox};
//!
//! struct Particle {
//!     _position: [f32; 3],
//! }
//!
//! let effects = Arena::new("effects");
//! bind_arena::<Particle>(&effects);
//!
//! let p = ArenaBox::new_bound(Particle { _position: [0.0; 3] });
//! assert_eq!(effects.count(), 1);
//! drop(p);
//! assert_eq!(effects.count(), 0);
//! ```

use std::any::TypeId;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::arena::{Arena, ArenaCore};

type Bindings = FxHashMap<TypeId, Weak<ArenaCore>>;

fn bindings() -> &'static Mutex<Bindings> {
    static BINDINGS: OnceLock<Mutex<Bindings>> = OnceLock::new();
    BINDINGS.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// Binds `T`'s future [`ArenaBox::new_bound`](crate::ArenaBox::new_bound)
/// allocations to `arena`. Replaces any previous binding for `T`.
pub fn bind_arena<T: 'static>(arena: &Arena) {
    bindings()
        .lock()
        .insert(TypeId::of::<T>(), Arc::downgrade(arena.core()));
}

/// Removes `T`'s binding. Returns whether one existed. Subsequent bound
/// allocations fall back to the default arena.
pub fn unbind_arena<T: 'static>() -> bool {
    bindings().lock().remove(&TypeId::of::<T>()).is_some()
}

/// Resolves `T`'s bound arena core, if the binding exists and its arena is
/// still alive.
pub(crate) fn bound_core<T: 'static>() -> Option<Arc<ArenaCore>> {
    bindings()
        .lock()
        .get(&TypeId::of::<T>())
        .and_then(Weak::upgrade)
}

//! Per-type arena binding tests.

use memwarden::{bind_arena, unbind_arena, Arena, ArenaBox};
use rstest::*;

#[rstest]
fn bound_allocations_charge_the_bound_arena() {
    crate::init_test_env();
    struct Particle([f32; 4]);

    let effects = Arena::new("bound-effects");
    bind_arena::<Particle>(&effects);

    let a = ArenaBox::new_bound(Particle([0.0; 4]));
    let b = ArenaBox::new_bound(Particle([1.0; 4]));
    assert_eq!(effects.count(), 2);
    assert_eq!(effects.total_bytes(), 32);

    drop(a);
    drop(b);
    assert_eq!(effects.count(), 0);
    assert_eq!(effects.total_bytes(), 0);
    assert!(unbind_arena::<Particle>());
}

#[rstest]
fn rebinding_between_alloc_and_free_finds_the_birth_arena() {
    crate::init_test_env();
    struct Projectile(u64);

    let first = Arena::new("bound-first");
    let second = Arena::new("bound-second");

    bind_arena::<Projectile>(&first);
    let shot = ArenaBox::new_bound(Projectile(1));
    assert_eq!(first.count(), 1);

    // Rebind while the allocation is still live: the release must route to
    // the block's birth arena, not the current binding.
    bind_arena::<Projectile>(&second);
    drop(shot);
    assert_eq!(first.count(), 0);
    assert_eq!(second.count(), 0);

    let next = ArenaBox::new_bound(Projectile(2));
    assert_eq!(second.count(), 1);
    drop(next);
    assert!(unbind_arena::<Projectile>());
}

#[rstest]
fn dead_or_missing_binding_falls_back_to_default() {
    crate::init_test_env();
    struct Orphan(u8);

    {
        let short_lived = Arena::new("bound-gone");
        bind_arena::<Orphan>(&short_lived);
    }
    // The bound arena is gone: allocation silently uses the default arena
    // and releases cleanly.
    let orphan = ArenaBox::new_bound(Orphan(9));
    assert_eq!(orphan.0, 9);
    drop(orphan);
    assert!(unbind_arena::<Orphan>());

    // Never-bound types behave identically.
    struct Free(u8);
    let free = ArenaBox::new_bound(Free(3));
    assert_eq!(free.0, 3);
}

//! Cross-allocator scenarios through the `Memory` facade.

use fixedmem::{CacheUser, Memory, MemoryConfig, MemoryError};

fn kb(n: usize) -> usize {
    n * 1024
}

fn small() -> Memory {
    Memory::new(
        MemoryConfig::new()
            .with_arena_size(kb(64))
            .with_zone_size(kb(4)),
    )
    .unwrap()
}

#[test]
fn zone_survives_alloc_free_storm() {
    let mut mem = small();
    let mut live = Vec::new();

    for round in 0..8 {
        for i in 0..10 {
            let p = mem.zone_alloc(16 + (round * 10 + i) % 90).unwrap();
            live.push(p);
        }
        // Free every other allocation to fragment the heap.
        let mut i = 0;
        live.retain(|&p| {
            i += 1;
            if i % 2 == 0 {
                mem.zone_free(p).unwrap();
                false
            } else {
                true
            }
        });
        mem.zone_check().unwrap();
    }

    for p in live {
        mem.zone_free(p).unwrap();
    }
    mem.zone_check().unwrap();
}

#[test]
fn hunk_mark_rollback_across_phases() {
    let mut mem = small();
    let base = mem.hunk_low_mark();

    // "Load a level": a burst of named allocations.
    let geometry = mem.hunk_alloc_low(kb(8), "geometry").unwrap();
    mem.data_mut(geometry, kb(8)).fill(0x77);
    mem.hunk_alloc_low(kb(2), "entities").unwrap();
    mem.hunk_alloc_low(kb(1), "lightmaps").unwrap();
    mem.hunk_check().unwrap();

    let listing = mem.hunk_print(true).unwrap();
    assert!(listing.contains("geometry"));
    assert!(listing.contains("entities"));

    // "Change level": one call undoes the whole burst.
    mem.hunk_free_to_low_mark(base).unwrap();
    assert_eq!(mem.hunk_low_mark(), base);

    // Rolled-back space comes back zeroed.
    let again = mem.hunk_alloc_low(kb(8), "geometry").unwrap();
    assert!(mem.data(again, kb(8)).iter().all(|&b| b == 0));
}

#[test]
fn temp_alloc_is_singular() {
    let mut mem = small();
    let t1 = mem.hunk_temp_alloc(kb(2)).unwrap().unwrap();
    mem.data_mut(t1, kb(2)).fill(0xff);
    let t2 = mem.hunk_temp_alloc(kb(2)).unwrap().unwrap();
    assert_eq!(t1, t2);
    assert!(mem.data(t2, kb(2)).iter().all(|&b| b == 0));
    mem.hunk_check().unwrap();
}

#[test]
fn high_alloc_failure_is_recoverable() {
    let mut mem = small();
    // Far larger than the arena: must report None, not corrupt state.
    assert_eq!(mem.hunk_alloc_high(kb(256), "huge").unwrap(), None);
    let used = mem.stats().hunk_high_used;
    assert_eq!(used, 0);
    // Normal allocations still work afterwards.
    assert!(mem.hunk_alloc_high(kb(2), "sky").unwrap().is_some());
    mem.hunk_check().unwrap();
}

#[test]
fn cache_yields_to_both_hunk_ends() {
    let mut mem = small();
    let mut users: Vec<CacheUser> = Vec::new();
    for i in 0..6 {
        let mut user = CacheUser::new();
        let p = mem
            .cache_alloc(&mut user, kb(4), &format!("asset{i}"))
            .unwrap();
        mem.data_mut(p, kb(4)).fill(i as u8 + 1);
        users.push(user);
    }

    mem.hunk_alloc_low(kb(8), "level").unwrap();
    mem.hunk_alloc_high(kb(8), "video").unwrap().unwrap();
    mem.hunk_check().unwrap();

    // Survivors kept their bytes and sit inside the shrunken gap.
    let low = mem.stats().hunk_low_used;
    let high_start = mem.arena_size() - mem.stats().hunk_high_used;
    for (i, user) in users.iter().enumerate() {
        if let Some(p) = mem.cache_check(user) {
            assert!(p >= low && p + kb(4) <= high_start);
            assert!(mem.data(p, kb(4)).iter().all(|&b| b == i as u8 + 1));
        }
    }
}

#[test]
fn cache_eviction_frees_room_for_new_entries() {
    let mut mem = small();
    let mut users: Vec<CacheUser> = Vec::new();
    // Far more entries than fit at once; old ones get evicted.
    for i in 0..32 {
        let mut user = CacheUser::new();
        mem.cache_alloc(&mut user, kb(8), &format!("gen{i}"))
            .unwrap();
        users.push(user);
    }
    // The most recent entry is always resident; the oldest is long gone.
    assert!(mem.cache_check(users.last().unwrap()).is_some());
    assert_eq!(mem.cache_check(&users[0]), None);
}

#[test]
fn flush_then_reuse() {
    let mut mem = small();
    let mut user = CacheUser::new();
    mem.cache_alloc(&mut user, kb(4), "a").unwrap();
    mem.cache_flush();
    assert_eq!(mem.cache_check(&user), None);

    let mut fresh = CacheUser::new();
    assert!(mem.cache_alloc(&mut fresh, kb(4), "b").is_ok());
}

#[test]
fn fatal_errors_are_values_not_aborts() {
    let mut mem = small();
    let p = mem.zone_alloc(40).unwrap();
    mem.zone_free(p).unwrap();
    // Double free reports an error and leaves the subsystem usable.
    assert!(matches!(
        mem.zone_free(p),
        Err(MemoryError::ZoneDoubleFree { .. })
    ));
    mem.zone_check().unwrap();
    assert!(mem.zone_alloc(40).is_ok());
}

#[test]
fn stats_display_is_stable() {
    let mem = small();
    let text = mem.stats().to_string();
    assert!(text.contains("arena"));
    assert!(text.contains("hunk"));
    assert!(text.contains("cache"));
}

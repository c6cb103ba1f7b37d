//! Property tests: the zone heap stays consistent under arbitrary
//! allocate/free interleavings.

use proptest::prelude::*;

use fixedmem::{Arena, MemoryError, Zone};

const REGION: usize = 16 * 1024;

#[derive(Clone, Debug)]
enum Op {
    Alloc(usize),
    Free(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..512).prop_map(Op::Alloc),
        (0usize..64).prop_map(Op::Free),
    ]
}

proptest! {
    #[test]
    fn heap_stays_consistent(ops in proptest::collection::vec(op_strategy(), 1..100)) {
        let mut arena = Arena::new(REGION + 64);
        let mut zone = Zone::init(&mut arena, 0, REGION);
        let mut live: Vec<usize> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(size) => {
                    match zone.alloc(&mut arena, size, 1) {
                        Ok(Some(p)) => {
                            // Scribble the payload; headers must survive.
                            arena.bytes_mut(p..p + size).fill(0xcd);
                            live.push(p);
                        }
                        Ok(None) => {} // full, recoverable
                        Err(e) => return Err(TestCaseError::fail(format!("alloc: {e}"))),
                    }
                }
                Op::Free(pick) => {
                    if !live.is_empty() {
                        let p = live.swap_remove(pick % live.len());
                        zone.free(&mut arena, p)
                            .map_err(|e| TestCaseError::fail(format!("free: {e}")))?;
                    }
                }
            }
            zone.check_heap(&arena)
                .map_err(|e| TestCaseError::fail(format!("check: {e}")))?;
        }

        // Draining everything leaves one free block and full capacity.
        for p in live.drain(..) {
            zone.free(&mut arena, p).unwrap();
        }
        zone.check_heap(&arena).unwrap();
        prop_assert_eq!(zone.block_count(), 1);
    }

    #[test]
    fn freed_memory_is_reusable(sizes in proptest::collection::vec(1usize..256, 1..20)) {
        let mut arena = Arena::new(REGION + 64);
        let mut zone = Zone::init(&mut arena, 0, REGION);

        let free_before = zone.free_bytes();
        let mut live = Vec::new();
        for size in &sizes {
            if let Some(p) = zone.alloc(&mut arena, *size, 1).unwrap() {
                live.push(p);
            }
        }
        for p in live {
            zone.free(&mut arena, p).unwrap();
        }
        // Coalescing restores every byte.
        prop_assert_eq!(zone.free_bytes(), free_before);
    }

    #[test]
    fn payloads_never_overlap(sizes in proptest::collection::vec(1usize..400, 2..16)) {
        let mut arena = Arena::new(REGION + 64);
        let mut zone = Zone::init(&mut arena, 0, REGION);

        let mut spans: Vec<(usize, usize)> = Vec::new();
        for size in &sizes {
            if let Some(p) = zone.alloc(&mut arena, *size, 1).unwrap() {
                spans.push((p, p + size));
            }
        }
        spans.sort_unstable();
        for pair in spans.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0, "overlapping payloads: {:?}", pair);
        }
    }
}

#[test]
fn zero_tag_rejected() {
    let mut arena = Arena::new(REGION + 64);
    let mut zone = Zone::init(&mut arena, 0, REGION);
    assert_eq!(
        zone.alloc(&mut arena, 16, 0),
        Err(MemoryError::ZoneZeroTag)
    );
}

//! Zone allocator: variable-size blocks with free-list coalescing.
//!
//! The zone serves small, frequent, freely-ordered allocations (strings,
//! structures); big things go on the hunk. There is never any space between
//! blocks, and there are never two contiguous free blocks: frees coalesce
//! immediately, so any free block is maximal and a first-fit rover scan is
//! also "first sufficiently large free run".
//!
//! Block accounting lives in a slot arena of index-linked records with one
//! sentinel slot that never holds data. Each live block additionally keeps
//! an in-band identity header and 4 trailing guard bytes inside the arena,
//! so pointer mixups and out-of-bounds scribbles stay detectable.

use crate::arena::Arena;
use crate::error::MemoryError;
use crate::util::align_up;

/// Identity marker stamped into block headers and trailing guards.
pub const ZONE_ID: u32 = 0x001d_4a11;

/// A free surplus at or below this many bytes is left attached to the
/// allocated block instead of becoming a tiny orphan fragment.
pub const MIN_FRAGMENT: usize = 64;

/// In-band header: identity marker + owning slot index.
const BLOCK_HEADER: usize = 8;
/// Trailing memory-trash tester, written with [`ZONE_ID`].
const GUARD_BYTES: usize = 4;
/// Word alignment applied to every block size.
const BLOCK_ALIGN: usize = 8;

/// Slot index of the list sentinel.
const SENTINEL: u32 = 0;

#[derive(Clone, Copy, Debug)]
struct MemBlock {
    /// Block start (header included) within the arena.
    offset: usize,
    /// Block size, header and guard included.
    size: usize,
    /// 0 = free; any other value means in use.
    tag: u32,
    prev: u32,
    next: u32,
}

/// Free-list allocator over a fixed sub-region of the arena.
pub struct Zone {
    start: usize,
    size: usize,
    blocks: Vec<MemBlock>,
    free_slots: Vec<u32>,
    /// Next scan start. An optimization only; may point at any live block.
    rover: u32,
}

impl Zone {
    /// Format `region_size` bytes at `start` as one maximal free block.
    pub fn init(arena: &mut Arena, start: usize, region_size: usize) -> Self {
        let sentinel = MemBlock {
            offset: start + region_size,
            size: 0,
            // The sentinel reads as in-use so scans and coalescing skip it.
            tag: 1,
            prev: 1,
            next: 1,
        };
        let free = MemBlock {
            offset: start,
            size: region_size,
            tag: 0,
            prev: SENTINEL,
            next: SENTINEL,
        };
        let mut zone = Self {
            start,
            size: region_size,
            blocks: vec![sentinel, free],
            free_slots: Vec::new(),
            rover: 1,
        };
        zone.write_block_header(arena, 1);
        zone
    }

    /// Allocate `size` bytes under a nonzero tag.
    ///
    /// Returns the payload offset, or `Ok(None)` when no free block of
    /// sufficient size exists after a full wrap of the list. A zero tag is
    /// a fatal error: 0 is reserved for "free".
    pub fn alloc(
        &mut self,
        arena: &mut Arena,
        size: usize,
        tag: u32,
    ) -> Result<Option<usize>, MemoryError> {
        if tag == 0 {
            return Err(MemoryError::ZoneZeroTag);
        }

        // Account for the header, the trailing trash tester, and alignment.
        let needed = align_up(size + BLOCK_HEADER + GUARD_BYTES, BLOCK_ALIGN);

        // First-fit scan from the rover, wrapping around the circular list.
        let mut base = self.rover;
        let mut rover = self.rover;
        let stop = self.block(base).prev;

        loop {
            if rover == stop {
                // Scanned all the way around the list.
                return Ok(None);
            }
            if self.block(rover).tag != 0 {
                rover = self.block(rover).next;
                base = rover;
            } else {
                rover = self.block(rover).next;
            }
            if self.block(base).tag == 0 && self.block(base).size >= needed {
                break;
            }
        }

        // Split off the surplus unless it would orphan a tiny fragment.
        let extra = self.block(base).size - needed;
        if extra > MIN_FRAGMENT {
            let after = self.block(base).next;
            let frag_offset = self.block(base).offset + needed;
            let frag = self.new_slot(MemBlock {
                offset: frag_offset,
                size: extra,
                tag: 0,
                prev: base,
                next: after,
            });
            self.block_mut(after).prev = frag;
            self.block_mut(base).next = frag;
            self.block_mut(base).size = needed;
            self.write_block_header(arena, frag);
        }

        self.block_mut(base).tag = tag;
        // Next allocation will start looking here.
        self.rover = self.block(base).next;

        self.write_block_header(arena, base);
        let (offset, block_size) = {
            let b = self.block(base);
            (b.offset, b.size)
        };
        arena.write_u32(offset + block_size - GUARD_BYTES, ZONE_ID);

        Ok(Some(offset + BLOCK_HEADER))
    }

    /// Allocate `size` zero-filled bytes; exhaustion is fatal.
    ///
    /// Runs a full heap-consistency check first, as every must-succeed
    /// allocation site historically did.
    pub fn alloc_zeroed(&mut self, arena: &mut Arena, size: usize) -> Result<usize, MemoryError> {
        self.check_heap(arena)?;
        let payload = self
            .alloc(arena, size, 1)?
            .ok_or(MemoryError::ZoneExhausted { requested: size })?;
        arena.zero(payload..payload + size);
        Ok(payload)
    }

    /// Free the block whose payload starts at `payload`.
    ///
    /// Fatal if the offset was not produced by this zone, if the block's
    /// identity marker or trailing guard has been clobbered, or if the block
    /// is already free. Coalesces with free neighbors immediately.
    pub fn free(&mut self, arena: &mut Arena, payload: usize) -> Result<(), MemoryError> {
        if payload < self.start + BLOCK_HEADER || payload >= self.start + self.size {
            return Err(MemoryError::ZoneBadPointer { offset: payload });
        }
        let offset = payload - BLOCK_HEADER;
        if arena.read_u32(offset) != ZONE_ID {
            return Err(MemoryError::ZoneBadPointer { offset: payload });
        }
        let slot = arena.read_u32(offset + 4);
        if slot as usize >= self.blocks.len()
            || slot == SENTINEL
            || self.block(slot).offset != offset
        {
            return Err(MemoryError::ZoneBadPointer { offset: payload });
        }
        if self.block(slot).tag == 0 {
            return Err(MemoryError::ZoneDoubleFree { offset: payload });
        }
        let size = self.block(slot).size;
        if arena.read_u32(offset + size - GUARD_BYTES) != ZONE_ID {
            return Err(MemoryError::ZoneCorrupt {
                detail: "trailing guard clobbered",
            });
        }

        self.block_mut(slot).tag = 0;
        let mut block = slot;

        // Merge with a free predecessor.
        let prev = self.block(block).prev;
        if self.block(prev).tag == 0 {
            let next = self.block(block).next;
            self.block_mut(prev).size += self.block(block).size;
            self.block_mut(prev).next = next;
            self.block_mut(next).prev = prev;
            if block == self.rover {
                self.rover = prev;
            }
            self.release_slot(block);
            block = prev;
        }

        // Merge a free successor onto the end.
        let next = self.block(block).next;
        if self.block(next).tag == 0 {
            let after = self.block(next).next;
            self.block_mut(block).size += self.block(next).size;
            self.block_mut(block).next = after;
            self.block_mut(after).prev = block;
            if next == self.rover {
                self.rover = block;
            }
            self.release_slot(next);
        }

        // The merged span may still hold stale markers; refresh the
        // survivor's header so a later scan sees consistent bytes.
        self.write_block_header(arena, block);
        Ok(())
    }

    /// Walk the list once, verifying every consistency invariant.
    pub fn check_heap(&self, arena: &Arena) -> Result<(), MemoryError> {
        let mut slot = self.block(SENTINEL).next;
        while slot != SENTINEL {
            let block = self.block(slot);
            let next = block.next;
            if next != SENTINEL {
                let nb = self.block(next);
                if block.offset + block.size != nb.offset {
                    return Err(MemoryError::ZoneCorrupt {
                        detail: "block size does not touch the next block",
                    });
                }
                if nb.prev != slot {
                    return Err(MemoryError::ZoneCorrupt {
                        detail: "next block does not have a proper back link",
                    });
                }
                if block.tag == 0 && nb.tag == 0 {
                    return Err(MemoryError::ZoneCorrupt {
                        detail: "two consecutive free blocks",
                    });
                }
            }
            if block.tag != 0 {
                if arena.read_u32(block.offset) != ZONE_ID
                    || arena.read_u32(block.offset + 4) != slot
                {
                    return Err(MemoryError::ZoneCorrupt {
                        detail: "block identity marker clobbered",
                    });
                }
                if arena.read_u32(block.offset + block.size - GUARD_BYTES) != ZONE_ID {
                    return Err(MemoryError::ZoneCorrupt {
                        detail: "trailing guard clobbered",
                    });
                }
            }
            slot = next;
        }
        Ok(())
    }

    /// Block-by-block listing with consistency annotations.
    pub fn print(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "zone size: {}  start: {}", self.size, self.start);
        let mut slot = self.block(SENTINEL).next;
        while slot != SENTINEL {
            let block = self.block(slot);
            let _ = writeln!(
                out,
                "block:{:8}    size:{:7}    tag:{:3}",
                block.offset, block.size, block.tag
            );
            let next = block.next;
            if next != SENTINEL {
                let nb = self.block(next);
                if block.offset + block.size != nb.offset {
                    let _ = writeln!(out, "ERROR: block size does not touch the next block");
                }
                if nb.prev != slot {
                    let _ = writeln!(out, "ERROR: next block does not have a proper back link");
                }
                if block.tag == 0 && nb.tag == 0 {
                    let _ = writeln!(out, "ERROR: two consecutive free blocks");
                }
            }
            slot = next;
        }
        out
    }

    /// Number of blocks currently on the list (free and used).
    pub fn block_count(&self) -> usize {
        let mut count = 0;
        let mut slot = self.block(SENTINEL).next;
        while slot != SENTINEL {
            count += 1;
            slot = self.block(slot).next;
        }
        count
    }

    /// Total bytes in free blocks, headers included.
    pub fn free_bytes(&self) -> usize {
        let mut total = 0;
        let mut slot = self.block(SENTINEL).next;
        while slot != SENTINEL {
            let block = self.block(slot);
            if block.tag == 0 {
                total += block.size;
            }
            slot = block.next;
        }
        total
    }

    fn block(&self, slot: u32) -> &MemBlock {
        &self.blocks[slot as usize]
    }

    fn block_mut(&mut self, slot: u32) -> &mut MemBlock {
        &mut self.blocks[slot as usize]
    }

    fn new_slot(&mut self, block: MemBlock) -> u32 {
        if let Some(slot) = self.free_slots.pop() {
            self.blocks[slot as usize] = block;
            slot
        } else {
            let slot = self.blocks.len() as u32;
            self.blocks.push(block);
            slot
        }
    }

    fn release_slot(&mut self, slot: u32) {
        // Poison the offset so a stale in-band back-reference cannot match.
        self.block_mut(slot).offset = usize::MAX;
        self.free_slots.push(slot);
    }

    fn write_block_header(&self, arena: &mut Arena, slot: u32) {
        let offset = self.block(slot).offset;
        arena.write_u32(offset, ZONE_ID);
        arena.write_u32(offset + 4, slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: usize = 4096;

    fn fresh() -> (Arena, Zone) {
        let mut arena = Arena::new(REGION);
        let zone = Zone::init(&mut arena, 0, REGION);
        (arena, zone)
    }

    #[test]
    fn test_init_single_free_block() {
        let (arena, zone) = fresh();
        assert_eq!(zone.block_count(), 1);
        assert_eq!(zone.free_bytes(), REGION);
        zone.check_heap(&arena).unwrap();
    }

    #[test]
    fn test_alloc_free_round_trip() {
        let (mut arena, mut zone) = fresh();
        let p = zone.alloc(&mut arena, 100, 1).unwrap().unwrap();
        assert_eq!(zone.block_count(), 2);
        zone.free(&mut arena, p).unwrap();
        assert_eq!(zone.block_count(), 1);
        assert_eq!(zone.free_bytes(), REGION);
        zone.check_heap(&arena).unwrap();
    }

    #[test]
    fn test_alloc_zeroed_clears_payload() {
        let (mut arena, mut zone) = fresh();
        let p = zone.alloc(&mut arena, 64, 1).unwrap().unwrap();
        arena.bytes_mut(p..p + 64).fill(0xEE);
        zone.free(&mut arena, p).unwrap();

        let q = zone.alloc_zeroed(&mut arena, 64).unwrap();
        assert!(arena.bytes(q..q + 64).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_split_above_threshold() {
        let (mut arena, mut zone) = fresh();
        // Leaves far more surplus than MIN_FRAGMENT: used + free block.
        zone.alloc(&mut arena, 512, 1).unwrap().unwrap();
        assert_eq!(zone.block_count(), 2);
        zone.check_heap(&arena).unwrap();
    }

    #[test]
    fn test_no_split_at_threshold() {
        let (mut arena, mut zone) = fresh();
        // needed = align8(size + 12); pick size so the surplus is exactly
        // MIN_FRAGMENT, which must not be split off.
        let size = REGION - MIN_FRAGMENT - 12;
        let p = zone.alloc(&mut arena, size, 1).unwrap().unwrap();
        assert_eq!(zone.block_count(), 1);
        zone.free(&mut arena, p).unwrap();
        assert_eq!(zone.free_bytes(), REGION);
    }

    #[test]
    fn test_no_adjacent_free_blocks() {
        let (mut arena, mut zone) = fresh();
        let ptrs: Vec<usize> = (0..8)
            .map(|_| zone.alloc(&mut arena, 128, 1).unwrap().unwrap())
            .collect();
        // Free in an interleaved order; coalescing must hold throughout.
        for &p in ptrs.iter().step_by(2) {
            zone.free(&mut arena, p).unwrap();
            zone.check_heap(&arena).unwrap();
        }
        for &p in ptrs.iter().skip(1).step_by(2) {
            zone.free(&mut arena, p).unwrap();
            zone.check_heap(&arena).unwrap();
        }
        assert_eq!(zone.block_count(), 1);
        assert_eq!(zone.free_bytes(), REGION);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let (mut arena, mut zone) = fresh();
        assert!(zone.alloc(&mut arena, REGION * 2, 1).unwrap().is_none());
        // A full wrap with interspersed used blocks also comes up empty.
        zone.alloc(&mut arena, 1024, 1).unwrap().unwrap();
        assert!(zone.alloc(&mut arena, REGION, 1).unwrap().is_none());
    }

    #[test]
    fn test_zero_tag_is_fatal() {
        let (mut arena, mut zone) = fresh();
        assert_eq!(
            zone.alloc(&mut arena, 16, 0),
            Err(MemoryError::ZoneZeroTag)
        );
    }

    #[test]
    fn test_double_free_is_fatal() {
        let (mut arena, mut zone) = fresh();
        let p = zone.alloc(&mut arena, 32, 1).unwrap().unwrap();
        // Keep a used neighbor so the freed block is not merged away.
        zone.alloc(&mut arena, 32, 1).unwrap().unwrap();
        zone.free(&mut arena, p).unwrap();
        assert_eq!(
            zone.free(&mut arena, p),
            Err(MemoryError::ZoneDoubleFree { offset: p })
        );
    }

    #[test]
    fn test_bad_pointer_is_fatal() {
        let (mut arena, mut zone) = fresh();
        zone.alloc(&mut arena, 32, 1).unwrap().unwrap();
        assert!(matches!(
            zone.free(&mut arena, 12345),
            Err(MemoryError::ZoneBadPointer { .. })
        ));
    }

    #[test]
    fn test_guard_scribble_detected() {
        let (mut arena, mut zone) = fresh();
        let p = zone.alloc(&mut arena, 40, 1).unwrap().unwrap();
        // needed = align8(40 + 12) = 56; stamp over the trailing guard.
        let guard = p - BLOCK_HEADER + 56 - GUARD_BYTES;
        arena.write_u32(guard, 0xdead_beef);
        assert_eq!(
            zone.check_heap(&arena),
            Err(MemoryError::ZoneCorrupt {
                detail: "trailing guard clobbered"
            })
        );
        assert_eq!(
            zone.free(&mut arena, p),
            Err(MemoryError::ZoneCorrupt {
                detail: "trailing guard clobbered"
            })
        );
    }

    #[test]
    fn test_rover_survives_merges() {
        let (mut arena, mut zone) = fresh();
        let a = zone.alloc(&mut arena, 64, 1).unwrap().unwrap();
        let b = zone.alloc(&mut arena, 64, 1).unwrap().unwrap();
        let c = zone.alloc(&mut arena, 64, 1).unwrap().unwrap();
        zone.free(&mut arena, b).unwrap();
        zone.free(&mut arena, a).unwrap();
        zone.free(&mut arena, c).unwrap();
        zone.check_heap(&arena).unwrap();
        // The zone must still be fully usable after the rover's block merged.
        let big = zone.alloc(&mut arena, 2048, 1).unwrap();
        assert!(big.is_some());
    }

    #[test]
    fn test_print_lists_blocks() {
        let (mut arena, mut zone) = fresh();
        zone.alloc(&mut arena, 64, 5).unwrap().unwrap();
        let listing = zone.print();
        assert!(listing.contains("zone size: 4096"));
        assert!(listing.contains("tag:  5"));
        assert!(!listing.contains("ERROR"));
    }
}

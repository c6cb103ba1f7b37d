//! Cache allocator: LRU-evictable, relocatable entries between the hunk marks.
//!
//! The cache manages the free gap between the low and high hunk marks as a
//! set of named entries for reclaimable data (decoded assets and the like).
//! When the hunk needs to grow, entries in its way are relocated elsewhere
//! in the gap or evicted outright; when a new entry cannot fit, the globally
//! least-recently-used entry is thrown out and the allocation retried.
//!
//! Entries are tracked on two circular index-linked lists sharing one
//! sentinel slot: an address-ordered list driving the gap scan, and an LRU
//! list driving eviction order. Owners hold a generation-validated handle
//! (never a raw address): relocation keeps the slot and generation, so the
//! handle survives moves; eviction bumps the generation, so stale handles
//! resolve to nothing.

use log::debug;

use crate::arena::Arena;
use crate::error::MemoryError;
use crate::util::align_up;

/// Reserved (zero-filled) header region ahead of each entry payload.
const CACHE_HEADER: usize = 32;
/// Alignment applied to every entry size.
const CACHE_ALIGN: usize = 16;
/// Length of the entry name tag.
const NAME_LEN: usize = 16;

/// Slot index of the shared sentinel of both lists.
const SENTINEL: u32 = 0;
/// "Not linked" marker for LRU links.
const UNLINKED: u32 = u32::MAX;

/// A stable reference to a cache entry, held inside a [`CacheUser`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CacheHandle {
    slot: u32,
    generation: u32,
}

/// The owner side of a cache allocation.
///
/// A `CacheUser` starts unbound; [`Cache::alloc`] binds it and
/// [`Cache::free`] or an internal eviction unbinds it. The current payload
/// offset is resolved through [`Cache::check`] on every access, so the
/// allocator is free to relocate the entry in between.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheUser {
    handle: Option<CacheHandle>,
}

impl CacheUser {
    /// A fresh, unbound owner.
    pub const fn new() -> Self {
        Self { handle: None }
    }
}

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    /// Entry start within the arena, header included.
    offset: usize,
    /// Entry size, header included.
    size: usize,
    name: [u8; NAME_LEN],
    generation: u32,
    live: bool,
    prev: u32,
    next: u32,
    lru_prev: u32,
    lru_next: u32,
}

impl CacheEntry {
    const fn sentinel() -> Self {
        Self {
            offset: 0,
            size: 0,
            name: [0; NAME_LEN],
            generation: 0,
            live: false,
            prev: SENTINEL,
            next: SENTINEL,
            lru_prev: SENTINEL,
            lru_next: SENTINEL,
        }
    }
}

/// LRU-evictable allocator for the gap between the hunk marks.
pub struct Cache {
    entries: Vec<CacheEntry>,
    free_slots: Vec<u32>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: vec![CacheEntry::sentinel()],
            free_slots: Vec::new(),
        }
    }

    /// Allocate an entry for `user`; eviction makes this all but infallible.
    ///
    /// Fatal if `user` is already bound, if `size` is zero, or if the arena
    /// cannot fit the entry even with every other entry evicted.
    pub fn alloc(
        &mut self,
        arena: &mut Arena,
        user: &mut CacheUser,
        size: usize,
        name: &str,
        low_used: usize,
        high_used: usize,
    ) -> Result<usize, MemoryError> {
        if self.resolve(user).is_some() {
            return Err(MemoryError::CacheAlreadyBound);
        }
        if size == 0 {
            return Err(MemoryError::CacheBadSize);
        }

        let total = align_up(size + CACHE_HEADER, CACHE_ALIGN);
        loop {
            if let Some(slot) = self.try_alloc(arena, total, false, low_used, high_used)? {
                let entry = &mut self.entries[slot as usize];
                entry.name = name_tag(name);
                user.handle = Some(CacheHandle {
                    slot,
                    generation: entry.generation,
                });
                return Ok(entry.offset + CACHE_HEADER);
            }

            // No gap fits: throw out the least-recently-used entry and retry.
            let victim = self.entries[SENTINEL as usize].lru_prev;
            if victim == SENTINEL {
                return Err(MemoryError::CacheExhausted { requested: total });
            }
            self.evict(victim);
        }
    }

    /// Resolve `user`'s current payload offset, refreshing its recency.
    ///
    /// Returns `None` when the owner is unbound or its entry was evicted.
    /// A successful resolve counts as a use: the entry becomes
    /// most-recently-used.
    pub fn check(&mut self, user: &CacheUser) -> Option<usize> {
        let slot = self.resolve(user)?;
        self.unlink_lru(slot);
        self.make_lru(slot);
        Some(self.entries[slot as usize].offset + CACHE_HEADER)
    }

    /// Free `user`'s entry; fatal if the owner holds nothing.
    pub fn free(&mut self, user: &mut CacheUser) -> Result<(), MemoryError> {
        let slot = self.resolve(user).ok_or(MemoryError::CacheNotBound)?;
        self.evict(slot);
        user.handle = None;
        Ok(())
    }

    /// Evict every entry, address order, head first.
    pub fn flush(&mut self) {
        while self.entries[SENTINEL as usize].next != SENTINEL {
            let head = self.entries[SENTINEL as usize].next;
            self.evict(head);
        }
    }

    /// Link a new entry into the first gap at least `total` bytes wide.
    ///
    /// `total` must already include the header. `nobottom` skips the gap at
    /// the very bottom of the range (used during relocation so the slot
    /// being vacated is not immediately re-used). The entry header region is
    /// zero-filled and the entry becomes most-recently-used.
    ///
    /// `Ok(None)` when no gap suffices; fatal when the cache is completely
    /// empty and even the whole hunk gap is too small.
    pub fn try_alloc(
        &mut self,
        arena: &mut Arena,
        total: usize,
        nobottom: bool,
        low_used: usize,
        high_used: usize,
    ) -> Result<Option<u32>, MemoryError> {
        // Is the cache completely empty?
        if !nobottom && self.entries[SENTINEL as usize].next == SENTINEL {
            if arena.len() - high_used - low_used < total {
                return Err(MemoryError::CacheExhausted { requested: total });
            }
            let slot = self.link_new(arena, low_used, total, SENTINEL);
            return Ok(Some(slot));
        }

        match self.find_gap(total, nobottom, low_used, high_used, arena.len()) {
            Some((offset, before)) => {
                let slot = self.link_new(arena, offset, total, before);
                Ok(Some(slot))
            }
            None => Ok(None),
        }
    }

    /// Evict or relocate entries until none overlaps the new low mark.
    pub fn free_low(&mut self, arena: &mut Arena, new_low_used: usize, high_used: usize) {
        loop {
            let head = self.entries[SENTINEL as usize].next;
            if head == SENTINEL {
                // Nothing in cache at all.
                return;
            }
            if self.entries[head as usize].offset >= new_low_used {
                // There is room to grow the hunk.
                return;
            }
            self.move_entry(arena, head, new_low_used, high_used);
        }
    }

    /// Evict or relocate entries until none overlaps the new high mark.
    ///
    /// An entry met twice in a row failed to move clear of the boundary and
    /// is evicted directly, bounding the loop.
    pub fn free_high(&mut self, arena: &mut Arena, low_used: usize, new_high_used: usize) {
        let high_start = arena.len() - new_high_used;
        let mut last_moved: Option<u32> = None;
        loop {
            let tail = self.entries[SENTINEL as usize].prev;
            if tail == SENTINEL {
                return;
            }
            let entry = &self.entries[tail as usize];
            if entry.offset + entry.size <= high_start {
                return;
            }
            if last_moved == Some(tail) {
                // Did not move out of the way.
                self.evict(tail);
            } else {
                self.move_entry(arena, tail, low_used, new_high_used);
                last_moved = Some(tail);
            }
        }
    }

    /// Human-readable usage summary.
    pub fn report(&self, arena_size: usize, low_used: usize, high_used: usize) -> String {
        let gap = arena_size - low_used - high_used;
        let mut count = 0usize;
        let mut used = 0usize;
        let mut slot = self.entries[SENTINEL as usize].next;
        while slot != SENTINEL {
            count += 1;
            used += self.entries[slot as usize].size;
            slot = self.entries[slot as usize].next;
        }
        format!(
            "{} data cache, {} used by {} entries",
            crate::util::format_bytes(gap),
            crate::util::format_bytes(used),
            count
        )
    }

    /// Per-entry listing, address order.
    pub fn print(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let mut slot = self.entries[SENTINEL as usize].next;
        while slot != SENTINEL {
            let entry = &self.entries[slot as usize];
            let _ = writeln!(out, "{:8} : {}", entry.size, display_name(&entry.name));
            slot = entry.next;
        }
        out
    }

    /// Number of live entries.
    pub fn live_entries(&self) -> usize {
        let mut count = 0;
        let mut slot = self.entries[SENTINEL as usize].next;
        while slot != SENTINEL {
            count += 1;
            slot = self.entries[slot as usize].next;
        }
        count
    }

    /// Address ranges of all live entries, address order (for diagnostics).
    pub fn live_ranges(&self) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut slot = self.entries[SENTINEL as usize].next;
        while slot != SENTINEL {
            let entry = &self.entries[slot as usize];
            ranges.push((entry.offset, entry.offset + entry.size));
            slot = entry.next;
        }
        ranges
    }

    /// Relocate one entry to a gap elsewhere, or evict it if none exists.
    ///
    /// Relocation keeps the entry's slot and generation, so owner handles
    /// remain valid; the payload is bulk-copied and the entry becomes
    /// most-recently-used.
    fn move_entry(&mut self, arena: &mut Arena, slot: u32, low_used: usize, high_used: usize) {
        let total = self.entries[slot as usize].size;
        // We are clearing up space at the bottom, so never re-use it here.
        match self.find_gap(total, true, low_used, high_used, arena.len()) {
            Some((new_offset, mut before)) => {
                let old_offset = self.entries[slot as usize].offset;

                let prev = self.entries[slot as usize].prev;
                let next = self.entries[slot as usize].next;
                self.entries[prev as usize].next = next;
                self.entries[next as usize].prev = prev;
                if before == slot {
                    before = next;
                }

                arena.zero(new_offset..new_offset + CACHE_HEADER);
                arena.copy_nonoverlapping(
                    old_offset + CACHE_HEADER,
                    new_offset + CACHE_HEADER,
                    total - CACHE_HEADER,
                );

                self.entries[slot as usize].offset = new_offset;
                self.link_before(slot, before);
                self.unlink_lru(slot);
                self.make_lru(slot);
                debug!(
                    "cache move ok: {} -> {}",
                    display_name(&self.entries[slot as usize].name),
                    new_offset
                );
            }
            None => {
                // Tough luck: the owner will have to reconstruct it.
                debug!(
                    "cache move failed, evicting {}",
                    display_name(&self.entries[slot as usize].name)
                );
                self.evict(slot);
            }
        }
    }

    /// First gap at least `total` bytes wide, bottom up.
    ///
    /// Returns the gap offset and the entry to insert before (the sentinel
    /// for the gap at the very end).
    fn find_gap(
        &self,
        total: usize,
        nobottom: bool,
        low_used: usize,
        high_used: usize,
        arena_size: usize,
    ) -> Option<(usize, u32)> {
        let first = self.entries[SENTINEL as usize].next;
        let mut cursor = low_used;
        let mut slot = first;
        while slot != SENTINEL {
            let entry = &self.entries[slot as usize];
            if (!nobottom || slot != first)
                && entry.offset >= cursor
                && entry.offset - cursor >= total
            {
                return Some((cursor, slot));
            }
            cursor = entry.offset + entry.size;
            slot = entry.next;
        }
        // Try the gap at the very end.
        let high_start = arena_size - high_used;
        if high_start >= cursor && high_start - cursor >= total {
            return Some((cursor, SENTINEL));
        }
        None
    }

    fn link_new(&mut self, arena: &mut Arena, offset: usize, total: usize, before: u32) -> u32 {
        let slot = self.new_slot();
        {
            let entry = &mut self.entries[slot as usize];
            entry.offset = offset;
            entry.size = total;
            entry.name = [0; NAME_LEN];
            entry.live = true;
        }
        self.link_before(slot, before);
        self.make_lru(slot);
        arena.zero(offset..offset + CACHE_HEADER);
        slot
    }

    fn resolve(&self, user: &CacheUser) -> Option<u32> {
        let handle = user.handle?;
        let entry = self.entries.get(handle.slot as usize)?;
        (entry.live && entry.generation == handle.generation).then_some(handle.slot)
    }

    fn evict(&mut self, slot: u32) {
        debug_assert_ne!(slot, SENTINEL);
        debug!(
            "evicting cache entry {}",
            display_name(&self.entries[slot as usize].name)
        );
        let prev = self.entries[slot as usize].prev;
        let next = self.entries[slot as usize].next;
        self.entries[prev as usize].next = next;
        self.entries[next as usize].prev = prev;
        self.unlink_lru(slot);

        let entry = &mut self.entries[slot as usize];
        entry.live = false;
        // Invalidate every outstanding handle to this slot.
        entry.generation = entry.generation.wrapping_add(1);
        self.free_slots.push(slot);
    }

    fn link_before(&mut self, slot: u32, before: u32) {
        let prev = self.entries[before as usize].prev;
        self.entries[slot as usize].next = before;
        self.entries[slot as usize].prev = prev;
        self.entries[prev as usize].next = slot;
        self.entries[before as usize].prev = slot;
    }

    fn make_lru(&mut self, slot: u32) {
        debug_assert_eq!(self.entries[slot as usize].lru_next, UNLINKED);
        debug_assert_eq!(self.entries[slot as usize].lru_prev, UNLINKED);
        let head_next = self.entries[SENTINEL as usize].lru_next;
        self.entries[slot as usize].lru_next = head_next;
        self.entries[slot as usize].lru_prev = SENTINEL;
        self.entries[head_next as usize].lru_prev = slot;
        self.entries[SENTINEL as usize].lru_next = slot;
    }

    fn unlink_lru(&mut self, slot: u32) {
        let lru_next = self.entries[slot as usize].lru_next;
        let lru_prev = self.entries[slot as usize].lru_prev;
        debug_assert_ne!(lru_next, UNLINKED);
        debug_assert_ne!(lru_prev, UNLINKED);
        self.entries[lru_next as usize].lru_prev = lru_prev;
        self.entries[lru_prev as usize].lru_next = lru_next;
        self.entries[slot as usize].lru_next = UNLINKED;
        self.entries[slot as usize].lru_prev = UNLINKED;
    }

    fn new_slot(&mut self) -> u32 {
        if let Some(slot) = self.free_slots.pop() {
            // Generation was already bumped on eviction; links get relaid.
            self.entries[slot as usize].lru_next = UNLINKED;
            self.entries[slot as usize].lru_prev = UNLINKED;
            slot
        } else {
            let slot = self.entries.len() as u32;
            self.entries.push(CacheEntry {
                offset: 0,
                size: 0,
                name: [0; NAME_LEN],
                generation: 0,
                live: false,
                prev: SENTINEL,
                next: SENTINEL,
                lru_prev: UNLINKED,
                lru_next: UNLINKED,
            });
            slot
        }
    }
}

/// Truncate a name into the fixed 16-byte entry tag.
fn name_tag(name: &str) -> [u8; NAME_LEN] {
    let mut tag = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    // Leave at least one trailing NUL, as a C-string field would.
    let n = bytes.len().min(NAME_LEN - 1);
    tag[..n].copy_from_slice(&bytes[..n]);
    tag
}

fn display_name(tag: &[u8; NAME_LEN]) -> String {
    let end = tag.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&tag[..end]).into_owned()
}

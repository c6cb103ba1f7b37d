//! The top-level facade tying the arena and the three allocators together.

use std::fmt;

use log::info;

use crate::allocators::{Cache, CacheUser, Hunk, Zone};
use crate::arena::Arena;
use crate::config::MemoryConfig;
use crate::error::MemoryError;
use crate::util::format_bytes;

/// One fixed arena and its three cooperating allocators.
///
/// All allocations return byte offsets into the arena; the payload bytes are
/// reached through [`data`](Memory::data) and [`data_mut`](Memory::data_mut).
/// Single-threaded by design: callers needing cross-thread access wrap the
/// whole subsystem in their own lock.
pub struct Memory {
    arena: Arena,
    hunk: Hunk,
    cache: Cache,
    zone: Zone,
}

impl Memory {
    /// Set up the subsystem: allocate the arena, carve the zone out of the
    /// bottom of the hunk, and leave the rest to the hunk and cache.
    pub fn new(config: MemoryConfig) -> Result<Self, MemoryError> {
        Self::with_buffer(
            vec![0u8; config.arena_size].into_boxed_slice(),
            config,
        )
    }

    /// Like [`new`](Memory::new), but over a caller-provided buffer.
    pub fn with_buffer(buffer: Box<[u8]>, config: MemoryConfig) -> Result<Self, MemoryError> {
        if config.arena_size == 0 || config.arena_size != buffer.len() {
            return Err(MemoryError::BadConfig {
                detail: "arena size must be nonzero and match the buffer",
            });
        }
        if config.zone_size == 0 {
            return Err(MemoryError::BadConfig {
                detail: "zone size must be nonzero",
            });
        }
        if config.zone_size >= config.arena_size {
            return Err(MemoryError::BadConfig {
                detail: "zone size must leave room for the hunk",
            });
        }

        let mut arena = Arena::from_buffer(buffer);
        let mut hunk = Hunk::new(arena.len());
        let mut cache = Cache::new();

        let zone_start = hunk.alloc_low(&mut arena, &mut cache, config.zone_size, "zone")?;
        let zone = Zone::init(&mut arena, zone_start, config.zone_size);
        info!(
            "memory init: {} arena, {} zone",
            format_bytes(arena.len()),
            format_bytes(config.zone_size)
        );

        Ok(Self {
            arena,
            hunk,
            cache,
            zone,
        })
    }

    /// Total arena size in bytes.
    pub fn arena_size(&self) -> usize {
        self.arena.len()
    }

    /// Payload bytes of an allocation.
    pub fn data(&self, offset: usize, len: usize) -> &[u8] {
        self.arena.bytes(offset..offset + len)
    }

    /// Mutable payload bytes of an allocation.
    pub fn data_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        self.arena.bytes_mut(offset..offset + len)
    }

    // --- zone ---

    /// Zeroed zone allocation under the default tag; fatal when full.
    pub fn zone_alloc(&mut self, size: usize) -> Result<usize, MemoryError> {
        self.zone.alloc_zeroed(&mut self.arena, size)
    }

    /// Tagged zone allocation; `Ok(None)` when the zone is full.
    pub fn zone_alloc_tagged(
        &mut self,
        size: usize,
        tag: u32,
    ) -> Result<Option<usize>, MemoryError> {
        self.zone.alloc(&mut self.arena, size, tag)
    }

    pub fn zone_free(&mut self, offset: usize) -> Result<(), MemoryError> {
        self.zone.free(&mut self.arena, offset)
    }

    /// Walk the zone heap and verify its invariants.
    pub fn zone_check(&self) -> Result<(), MemoryError> {
        self.zone.check_heap(&self.arena)
    }

    pub fn zone_print(&self) -> String {
        self.zone.print()
    }

    // --- hunk ---

    /// Named low-end hunk allocation; fatal when the hunk is full.
    pub fn hunk_alloc_low(&mut self, size: usize, name: &str) -> Result<usize, MemoryError> {
        self.hunk
            .alloc_low(&mut self.arena, &mut self.cache, size, name)
    }

    /// Named high-end hunk allocation; `Ok(None)` when it does not fit.
    pub fn hunk_alloc_high(
        &mut self,
        size: usize,
        name: &str,
    ) -> Result<Option<usize>, MemoryError> {
        self.hunk
            .alloc_high(&mut self.arena, &mut self.cache, size, name)
    }

    /// Single scratch allocation at the high end; replaces any previous one.
    pub fn hunk_temp_alloc(&mut self, size: usize) -> Result<Option<usize>, MemoryError> {
        self.hunk.temp_alloc(&mut self.arena, &mut self.cache, size)
    }

    pub fn hunk_low_mark(&self) -> usize {
        self.hunk.low_mark()
    }

    pub fn hunk_free_to_low_mark(&mut self, mark: usize) -> Result<(), MemoryError> {
        self.hunk.free_to_low_mark(&mut self.arena, mark)
    }

    pub fn hunk_high_mark(&mut self) -> Result<usize, MemoryError> {
        self.hunk.high_mark(&mut self.arena)
    }

    pub fn hunk_free_to_high_mark(&mut self, mark: usize) -> Result<(), MemoryError> {
        self.hunk.free_to_high_mark(&mut self.arena, mark)
    }

    /// Walk both hunk stacks and verify their headers.
    pub fn hunk_check(&self) -> Result<(), MemoryError> {
        self.hunk.check(&self.arena)
    }

    /// Listing of hunk allocations; `all` lists every block instead of
    /// per-name run totals.
    pub fn hunk_print(&self, all: bool) -> Result<String, MemoryError> {
        self.hunk.print(&self.arena, all)
    }

    // --- cache ---

    /// Bind a cache entry to `user`; evicts as needed, fatal only when the
    /// entry cannot fit even in an empty cache.
    pub fn cache_alloc(
        &mut self,
        user: &mut CacheUser,
        size: usize,
        name: &str,
    ) -> Result<usize, MemoryError> {
        self.cache.alloc(
            &mut self.arena,
            user,
            size,
            name,
            self.hunk.low_used(),
            self.hunk.high_used(),
        )
    }

    /// Current payload offset of `user`'s entry, or `None` if evicted.
    pub fn cache_check(&mut self, user: &CacheUser) -> Option<usize> {
        self.cache.check(user)
    }

    pub fn cache_free(&mut self, user: &mut CacheUser) -> Result<(), MemoryError> {
        self.cache.free(user)
    }

    /// Evict every cache entry.
    pub fn cache_flush(&mut self) {
        self.cache.flush()
    }

    pub fn cache_report(&self) -> String {
        self.cache
            .report(self.arena.len(), self.hunk.low_used(), self.hunk.high_used())
    }

    pub fn cache_print(&self) -> String {
        self.cache.print()
    }

    /// Snapshot of current usage across all three allocators.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            arena_size: self.arena.len(),
            hunk_low_used: self.hunk.low_used(),
            hunk_high_used: self.hunk.high_used(),
            hunk_remaining: self.hunk.remaining(),
            zone_free: self.zone.free_bytes(),
            cache_entries: self.cache.live_entries(),
        }
    }
}

/// Usage snapshot returned by [`Memory::stats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryStats {
    pub arena_size: usize,
    pub hunk_low_used: usize,
    pub hunk_high_used: usize,
    pub hunk_remaining: usize,
    pub zone_free: usize,
    pub cache_entries: usize,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "arena: {}", format_bytes(self.arena_size))?;
        writeln!(
            f,
            "hunk:  {} low, {} high, {} free",
            format_bytes(self.hunk_low_used),
            format_bytes(self.hunk_high_used),
            format_bytes(self.hunk_remaining)
        )?;
        writeln!(f, "zone:  {} free", format_bytes(self.zone_free))?;
        write!(f, "cache: {} entries", self.cache_entries)
    }
}

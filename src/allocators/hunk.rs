//! Hunk allocator: a two-ended stack over the whole arena.
//!
//! The low end grows upward and holds long-lived data (world geometry, the
//! zone's own region); the high end grows downward and holds transient
//! scratch. Neither end supports individual frees; reclamation is bulk
//! rollback to a previously recorded watermark, which makes level
//! load/unload cycles O(1) with no per-object destructors.
//!
//! The cache allocator lives in the gap between the two marks, so every
//! grow operation first tells the cache to clear the requested range.

use log::warn;

use crate::allocators::cache::Cache;
use crate::arena::Arena;
use crate::error::MemoryError;
use crate::util::align_up;

/// Sentinel constant stamped into every hunk header.
pub const HUNK_SENTINEL: u32 = 0x1df0_01ed;

/// In-band header: sentinel + size + 8-byte name tag.
const HUNK_HEADER: usize = 16;
/// Alignment applied to every hunk block size.
const HUNK_ALIGN: usize = 16;
/// Length of the diagnostic name tag.
const NAME_LEN: usize = 8;

/// Two-ended stack allocator with watermark rollback.
pub struct Hunk {
    size: usize,
    low_used: usize,
    high_used: usize,
    temp_active: bool,
    temp_mark: usize,
}

impl Hunk {
    /// Create a hunk managing an arena of `size` total bytes.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            low_used: 0,
            high_used: 0,
            temp_active: false,
            temp_mark: 0,
        }
    }

    /// Total arena size this hunk manages.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes used by the low hunk.
    pub fn low_used(&self) -> usize {
        self.low_used
    }

    /// Bytes used by the high hunk.
    pub fn high_used(&self) -> usize {
        self.high_used
    }

    /// Bytes remaining between the two marks.
    pub fn remaining(&self) -> usize {
        self.size - self.low_used - self.high_used
    }

    /// Allocate permanent low-hunk space; insufficient space is fatal.
    ///
    /// The cache is told about the new low mark before the region is
    /// granted, so any entries overlapping it get relocated or evicted.
    /// The region is zero-filled.
    pub fn alloc_low(
        &mut self,
        arena: &mut Arena,
        cache: &mut Cache,
        size: usize,
        name: &str,
    ) -> Result<usize, MemoryError> {
        let total = HUNK_HEADER + align_up(size, HUNK_ALIGN);
        if self.remaining() < total {
            return Err(MemoryError::HunkOverflow {
                requested: total,
                available: self.remaining(),
            });
        }

        let offset = self.low_used;
        self.low_used += total;
        cache.free_low(arena, self.low_used, self.high_used);

        arena.zero(offset..offset + total);
        self.stamp(arena, offset, total, name);
        Ok(offset + HUNK_HEADER)
    }

    /// `alloc_low` without a caller-supplied name.
    pub fn alloc(
        &mut self,
        arena: &mut Arena,
        cache: &mut Cache,
        size: usize,
    ) -> Result<usize, MemoryError> {
        self.alloc_low(arena, cache, size, "unknown")
    }

    /// Allocate transient high-hunk space.
    ///
    /// Returns `Ok(None)` when the gap cannot fit the request: high growth
    /// is negotiable scratch, so the caller decides what to give up. Any
    /// active temp allocation is discarded first.
    pub fn alloc_high(
        &mut self,
        arena: &mut Arena,
        cache: &mut Cache,
        size: usize,
        name: &str,
    ) -> Result<Option<usize>, MemoryError> {
        if self.temp_active {
            let mark = self.temp_mark;
            self.temp_active = false;
            self.free_to_high_mark(arena, mark)?;
        }

        let total = HUNK_HEADER + align_up(size, HUNK_ALIGN);
        if self.remaining() < total {
            warn!("hunk high alloc failed on {total} bytes");
            return Ok(None);
        }

        self.high_used += total;
        cache.free_high(arena, self.low_used, self.high_used);

        let offset = self.size - self.high_used;
        arena.zero(offset..offset + total);
        self.stamp(arena, offset, total, name);
        Ok(Some(offset + HUNK_HEADER))
    }

    /// Scratch space from the top of the hunk.
    ///
    /// At most one temp allocation is active at a time: a new one discards
    /// the previous one, so forgotten scratch buffers cannot pile up.
    pub fn temp_alloc(
        &mut self,
        arena: &mut Arena,
        cache: &mut Cache,
        size: usize,
    ) -> Result<Option<usize>, MemoryError> {
        if self.temp_active {
            let mark = self.temp_mark;
            self.temp_active = false;
            self.free_to_high_mark(arena, mark)?;
        }

        self.temp_mark = self.high_mark(arena)?;
        let payload = self.alloc_high(arena, cache, size, "temp")?;
        if payload.is_some() {
            self.temp_active = true;
        }
        Ok(payload)
    }

    /// Current low-hunk usage, usable as a rollback token.
    pub fn low_mark(&self) -> usize {
        self.low_used
    }

    /// Roll the low hunk back to `mark`, zero-filling the discarded range.
    pub fn free_to_low_mark(&mut self, arena: &mut Arena, mark: usize) -> Result<(), MemoryError> {
        if mark > self.low_used {
            return Err(MemoryError::HunkBadMark {
                mark,
                used: self.low_used,
            });
        }
        arena.zero(mark..self.low_used);
        self.low_used = mark;
        Ok(())
    }

    /// Current high-hunk usage; discards an active temp allocation first.
    pub fn high_mark(&mut self, arena: &mut Arena) -> Result<usize, MemoryError> {
        if self.temp_active {
            let mark = self.temp_mark;
            self.temp_active = false;
            self.free_to_high_mark(arena, mark)?;
        }
        Ok(self.high_used)
    }

    /// Roll the high hunk back to `mark`, zero-filling the discarded range.
    ///
    /// An active temp allocation is discarded first.
    pub fn free_to_high_mark(&mut self, arena: &mut Arena, mark: usize) -> Result<(), MemoryError> {
        if self.temp_active {
            let temp = self.temp_mark;
            self.temp_active = false;
            self.free_to_high_mark(arena, temp)?;
        }
        if mark > self.high_used {
            return Err(MemoryError::HunkBadMark {
                mark,
                used: self.high_used,
            });
        }
        arena.zero(self.size - self.high_used..self.size - mark);
        self.high_used = mark;
        Ok(())
    }

    /// Run consistency and sentinel-trashing checks over both ends.
    pub fn check(&self, arena: &Arena) -> Result<(), MemoryError> {
        self.walk(arena, 0, self.low_used)?;
        self.walk(arena, self.size - self.high_used, self.size)?;
        Ok(())
    }

    /// Usage listing, low hunk then high hunk.
    ///
    /// With `all` set, every single allocation is printed; otherwise
    /// consecutive allocations with the same name are totaled up.
    pub fn print(&self, arena: &Arena, all: bool) -> Result<String, MemoryError> {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "          :{:8} total hunk size", self.size);
        let _ = writeln!(out, "-------------------------");

        self.print_range(arena, 0, self.low_used, all, &mut out)?;
        let _ = writeln!(out, "-------------------------");
        let _ = writeln!(out, "          :{:8} REMAINING", self.remaining());
        let _ = writeln!(out, "-------------------------");
        self.print_range(arena, self.size - self.high_used, self.size, all, &mut out)?;

        let _ = writeln!(out, "-------------------------");
        Ok(out)
    }

    fn print_range(
        &self,
        arena: &Arena,
        start: usize,
        end: usize,
        all: bool,
        out: &mut String,
    ) -> Result<(), MemoryError> {
        use std::fmt::Write;

        let mut offset = start;
        let mut run_sum = 0usize;
        let mut run_name = [0u8; NAME_LEN];
        while offset < end {
            let (size, name) = self.header_at(arena, offset)?;
            if all {
                let _ = writeln!(out, "{:8} :{:8} {:8}", offset, size, display_name(&name));
            }
            if run_sum == 0 {
                run_name = name;
            }
            run_sum += size;
            let next = offset + size;
            let next_name = if next < end {
                Some(self.header_at(arena, next)?.1)
            } else {
                None
            };
            if next_name != Some(name) {
                if !all {
                    let _ = writeln!(out, "          :{:8} {:8} (TOTAL)", run_sum, display_name(&run_name));
                }
                run_sum = 0;
            }
            offset = next;
        }
        Ok(())
    }

    fn walk(&self, arena: &Arena, start: usize, end: usize) -> Result<(), MemoryError> {
        let mut offset = start;
        while offset < end {
            let (size, _) = self.header_at(arena, offset)?;
            offset += size;
        }
        if offset != end {
            return Err(MemoryError::HunkCorrupt { detail: "bad size" });
        }
        Ok(())
    }

    fn header_at(&self, arena: &Arena, offset: usize) -> Result<(usize, [u8; NAME_LEN]), MemoryError> {
        if arena.read_u32(offset) != HUNK_SENTINEL {
            return Err(MemoryError::HunkCorrupt {
                detail: "trashed sentinel",
            });
        }
        let size = arena.read_u32(offset + 4) as usize;
        if size < HUNK_HEADER || offset + size > self.size {
            return Err(MemoryError::HunkCorrupt { detail: "bad size" });
        }
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(arena.bytes(offset + 8..offset + 8 + NAME_LEN));
        Ok((size, name))
    }

    fn stamp(&self, arena: &mut Arena, offset: usize, total: usize, name: &str) {
        arena.write_u32(offset, HUNK_SENTINEL);
        arena.write_u32(offset + 4, total as u32);
        let tag = name_tag(name);
        arena
            .bytes_mut(offset + 8..offset + 8 + NAME_LEN)
            .copy_from_slice(&tag);
    }
}

/// Truncate a name into the fixed 8-byte header tag.
fn name_tag(name: &str) -> [u8; NAME_LEN] {
    let mut tag = [0u8; NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_LEN);
    tag[..n].copy_from_slice(&bytes[..n]);
    tag
}

fn display_name(tag: &[u8; NAME_LEN]) -> String {
    let end = tag.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&tag[..end]).into_owned()
}

//! Configuration for the memory subsystem.

use crate::util::{kb, mb};

/// Sizing knobs for [`Memory::new`](crate::Memory::new).
///
/// Defaults suit a small interactive application: a 16 MB arena with a
/// 1 MB zone carved out of the bottom for small long-lived allocations.
///
/// ```
/// use fixedmem::MemoryConfig;
///
/// let config = MemoryConfig::new().with_zone_size_kb(512);
/// assert_eq!(config.zone_size, 512 * 1024);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Total size of the backing arena in bytes.
    pub arena_size: usize,
    /// Bytes reserved at the bottom of the hunk for the zone allocator.
    pub zone_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            arena_size: mb(16),
            zone_size: mb(1),
        }
    }
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arena_size(mut self, bytes: usize) -> Self {
        self.arena_size = bytes;
        self
    }

    pub fn with_zone_size(mut self, bytes: usize) -> Self {
        self.zone_size = bytes;
        self
    }

    /// Zone size in kilobytes, the unit it is usually tuned in.
    pub fn with_zone_size_kb(self, kilobytes: usize) -> Self {
        self.with_zone_size(kb(kilobytes))
    }
}

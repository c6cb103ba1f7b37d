//! Fixed-arena memory subsystem for real-time applications.
//!
//! One preallocated byte buffer, three cooperating allocators:
//!
//! - **Zone** ([`Zone`]): a free-list allocator with immediate coalescing,
//!   for small long-lived allocations (strings, settings, script state).
//! - **Hunk** ([`Hunk`]): a two-ended stack over the whole arena, for bulk
//!   level-lifetime data. Watermarks roll whole phases back in one call.
//! - **Cache** ([`Cache`]): LRU-evictable, relocatable entries in the gap
//!   between the hunk ends, for reclaimable data that can be reloaded.
//!
//! The zone lives inside a permanent hunk allocation, and the cache yields
//! space whenever either hunk end grows, so the three share the arena
//! without ever overlapping.
//!
//! Allocations are byte offsets into the arena rather than pointers, and
//! cache entries are addressed through generation-checked [`CacheUser`]
//! handles so relocation and eviction stay safe. Consistency violations
//! (bad frees, clobbered headers) surface as [`MemoryError`] values instead
//! of aborting the process.
//!
//! # Example
//!
//! ```
//! use fixedmem::{Memory, MemoryConfig, CacheUser};
//!
//! let mut mem = Memory::new(
//!     MemoryConfig::new().with_arena_size(1 << 20).with_zone_size(64 << 10),
//! )?;
//!
//! // Small allocation in the zone.
//! let name = mem.zone_alloc(32)?;
//! mem.data_mut(name, 32)[..5].copy_from_slice(b"hello");
//!
//! // Bulk level data on the hunk, rolled back by mark.
//! let mark = mem.hunk_low_mark();
//! let level = mem.hunk_alloc_low(128 << 10, "level")?;
//! mem.hunk_free_to_low_mark(mark)?;
//!
//! // Reclaimable data in the cache.
//! let mut user = CacheUser::new();
//! let entry = mem.cache_alloc(&mut user, 4096, "textures/wall")?;
//! assert_eq!(mem.cache_check(&user), Some(entry));
//! # let _ = level;
//! # Ok::<(), fixedmem::MemoryError>(())
//! ```

pub mod allocators;
pub mod arena;
pub mod config;
pub mod error;
pub mod memory;
pub mod util;

pub use allocators::{Cache, CacheUser, Hunk, Zone};
pub use arena::Arena;
pub use config::MemoryConfig;
pub use error::MemoryError;
pub use memory::{Memory, MemoryStats};
pub use util::copy::bulk_copy;

//! Error types for the fixed-arena allocators.
//!
//! Invariant violations surface as `Err(MemoryError::…)` so a harness can
//! catch them instead of the process aborting. Recoverable failures under
//! memory pressure (a full zone, an exhausted high hunk) are signalled with
//! `Ok(None)` by the operations that permit them, never through this enum.

use std::error::Error;
use std::fmt;

/// An unrecoverable allocator invariant violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryError {
    /// A zone allocation was requested with the reserved free tag (0).
    ZoneZeroTag,
    /// A zone free was given an offset that does not name a live block
    /// carrying the zone identity marker.
    ZoneBadPointer {
        /// The payload offset passed to `free`.
        offset: usize,
    },
    /// A zone block was freed twice.
    ZoneDoubleFree {
        /// The payload offset passed to `free`.
        offset: usize,
    },
    /// A zone heap-consistency check failed.
    ZoneCorrupt {
        /// The violated invariant.
        detail: &'static str,
    },
    /// A must-succeed zone allocation found no sufficiently large free block.
    ZoneExhausted {
        /// Bytes requested by the caller.
        requested: usize,
    },
    /// Low-hunk growth would overrun the space left between the marks.
    HunkOverflow {
        /// Total bytes the allocation needs, header included.
        requested: usize,
        /// Bytes remaining between the low and high marks.
        available: usize,
    },
    /// A hunk rollback was given a mark outside `[0, current usage]`.
    HunkBadMark {
        /// The rejected mark.
        mark: usize,
        /// Current usage of the affected end.
        used: usize,
    },
    /// A hunk walk found a trashed header sentinel or an impossible size.
    HunkCorrupt {
        /// The violated invariant.
        detail: &'static str,
    },
    /// A cache allocation was requested on an owner that is already bound.
    CacheAlreadyBound,
    /// A cache free was requested on an owner that holds nothing.
    CacheNotBound,
    /// A cache allocation was requested with a zero size.
    CacheBadSize,
    /// The cache could not make room even with every entry evicted; the
    /// arena is fundamentally too small for the request.
    CacheExhausted {
        /// Total bytes the entry needs, header included.
        requested: usize,
    },
    /// Rejected startup configuration.
    BadConfig {
        /// What was wrong with it.
        detail: &'static str,
    },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZoneZeroTag => {
                write!(f, "zone alloc: tried to use the reserved 0 tag")
            }
            Self::ZoneBadPointer { offset } => {
                write!(
                    f,
                    "zone free: offset {offset} does not carry the zone identity marker"
                )
            }
            Self::ZoneDoubleFree { offset } => {
                write!(f, "zone free: offset {offset} was already freed")
            }
            Self::ZoneCorrupt { detail } => {
                write!(f, "zone heap corrupt: {detail}")
            }
            Self::ZoneExhausted { requested } => {
                write!(f, "zone alloc: failed on allocation of {requested} bytes")
            }
            Self::HunkOverflow {
                requested,
                available,
            } => {
                write!(
                    f,
                    "hunk alloc: failed on {requested} bytes ({available} available)"
                )
            }
            Self::HunkBadMark { mark, used } => {
                write!(f, "hunk rollback: bad mark {mark} (current usage {used})")
            }
            Self::HunkCorrupt { detail } => {
                write!(f, "hunk corrupt: {detail}")
            }
            Self::CacheAlreadyBound => {
                write!(f, "cache alloc: owner is already allocated")
            }
            Self::CacheNotBound => {
                write!(f, "cache free: owner holds no allocation")
            }
            Self::CacheBadSize => {
                write!(f, "cache alloc: zero-sized allocation")
            }
            Self::CacheExhausted { requested } => {
                write!(
                    f,
                    "cache alloc: out of memory, {requested} bytes exceed the free hunk gap"
                )
            }
            Self::BadConfig { detail } => {
                write!(f, "bad memory configuration: {detail}")
            }
        }
    }
}

impl Error for MemoryError {}

//! The three cooperating allocators over the shared arena.

pub mod cache;
pub mod hunk;
pub mod zone;

pub use cache::{Cache, CacheUser};
pub use hunk::Hunk;
pub use zone::Zone;

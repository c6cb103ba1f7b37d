//! The raw arena: one contiguous byte buffer of fixed total size.
//!
//! Everything else in this crate is carved from an `Arena`. It knows nothing
//! about blocks, hunks, or cache entries; it only offers range-checked byte
//! access, zero-fill, little-endian u32 access for in-band headers, and a
//! non-overlapping block copy built on the bulk-copy primitive.

use std::ops::Range;

use crate::util::copy::bulk_copy;

/// A fixed-size byte buffer backing all three allocators.
pub struct Arena {
    data: Box<[u8]>,
}

impl Arena {
    /// Allocate a zero-filled arena of the given total size.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Adopt a caller-supplied buffer as the arena.
    pub fn from_buffer(buf: Box<[u8]>) -> Self {
        Self { data: buf }
    }

    /// Total size in bytes, fixed for the arena's lifetime.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the arena has zero capacity.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow a byte range.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.data[range]
    }

    /// Borrow a byte range mutably.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn bytes_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.data[range]
    }

    /// Zero-fill a byte range.
    pub fn zero(&mut self, range: Range<usize>) {
        self.data[range].fill(0);
    }

    /// Read a little-endian u32 at `offset`.
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.data[offset..offset + 4]);
        u32::from_le_bytes(word)
    }

    /// Write a little-endian u32 at `offset`.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Copy `len` bytes from `src` to `dst` within the arena.
    ///
    /// # Panics
    ///
    /// Panics if the ranges overlap or run out of bounds.
    pub fn copy_nonoverlapping(&mut self, src: usize, dst: usize, len: usize) {
        if len == 0 {
            return;
        }
        assert!(
            src + len <= dst || dst + len <= src,
            "copy_nonoverlapping: ranges overlap"
        );
        if src < dst {
            let (head, tail) = self.data.split_at_mut(dst);
            bulk_copy(&mut tail[..len], &head[src..src + len]);
        } else {
            let (head, tail) = self.data.split_at_mut(src);
            bulk_copy(&mut head[dst..dst + len], &tail[..len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let arena = Arena::new(256);
        assert_eq!(arena.len(), 256);
        assert!(arena.bytes(0..256).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_u32_round_trip() {
        let mut arena = Arena::new(64);
        arena.write_u32(12, 0x1d4a11);
        assert_eq!(arena.read_u32(12), 0x1d4a11);
    }

    #[test]
    fn test_zero_range() {
        let mut arena = Arena::new(32);
        arena.bytes_mut(0..32).fill(0xAB);
        arena.zero(8..16);
        assert!(arena.bytes(8..16).iter().all(|&b| b == 0));
        assert!(arena.bytes(0..8).iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_copy_forward_and_backward() {
        let mut arena = Arena::new(128);
        for i in 0..16 {
            arena.bytes_mut(i..i + 1)[0] = i as u8;
        }
        arena.copy_nonoverlapping(0, 64, 16);
        assert_eq!(arena.bytes(64..80), arena.bytes(0..16));

        arena.copy_nonoverlapping(64, 32, 16);
        assert_eq!(arena.bytes(32..48), arena.bytes(0..16));
    }

    #[test]
    #[should_panic(expected = "ranges overlap")]
    fn test_overlapping_copy_panics() {
        let mut arena = Arena::new(64);
        arena.copy_nonoverlapping(0, 4, 16);
    }

    #[test]
    fn test_from_buffer() {
        let buf = vec![7u8; 48].into_boxed_slice();
        let arena = Arena::from_buffer(buf);
        assert_eq!(arena.len(), 48);
        assert_eq!(arena.bytes(0..1)[0], 7);
    }
}

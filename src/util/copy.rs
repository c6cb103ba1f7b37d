//! Bulk block-copy primitive.
//!
//! Word-chunked copy used by the cache relocation path and exposed for
//! general bulk copies. Small transfers fall back to a plain byte loop;
//! larger ones run in 8-byte lanes with byte head/tail cleanup.

/// Width of one copy lane in bytes.
const LANE: usize = 8;

/// Copy `src` into `dst`. Both slices must have the same length.
///
/// # Panics
///
/// Panics if the slice lengths differ.
pub fn bulk_copy(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len(), "bulk_copy length mismatch");

    // Not worth setting up lanes for tiny transfers.
    if dst.len() < LANE {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = *s;
        }
        return;
    }

    let lanes = dst.len() / LANE;
    let body = lanes * LANE;

    for (d, s) in dst[..body]
        .chunks_exact_mut(LANE)
        .zip(src[..body].chunks_exact(LANE))
    {
        let mut word = [0u8; LANE];
        word.copy_from_slice(s);
        let w = u64::from_ne_bytes(word);
        d.copy_from_slice(&w.to_ne_bytes());
    }

    // Tail bytes that did not fill a full lane.
    for (d, s) in dst[body..].iter_mut().zip(&src[body..]) {
        *d = *s;
    }
}

//! Small shared helpers: alignment, size units, byte formatting.

pub mod copy;

/// Align a size up to the given (power-of-two) alignment.
#[inline]
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Convert kilobytes to bytes.
#[inline]
pub const fn kb(n: usize) -> usize {
    n * 1024
}

/// Convert megabytes to bytes.
#[inline]
pub const fn mb(n: usize) -> usize {
    n * 1024 * 1024
}

/// Format bytes as a human-readable string.
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

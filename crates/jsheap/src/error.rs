//! Error types.
//!
//! The memory manager itself treats allocation failure as fatal; these
//! errors surface from the arena-level [`Heap`](crate::heap::Heap) API and
//! from configuration validation.

use std::fmt;

/// Failure to obtain memory for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The operating system refused to provide `requested` bytes.
    OutOfMemory {
        /// Bytes requested from the OS.
        requested: usize,
    },
    /// A payload layout that cannot be placed in the heap.
    UnsupportedLayout {
        /// Payload size in bytes.
        size: usize,
        /// Payload alignment in bytes.
        align: usize,
    },
}

impl AllocError {
    /// Bytes of memory involved in the failed request.
    #[must_use]
    pub const fn requested(&self) -> usize {
        match self {
            Self::OutOfMemory { requested } => *requested,
            Self::UnsupportedLayout { size, .. } => *size,
        }
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory while requesting {requested} bytes")
            }
            Self::UnsupportedLayout { size, align } => write!(
                f,
                "unsupported object layout (size {size}, align {align}); \
                 payload alignment may not exceed {}",
                crate::header::MAX_PAYLOAD_ALIGN
            ),
        }
    }
}

impl std::error::Error for AllocError {}

/// An inconsistent [`HeapConfig`](crate::HeapConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `base_chunk_size` cannot hold even one large-threshold item.
    ChunkTooSmall {
        /// Configured base chunk size.
        base_chunk_size: usize,
        /// Configured large object threshold.
        large_object_threshold: usize,
    },
    /// `large_object_threshold` is not a multiple of 16 in `32..=512`.
    BadLargeObjectThreshold(usize),
    /// `max_chunk_shift` would overflow the chunk size.
    ShiftTooLarge(u32),
    /// A heuristic factor of zero.
    ZeroFactor(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChunkTooSmall {
                base_chunk_size,
                large_object_threshold,
            } => write!(
                f,
                "base chunk size {base_chunk_size} is smaller than the large object threshold {large_object_threshold}"
            ),
            Self::BadLargeObjectThreshold(size) => write!(
                f,
                "large object threshold {size} must be a multiple of 16 between 32 and 512"
            ),
            Self::ShiftTooLarge(shift) => write!(f, "max chunk shift {shift} overflows the chunk size"),
            Self::ZeroFactor(name) => write!(f, "{name} must be non-zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_error_display() {
        let err = AllocError::OutOfMemory { requested: 4096 };
        assert_eq!(err.to_string(), "out of memory while requesting 4096 bytes");
        assert_eq!(err.requested(), 4096);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ZeroFactor("threshold_bump_factor");
        assert_eq!(err.to_string(), "threshold_bump_factor must be non-zero");
    }
}

//! Tunables for the allocator and collector.
//!
//! The numeric defaults are heuristics, not correctness constants. Each of
//! them can be changed per heap instance.

use crate::error::ConfigError;

/// Default base chunk size (32 KiB).
pub const DEFAULT_BASE_CHUNK_SIZE: usize = 32 * 1024;
/// Default cap on the per-class chunk growth shift.
pub const DEFAULT_MAX_CHUNK_SHIFT: u32 = 11;
/// Objects of this many bytes or more bypass the size classes.
pub const DEFAULT_LARGE_OBJECT_THRESHOLD: usize = 512;
/// Large-object bytes allocated since the last collection that force a GC.
pub const DEFAULT_LARGE_OBJECT_GC_CAP: usize = 8 * 1024 * 1024;
/// Initial (and minimum) unmanaged-heap GC threshold.
pub const DEFAULT_MIN_UNMANAGED_THRESHOLD: usize = 128 * 1024;
/// Minimum step when the threshold is bumped for a near-miss.
pub const DEFAULT_THRESHOLD_MIN_BUMP: usize = 8 * 1024;
/// Multiplier applied to the request size for near-miss detection.
pub const DEFAULT_THRESHOLD_BUMP_FACTOR: usize = 5;
/// Usage at or below `threshold / divisor` shrinks the threshold.
pub const DEFAULT_THRESHOLD_SHRINK_DIVISOR: usize = 4;

/// Number of size classes (index `size >> 4`).
pub const NUM_SIZE_CLASSES: usize = DEFAULT_LARGE_OBJECT_THRESHOLD >> 4;

/// Environment variable enabling a full collection on every allocation.
pub const ENV_AGGRESSIVE_GC: &str = "JSHEAP_AGGRESSIVE_GC";
/// Environment variable enabling per-collection statistics logging.
pub const ENV_STATS: &str = "JSHEAP_STATS";
/// Environment variable overriding the maximum chunk growth shift.
pub const ENV_MAX_CHUNK_SHIFT: &str = "JSHEAP_MAX_CHUNK_SHIFT";
/// Environment variable overriding the base chunk size in bytes.
pub const ENV_CHUNK_SIZE: &str = "JSHEAP_CHUNK_SIZE";

/// Configuration for a [`MemoryManager`](crate::MemoryManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Size of the first chunk of every size class, before page rounding.
    pub base_chunk_size: usize,
    /// Chunk `n` of a class is `base_chunk_size << min(n, max_chunk_shift)`.
    pub max_chunk_shift: u32,
    /// Objects at least this large go to the large object store.
    pub large_object_threshold: usize,
    /// Large-object bytes since the last GC that trigger a collection.
    pub large_object_gc_cap: usize,
    /// Initial unmanaged-heap threshold; the threshold never shrinks below it.
    pub min_unmanaged_threshold: usize,
    /// Minimum threshold increase after a near-miss.
    pub threshold_min_bump: usize,
    /// Near-miss window, as a multiple of the request size.
    pub threshold_bump_factor: usize,
    /// Shrink the threshold when usage is at most `threshold / divisor`.
    pub threshold_shrink_divisor: usize,
    /// Run a full collection before every allocation. Debugging aid.
    pub aggressive_gc: bool,
    /// Log statistics after every collection.
    pub stats: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Configuration with every tunable at its default.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base_chunk_size: DEFAULT_BASE_CHUNK_SIZE,
            max_chunk_shift: DEFAULT_MAX_CHUNK_SHIFT,
            large_object_threshold: DEFAULT_LARGE_OBJECT_THRESHOLD,
            large_object_gc_cap: DEFAULT_LARGE_OBJECT_GC_CAP,
            min_unmanaged_threshold: DEFAULT_MIN_UNMANAGED_THRESHOLD,
            threshold_min_bump: DEFAULT_THRESHOLD_MIN_BUMP,
            threshold_bump_factor: DEFAULT_THRESHOLD_BUMP_FACTOR,
            threshold_shrink_divisor: DEFAULT_THRESHOLD_SHRINK_DIVISOR,
            aggressive_gc: false,
            stats: false,
        }
    }

    /// Defaults overridden by the `JSHEAP_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_AGGRESSIVE_GC) {
            match parse_flag(&raw) {
                Some(on) => self.aggressive_gc = on,
                None => crate::tracing::warn_bad_override(ENV_AGGRESSIVE_GC, &raw),
            }
        }
        if let Some(raw) = lookup(ENV_STATS) {
            match parse_flag(&raw) {
                Some(on) => self.stats = on,
                None => crate::tracing::warn_bad_override(ENV_STATS, &raw),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_CHUNK_SHIFT) {
            match raw.trim().parse::<u32>() {
                Ok(shift) => self.max_chunk_shift = shift,
                Err(_) => crate::tracing::warn_bad_override(ENV_MAX_CHUNK_SHIFT, &raw),
            }
        }
        if let Some(raw) = lookup(ENV_CHUNK_SIZE) {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => self.base_chunk_size = size,
                _ => crate::tracing::warn_bad_override(ENV_CHUNK_SIZE, &raw),
            }
        }
        self
    }

    /// Sets the base chunk size.
    #[must_use]
    pub const fn base_chunk_size(mut self, size: usize) -> Self {
        self.base_chunk_size = size;
        self
    }

    /// Sets the maximum chunk growth shift.
    #[must_use]
    pub const fn max_chunk_shift(mut self, shift: u32) -> Self {
        self.max_chunk_shift = shift;
        self
    }

    /// Sets the large object threshold.
    #[must_use]
    pub const fn large_object_threshold(mut self, size: usize) -> Self {
        self.large_object_threshold = size;
        self
    }

    /// Sets the large-object byte cap that forces a collection.
    #[must_use]
    pub const fn large_object_gc_cap(mut self, bytes: usize) -> Self {
        self.large_object_gc_cap = bytes;
        self
    }

    /// Sets the initial and minimum unmanaged-heap threshold.
    #[must_use]
    pub const fn min_unmanaged_threshold(mut self, bytes: usize) -> Self {
        self.min_unmanaged_threshold = bytes;
        self
    }

    /// Enables or disables a collection on every allocation.
    #[must_use]
    pub const fn aggressive_gc(mut self, on: bool) -> Self {
        self.aggressive_gc = on;
        self
    }

    /// Enables or disables statistics logging.
    #[must_use]
    pub const fn stats(mut self, on: bool) -> Self {
        self.stats = on;
        self
    }

    /// Check that the tunables are mutually consistent.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.large_object_threshold;
        if threshold < 32 || threshold > DEFAULT_LARGE_OBJECT_THRESHOLD || threshold % 16 != 0 {
            return Err(ConfigError::BadLargeObjectThreshold(threshold));
        }
        if self.base_chunk_size < threshold {
            return Err(ConfigError::ChunkTooSmall {
                base_chunk_size: self.base_chunk_size,
                large_object_threshold: threshold,
            });
        }
        if self.max_chunk_shift > self.base_chunk_size.leading_zeros() {
            return Err(ConfigError::ShiftTooLarge(self.max_chunk_shift));
        }
        if self.threshold_bump_factor == 0 {
            return Err(ConfigError::ZeroFactor("threshold_bump_factor"));
        }
        if self.threshold_shrink_divisor == 0 {
            return Err(ConfigError::ZeroFactor("threshold_shrink_divisor"));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = HeapConfig::default();
        assert_eq!(config.base_chunk_size, 32 * 1024);
        assert_eq!(config.max_chunk_shift, 11);
        assert_eq!(config.large_object_threshold, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_apply() {
        let config = HeapConfig::new().with_overrides(env(&[
            (ENV_AGGRESSIVE_GC, "1"),
            (ENV_STATS, "true"),
            (ENV_MAX_CHUNK_SHIFT, "3"),
            (ENV_CHUNK_SIZE, "65536"),
        ]));
        assert!(config.aggressive_gc);
        assert!(config.stats);
        assert_eq!(config.max_chunk_shift, 3);
        assert_eq!(config.base_chunk_size, 65536);
    }

    #[test]
    fn test_bad_overrides_are_ignored() {
        let config = HeapConfig::new().with_overrides(env(&[
            (ENV_AGGRESSIVE_GC, "maybe"),
            (ENV_MAX_CHUNK_SHIFT, "-2"),
            (ENV_CHUNK_SIZE, "0"),
        ]));
        assert_eq!(config, HeapConfig::new());
    }

    #[test]
    fn test_validate_rejects_inconsistent_settings() {
        assert_eq!(
            HeapConfig::new().large_object_threshold(1000).validate(),
            Err(ConfigError::BadLargeObjectThreshold(1000))
        );
        assert!(matches!(
            HeapConfig::new().base_chunk_size(64).validate(),
            Err(ConfigError::ChunkTooSmall { .. })
        ));
        assert_eq!(
            HeapConfig::new().max_chunk_shift(200).validate(),
            Err(ConfigError::ShiftTooLarge(200))
        );
    }
}

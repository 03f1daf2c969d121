//! Unmanaged-memory trigger.
//!
//! Tracks bytes owned by heap objects but allocated outside the heap and
//! decides when they justify a collection. After each collection the limit
//! is adjusted: doubled under sustained pressure, halved when usage is low,
//! bumped when a request would land just under it.

use crate::config::HeapConfig;

#[derive(Debug, Clone)]
pub struct UnmanagedThreshold {
    usage: usize,
    limit: usize,
    floor: usize,
    min_bump: usize,
    bump_factor: usize,
    shrink_divisor: usize,
}

impl UnmanagedThreshold {
    pub const fn new(config: &HeapConfig) -> Self {
        Self {
            usage: 0,
            limit: config.min_unmanaged_threshold,
            floor: config.min_unmanaged_threshold,
            min_bump: config.threshold_min_bump,
            bump_factor: config.threshold_bump_factor,
            shrink_divisor: config.threshold_shrink_divisor,
        }
    }

    pub const fn usage(&self) -> usize {
        self.usage
    }

    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Record `bytes` of new unmanaged memory. Returns whether usage now
    /// exceeds the limit.
    pub fn add(&mut self, bytes: usize) -> bool {
        self.usage = self.usage.saturating_add(bytes);
        self.exceeded()
    }

    pub const fn exceeded(&self) -> bool {
        self.usage > self.limit
    }

    /// Grow or shrink usage in place. Usage never drops below zero.
    pub fn change(&mut self, delta: isize) {
        self.usage = self.usage.saturating_add_signed(delta);
    }

    /// Forget `bytes` released by a reclaimed object.
    pub fn release(&mut self, bytes: usize) {
        debug_assert!(bytes <= self.usage, "unmanaged usage underflow");
        self.usage = self.usage.saturating_sub(bytes);
    }

    /// Move the limit after a collection. `requested` is the unmanaged size
    /// of the allocation that fired it, or 0.
    pub fn adjust_after_collection(&mut self, requested: usize) {
        let requested_scaled = requested.saturating_mul(self.bump_factor);
        if self.usage >= self.limit {
            self.limit = self.limit.max(self.usage).saturating_mul(2);
        } else if self.usage.saturating_mul(self.shrink_divisor) <= self.limit {
            self.limit = (self.limit / 2).max(self.floor);
        } else if self.limit - self.usage < requested_scaled {
            self.limit = self
                .limit
                .saturating_add(self.min_bump.max(requested_scaled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold() -> UnmanagedThreshold {
        UnmanagedThreshold::new(&HeapConfig::new().min_unmanaged_threshold(1000))
    }

    #[test]
    fn test_add_reports_exceeded() {
        let mut t = threshold();
        assert!(!t.add(1000));
        assert!(t.add(1));
        assert_eq!(t.usage(), 1001);
    }

    #[test]
    fn test_doubles_under_sustained_pressure() {
        let mut t = threshold();
        t.add(1500);
        t.adjust_after_collection(1500);
        assert_eq!(t.limit(), 3000);
        t.add(2000);
        t.adjust_after_collection(2000);
        assert_eq!(t.limit(), 7000);
    }

    #[test]
    fn test_halves_when_usage_is_low_but_keeps_floor() {
        let mut t = threshold();
        t.add(5000);
        t.adjust_after_collection(0);
        assert_eq!(t.limit(), 10_000);
        t.release(5000);
        t.adjust_after_collection(0);
        assert_eq!(t.limit(), 5000);
        t.adjust_after_collection(0);
        t.adjust_after_collection(0);
        t.adjust_after_collection(0);
        assert_eq!(t.limit(), 1000);
    }

    #[test]
    fn test_bumps_when_request_lands_near_limit() {
        let mut t = threshold();
        t.add(900);
        // 100 bytes of headroom, 5 * 50 requested.
        t.adjust_after_collection(50);
        assert_eq!(t.limit(), 1000 + 8 * 1024);
    }

    #[test]
    fn test_unchanged_in_comfortable_band() {
        let mut t = threshold();
        t.add(500);
        t.adjust_after_collection(10);
        assert_eq!(t.limit(), 1000);
    }

    #[test]
    fn test_change_and_release_saturate() {
        let mut t = threshold();
        t.add(100);
        t.change(50);
        assert_eq!(t.usage(), 150);
        t.change(-500);
        assert_eq!(t.usage(), 0);
    }
}

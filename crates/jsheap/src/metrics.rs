//! Collection metrics and heap diagnostics.

use std::time::{Duration, Instant};

/// What caused a collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GcTrigger {
    /// No collection has run yet.
    #[default]
    None,
    /// The host called `run_gc`.
    Explicit,
    /// Aggressive mode collects before every allocation.
    Aggressive,
    /// Unmanaged bytes exceeded their threshold.
    Unmanaged,
    /// Too many large-object bytes since the last collection.
    LargeObjects,
    /// A size class ran dry while most of its items were recently allocated.
    SizeClassPressure,
}

impl GcTrigger {
    /// Short label used in log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Explicit => "explicit",
            Self::Aggressive => "aggressive",
            Self::Unmanaged => "unmanaged",
            Self::LargeObjects => "large_objects",
            Self::SizeClassPressure => "size_class_pressure",
        }
    }
}

/// Statistics from the most recent collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcMetrics {
    /// Wall time of the whole cycle.
    pub duration: Duration,
    /// Duration of the mark phase.
    pub mark_duration: Duration,
    /// Duration of the sweep phase, including weak handles and deletables.
    pub sweep_duration: Duration,
    /// Objects reached by marking.
    pub objects_marked: usize,
    /// Objects that survived the sweep.
    pub objects_surviving: usize,
    /// Objects destroyed by the sweep.
    pub objects_reclaimed: usize,
    /// Item bytes (chunk items and large objects) returned to the allocator.
    pub bytes_reclaimed: usize,
    /// Unmanaged bytes released with the reclaimed objects.
    pub unmanaged_released: usize,
    /// Empty chunks handed back to the OS.
    pub chunks_released: usize,
    /// Weak handles whose target died and were reset to undefined.
    pub weak_handles_reset: usize,
    /// Host deletables invoked after the sweep.
    pub deletables_run: usize,
    /// What started the cycle.
    pub trigger: GcTrigger,
    /// Collections run by this heap so far, including this one.
    pub total_collections: usize,
}

/// Captures mark and sweep durations within one cycle.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimer {
    /// Accumulated mark phase time.
    pub mark: Duration,
    /// Accumulated sweep phase time.
    pub sweep: Duration,
    current_start: Option<Instant>,
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTimer {
    /// Create a timer with both durations at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mark: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the mark phase and record its duration.
    pub fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark += start.elapsed();
        }
    }

    /// End the sweep phase and record its duration.
    pub fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep += start.elapsed();
        }
    }
}

/// Diagnostics for one size class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeClassStats {
    /// Bytes per item.
    pub item_size: usize,
    /// Chunks currently owned by the class.
    pub chunks: usize,
    /// Items across all chunks.
    pub total_items: usize,
    /// Items holding live objects.
    pub items_in_use: usize,
    /// Allocations since the last collection.
    pub allocations_since_gc: usize,
    /// Allocations over the heap's lifetime.
    pub total_allocations: usize,
}

/// Snapshot of heap occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// One entry per size class, indexed by `item_size >> 4` (entry 0 unused).
    pub size_classes: Vec<SizeClassStats>,
    /// Bytes obtained for chunks plus bytes held by large objects.
    pub allocated_bytes: usize,
    /// Bytes of in-use chunk items plus bytes held by large objects.
    pub used_bytes: usize,
    /// Live large objects.
    pub large_objects: usize,
    /// Bytes held by large objects.
    pub large_object_bytes: usize,
    /// Current unmanaged byte total.
    pub unmanaged_bytes: usize,
    /// Current unmanaged GC threshold.
    pub unmanaged_threshold: usize,
}

impl HeapStats {
    /// Total chunks across all size classes.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.size_classes.iter().map(|c| c.chunks).sum()
    }

    /// Stats for the class serving `item_size`-byte items.
    #[must_use]
    pub fn class_for(&self, item_size: usize) -> Option<&SizeClassStats> {
        self.size_classes.get(item_size >> 4)
    }
}

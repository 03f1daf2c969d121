//! Structured logging for collection cycles.
//!
//! With the `tracing` feature enabled these helpers emit spans and events;
//! without it they compile to nothing.

use crate::metrics::{GcMetrics, HeapStats};

/// High-level GC phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    /// Trace the live object graph.
    Mark,
    /// Reclaim unreachable objects.
    Sweep,
}

/// Stable identifier for a collection cycle, used to correlate its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcId(pub u64);

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    use super::{GcId, GcPhase};

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering one collection cycle.
    pub fn trace_gc_collection(trigger: &str, gc_id: GcId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_collect", trigger = trigger, gc_id = gc_id.0).entered()
    }

    pub fn log_phase_start(phase: GcPhase, heap_bytes: usize) {
        tracing::debug!(phase = ?phase, heap_bytes, "phase_start");
    }

    pub fn log_phase_end(phase: GcPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_end");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    use super::{GcId, GcPhase};

    pub const fn next_gc_id() -> GcId {
        GcId(0)
    }

    pub struct NoSpan;

    pub const fn trace_gc_collection(_trigger: &str, _gc_id: GcId) -> NoSpan {
        NoSpan
    }

    pub const fn log_phase_start(_phase: GcPhase, _heap_bytes: usize) {}

    pub const fn log_phase_end(_phase: GcPhase, _objects: usize) {}
}

pub use internal::{log_phase_end, log_phase_start, next_gc_id, trace_gc_collection};

/// Per-cycle summary, emitted when statistics are enabled.
#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
pub fn log_cycle_stats(metrics: &GcMetrics, stats: &HeapStats) {
    #[cfg(feature = "tracing")]
    tracing::info!(
        target: "jsheap::gc",
        collection = metrics.total_collections,
        trigger = ?metrics.trigger,
        mark_us = metrics.mark_duration.as_micros() as u64,
        sweep_us = metrics.sweep_duration.as_micros() as u64,
        objects_marked = metrics.objects_marked,
        objects_reclaimed = metrics.objects_reclaimed,
        bytes_reclaimed = metrics.bytes_reclaimed,
        chunks_released = metrics.chunks_released,
        weak_handles_reset = metrics.weak_handles_reset,
        allocated_bytes = stats.allocated_bytes,
        used_bytes = stats.used_bytes,
        large_object_bytes = stats.large_object_bytes,
        unmanaged_bytes = stats.unmanaged_bytes,
        unmanaged_threshold = stats.unmanaged_threshold,
        "GC cycle complete"
    );
}

/// One line per populated size class plus a heap summary.
#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
pub fn log_heap_stats(stats: &HeapStats) {
    #[cfg(feature = "tracing")]
    {
        for class in stats.size_classes.iter().filter(|c| c.total_allocations > 0 || c.chunks > 0) {
            tracing::info!(
                target: "jsheap::stats",
                item_size = class.item_size,
                chunks = class.chunks,
                items = class.total_items,
                in_use = class.items_in_use,
                allocations = class.total_allocations,
                "size class"
            );
        }
        tracing::info!(
            target: "jsheap::stats",
            allocated_bytes = stats.allocated_bytes,
            used_bytes = stats.used_bytes,
            large_objects = stats.large_objects,
            large_object_bytes = stats.large_object_bytes,
            "heap"
        );
    }
}

/// Report an environment override that could not be parsed.
#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
pub fn warn_bad_override(name: &str, value: &str) {
    #[cfg(feature = "tracing")]
    tracing::warn!(target: "jsheap::config", variable = name, value, "ignoring malformed override");
}

/// Report an environment configuration that failed validation.
#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
pub fn warn_invalid_config(error: &crate::error::ConfigError) {
    #[cfg(feature = "tracing")]
    tracing::warn!(target: "jsheap::config", %error, "falling back to default heap configuration");
}

/// Report an allocation failure just before aborting.
#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
pub fn log_alloc_failure(error: &crate::error::AllocError) {
    #[cfg(feature = "tracing")]
    tracing::error!(target: "jsheap::alloc", %error, "heap allocation failed");
}

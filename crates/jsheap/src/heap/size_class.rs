//! Per-size-class chunk lists and counters.

use std::ptr::NonNull;

use crate::header::ObjectHeader;
use crate::metrics::SizeClassStats;

use super::chunk::Chunk;
use super::SweepStats;

/// All chunks serving one item size.
#[derive(Debug)]
pub struct SizeClass {
    item_size: usize,
    chunks: Vec<Chunk>,
    /// Indices into `chunks` that may still have free items; allocation
    /// takes from the back.
    with_free: Vec<usize>,
    /// Chunks ever created for this class. Drives geometric growth and is
    /// never reset.
    chunks_created: u32,
    total_items: usize,
    allocations_since_gc: usize,
    total_allocations: usize,
    /// Items in use when the most recent sweep began.
    in_use_at_cycle_start: usize,
}

impl SizeClass {
    pub const fn new(item_size: usize) -> Self {
        Self {
            item_size,
            chunks: Vec::new(),
            with_free: Vec::new(),
            chunks_created: 0,
            total_items: 0,
            allocations_since_gc: 0,
            total_allocations: 0,
            in_use_at_cycle_start: 0,
        }
    }

    pub const fn item_size(&self) -> usize {
        self.item_size
    }

    pub const fn total_items(&self) -> usize {
        self.total_items
    }

    pub const fn allocations_since_gc(&self) -> usize {
        self.allocations_since_gc
    }

    pub const fn chunks_created(&self) -> u32 {
        self.chunks_created
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn items_in_use(&self) -> usize {
        self.chunks.iter().map(Chunk::in_use).sum()
    }

    /// Hand out a free item, if any chunk has one.
    pub fn pop_free(&mut self) -> Option<NonNull<ObjectHeader>> {
        while let Some(&index) = self.with_free.last() {
            if let Some(item) = self.chunks[index].pop_free() {
                self.allocations_since_gc += 1;
                self.total_allocations += 1;
                return Some(item);
            }
            self.with_free.pop();
        }
        None
    }

    /// Register a freshly mapped chunk.
    pub fn add_chunk(&mut self, chunk: Chunk) {
        debug_assert_eq!(chunk.item_size(), self.item_size);
        self.total_items += chunk.capacity();
        self.chunks_created += 1;
        self.chunks.push(chunk);
        self.with_free.push(self.chunks.len() - 1);
    }

    /// The chunk whose first item is at `start`.
    pub fn chunk_starting_at(&self, start: usize) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.start() == start)
    }

    /// Sweep every chunk, then release empty chunks the class can spare.
    ///
    /// An empty chunk is released only while the remaining items still cover
    /// everything that was in use when the sweep began, so a workload that
    /// repeatedly fills and drops the same volume keeps its chunks.
    /// Start addresses of released chunks are appended to `released`.
    pub fn sweep(&mut self, stats: &mut SweepStats, released: &mut Vec<usize>) {
        let mut in_use_before = 0;
        for chunk in &mut self.chunks {
            in_use_before += chunk.sweep(stats).in_use_before;
        }
        self.in_use_at_cycle_start = in_use_before;

        let mut total_items = self.total_items;
        self.chunks.retain(|chunk| {
            let spare = total_items.saturating_sub(chunk.capacity()) >= in_use_before;
            if chunk.is_empty() && spare {
                total_items -= chunk.capacity();
                released.push(chunk.start());
                stats.chunks_released += 1;
                false
            } else {
                true
            }
        });
        self.total_items = total_items;
        self.rebuild_free_list();
    }

    /// Destroy every object and release every chunk.
    pub fn destroy_all(&mut self, stats: &mut SweepStats, released: &mut Vec<usize>) {
        for chunk in &mut self.chunks {
            chunk.destroy_all(stats);
        }
        for chunk in self.chunks.drain(..) {
            released.push(chunk.start());
            stats.chunks_released += 1;
        }
        self.with_free.clear();
        self.total_items = 0;
    }

    pub fn clear_marks(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear_marks();
        }
    }

    pub fn reset_allocation_counter(&mut self) {
        self.allocations_since_gc = 0;
    }

    fn rebuild_free_list(&mut self) {
        self.with_free.clear();
        // Later chunks are larger; fill the earliest ones first.
        self.with_free.extend(
            self.chunks
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, c)| c.has_free())
                .map(|(i, _)| i),
        );
    }

    pub fn mapped_bytes(&self) -> usize {
        self.chunks.iter().map(Chunk::mapped_bytes).sum()
    }

    pub fn stats(&self) -> SizeClassStats {
        SizeClassStats {
            item_size: self.item_size,
            chunks: self.chunks.len(),
            total_items: self.total_items,
            items_in_use: self.items_in_use(),
            allocations_since_gc: self.allocations_since_gc,
            total_allocations: self.total_allocations,
        }
    }
}

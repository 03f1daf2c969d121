//! Segregated free-list allocator.
//!
//! Objects smaller than the large-object threshold live in chunks, one
//! size class per 16-byte item size. A chunk is an OS page region carved
//! into equal items; free items are linked by index through their headers.
//! Larger objects go to a separate large object store.
//!
//! The heap never collects on its own. [`Heap::try_allocate`] only hands out
//! memory; deciding when to run a collection is the memory manager's job.

use std::collections::BTreeMap;
use std::ptr::NonNull;

use crate::config::{HeapConfig, NUM_SIZE_CLASSES};
use crate::error::{AllocError, ConfigError};
use crate::header::{round_object_size, ObjectHeader};
use crate::metrics::{HeapStats, SizeClassStats};

mod chunk;
mod large;
mod size_class;

use chunk::Chunk;
use large::LargeObjectStore;
use size_class::SizeClass;

/// Totals accumulated by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Objects that survived.
    pub objects_live: usize,
    /// Objects destroyed.
    pub objects_reclaimed: usize,
    /// Item bytes returned to the allocator.
    pub bytes_reclaimed: usize,
    /// Unmanaged bytes the destroyed objects carried.
    pub unmanaged_released: usize,
    /// Chunks returned to the OS.
    pub chunks_released: usize,
}

/// Chunked heap plus large object store.
#[derive(Debug)]
pub struct Heap {
    /// Index `size >> 4`; entry 0 is never used.
    classes: Vec<SizeClass>,
    /// Chunk start address to size class index.
    chunk_index: BTreeMap<usize, usize>,
    large: LargeObjectStore,
    base_chunk_size: usize,
    max_chunk_shift: u32,
    large_object_threshold: usize,
}

impl Heap {
    /// Create an empty heap. No memory is mapped until the first allocation.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] reported by [`HeapConfig::validate`].
    pub fn new(config: &HeapConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: &HeapConfig) -> Self {
        Self {
            classes: (0..NUM_SIZE_CLASSES).map(|i| SizeClass::new(i << 4)).collect(),
            chunk_index: BTreeMap::new(),
            large: LargeObjectStore::new(),
            base_chunk_size: config.base_chunk_size,
            max_chunk_shift: config.max_chunk_shift,
            large_object_threshold: config.large_object_threshold,
        }
    }

    /// Size class index for an object of `size` bytes, or `None` for large objects.
    #[must_use]
    pub const fn size_class_index(&self, size: usize) -> Option<usize> {
        let size = round_object_size(size);
        if size >= self.large_object_threshold {
            None
        } else {
            Some(size >> 4)
        }
    }

    /// Whether `size` bytes would be served by the large object store.
    #[must_use]
    pub const fn is_large(&self, size: usize) -> bool {
        self.size_class_index(size).is_none()
    }

    /// Allocate a zeroed item of at least `size` bytes without collecting.
    ///
    /// Maps a new chunk when the size class is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] when the OS refuses more memory.
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<ObjectHeader>, AllocError> {
        let size = round_object_size(size);
        match self.size_class_index(size) {
            None => self.allocate_large(size),
            Some(class) => {
                if let Some(item) = self.pop_free(class) {
                    return Ok(item);
                }
                self.grow(class)?;
                self.pop_free(class)
                    .ok_or(AllocError::OutOfMemory { requested: size })
            }
        }
    }

    /// Take a free item from `class` if one exists.
    pub fn pop_free(&mut self, class: usize) -> Option<NonNull<ObjectHeader>> {
        self.classes[class].pop_free()
    }

    /// Map one more chunk for `class`.
    ///
    /// Chunk `n` of a class spans `base_chunk_size << min(n, max_chunk_shift)`
    /// bytes, rounded up to whole pages.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] when the mapping fails.
    pub fn grow(&mut self, class: usize) -> Result<(), AllocError> {
        let size_class = &mut self.classes[class];
        let shift = size_class.chunks_created().min(self.max_chunk_shift);
        let len = os_pages::round_to_pages(self.base_chunk_size << shift);
        let chunk = Chunk::new(size_class.item_size(), len)
            .map_err(|_| AllocError::OutOfMemory { requested: len })?;
        self.chunk_index.insert(chunk.start(), class);
        size_class.add_chunk(chunk);
        Ok(())
    }

    /// Allocate a zeroed object through the large object store.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] when the system allocator fails.
    pub fn allocate_large(&mut self, size: usize) -> Result<NonNull<ObjectHeader>, AllocError> {
        self.large.allocate(round_object_size(size))
    }

    /// Whether `class` is under allocation pressure: more than half of its
    /// items, and more than half of all chunked items, were handed out since
    /// the last collection.
    #[must_use]
    pub fn under_pressure(&self, class: usize) -> bool {
        let size_class = &self.classes[class];
        let (allocated, items) = self
            .classes
            .iter()
            .fold((0, 0), |(a, i), c| (a + c.allocations_since_gc(), i + c.total_items()));
        size_class.allocations_since_gc() > size_class.total_items() / 2 && allocated > items / 2
    }

    /// Large-object bytes allocated since the last collection.
    #[must_use]
    pub const fn large_bytes_since_gc(&self) -> usize {
        self.large.bytes_since_gc()
    }

    /// Reset the "since last collection" counters.
    pub fn reset_allocation_counters(&mut self) {
        for class in &mut self.classes {
            class.reset_allocation_counter();
        }
        self.large.reset_allocation_counter();
    }

    /// Locate the in-use object whose header starts at `addr`.
    ///
    /// Accepts arbitrary addresses, including stale references into released
    /// chunks.
    #[must_use]
    pub fn find_object(&self, addr: usize) -> Option<NonNull<ObjectHeader>> {
        let header = if self.large.contains(addr) {
            NonNull::new(addr as *mut ObjectHeader)?
        } else {
            let (&start, &class) = self.chunk_index.range(..=addr).next_back()?;
            self.classes[class].chunk_starting_at(start)?.item_at(addr)?
        };
        // SAFETY: the address is the header of an item in a live chunk or a
        // live large object.
        unsafe { (*header.as_ptr()).is_in_use() }.then_some(header)
    }

    /// Bytes of the item holding the in-use object at `addr`.
    #[must_use]
    pub fn item_size_of(&self, addr: usize) -> Option<usize> {
        self.find_object(addr)?;
        if self.large.contains(addr) {
            return None;
        }
        let (_, &class) = self.chunk_index.range(..=addr).next_back()?;
        Some(self.classes[class].item_size())
    }

    /// Reclaim every unmarked object and clear marks on the survivors.
    pub fn sweep(&mut self) -> SweepStats {
        let mut stats = SweepStats::default();
        let mut released = Vec::new();
        for class in &mut self.classes {
            class.sweep(&mut stats, &mut released);
        }
        for start in released {
            self.chunk_index.remove(&start);
        }
        self.large.sweep(&mut stats);
        stats
    }

    /// Clear every mark bit in chunks and large objects.
    pub fn clear_marks(&mut self) {
        for class in &mut self.classes {
            class.clear_marks();
        }
        self.large.clear_marks();
    }

    /// Destroy every object and return all memory. The heap stays usable.
    pub fn destroy_all(&mut self) -> SweepStats {
        let mut stats = SweepStats::default();
        let mut released = Vec::new();
        for class in &mut self.classes {
            class.destroy_all(&mut stats, &mut released);
        }
        self.chunk_index.clear();
        self.large.destroy_all(&mut stats);
        stats
    }

    /// Bytes of in-use chunk items plus large-object bytes.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        let items: usize = self
            .classes
            .iter()
            .map(|c| c.items_in_use() * c.item_size())
            .sum();
        items + self.large.bytes()
    }

    /// Occupancy snapshot. Unmanaged fields are left at zero.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let size_classes: Vec<SizeClassStats> = self.classes.iter().map(SizeClass::stats).collect();
        let chunk_bytes: usize = self.classes.iter().map(SizeClass::mapped_bytes).sum();
        HeapStats {
            size_classes,
            allocated_bytes: chunk_bytes + self.large.bytes(),
            used_bytes: self.used_bytes(),
            large_objects: self.large.len(),
            large_object_bytes: self.large.bytes(),
            unmanaged_bytes: 0,
            unmanaged_threshold: 0,
        }
    }

    /// Chunks currently mapped for the class serving `size`-byte objects.
    #[must_use]
    pub fn chunk_count(&self, size: usize) -> usize {
        self.size_class_index(size)
            .map_or(0, |class| self.classes[class].chunks().len())
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::from_valid(&HeapConfig::new())
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ObjectClass;

    static LEAF: ObjectClass = ObjectClass::leaf("leaf");

    fn heap() -> Heap {
        Heap::new(&HeapConfig::new().base_chunk_size(4096).max_chunk_shift(2)).unwrap()
    }

    #[test]
    fn test_new_rejects_inconsistent_config() {
        let err = Heap::new(&HeapConfig::new().large_object_threshold(1024)).unwrap_err();
        assert_eq!(err, ConfigError::BadLargeObjectThreshold(1024));
        assert!(Heap::new(&HeapConfig::new().max_chunk_shift(64)).is_err());

        let mut heap = Heap::default();
        assert_eq!(heap.size_class_index(496), Some(31));
        assert!(heap.is_large(512));
        allocate(&mut heap, 496);
    }

    fn allocate(heap: &mut Heap, size: usize) -> NonNull<ObjectHeader> {
        let item = heap.try_allocate(size).unwrap();
        unsafe { (*item.as_ptr()).init_in_use(&LEAF, 0) };
        item
    }

    #[test]
    fn test_size_class_routing() {
        let heap = heap();
        assert_eq!(heap.size_class_index(1), Some(1));
        assert_eq!(heap.size_class_index(16), Some(1));
        assert_eq!(heap.size_class_index(17), Some(2));
        assert_eq!(heap.size_class_index(496), Some(31));
        assert_eq!(heap.size_class_index(497), None);
        assert_eq!(heap.size_class_index(512), None);
        assert!(heap.is_large(100_000));
    }

    #[test]
    fn test_item_size_matches_request() {
        let mut heap = heap();
        for size in [16, 24, 48, 100, 496] {
            let item = allocate(&mut heap, size);
            let item_size = heap.item_size_of(item.as_ptr() as usize).unwrap();
            assert_eq!(item_size, round_object_size(size));
        }
    }

    #[test]
    fn test_chunks_grow_geometrically() {
        let mut heap = heap();
        let page = os_pages::page_size();
        heap.grow(2).unwrap();
        heap.grow(2).unwrap();
        heap.grow(2).unwrap();
        heap.grow(2).unwrap();
        let sizes: Vec<usize> = heap.classes[2].chunks().iter().map(Chunk::mapped_bytes).collect();
        let expected: Vec<usize> = [4096, 8192, 16384, 16384]
            .iter()
            .map(|&len: &usize| len.div_ceil(page) * page)
            .collect();
        assert_eq!(sizes, expected);
    }

    #[test]
    fn test_find_object_validates_addresses() {
        let mut heap = heap();
        let small = allocate(&mut heap, 32);
        let large = allocate(&mut heap, 2048);
        assert_eq!(heap.find_object(small.as_ptr() as usize), Some(small));
        assert_eq!(heap.find_object(large.as_ptr() as usize), Some(large));
        assert_eq!(heap.find_object(small.as_ptr() as usize + 8), None);
        assert_eq!(heap.find_object(16), None);
    }

    #[test]
    fn test_sweep_releases_idle_chunk_and_forgets_it() {
        let mut heap = heap();
        let item = allocate(&mut heap, 64);
        let addr = item.as_ptr() as usize;

        let stats = heap.sweep();
        assert_eq!(stats.objects_reclaimed, 1);
        assert_eq!(heap.chunk_count(64), 1, "kept while volume is stable");

        let stats = heap.sweep();
        assert_eq!(stats.chunks_released, 1);
        assert_eq!(heap.chunk_count(64), 0);
        assert_eq!(heap.find_object(addr), None);
    }

    #[test]
    fn test_under_pressure() {
        let mut heap = heap();
        let class = heap.size_class_index(32).unwrap();
        allocate(&mut heap, 32);
        assert!(!heap.under_pressure(class));

        let items = heap.classes[class].total_items();
        for _ in 1..items {
            allocate(&mut heap, 32);
        }
        assert!(heap.under_pressure(class));

        heap.reset_allocation_counters();
        assert!(!heap.under_pressure(class));
    }

    #[test]
    fn test_stats_account_for_large_objects() {
        let mut heap = heap();
        allocate(&mut heap, 32);
        allocate(&mut heap, 1024);
        let stats = heap.stats();
        assert_eq!(stats.large_objects, 1);
        assert_eq!(stats.large_object_bytes, 1024);
        assert_eq!(stats.used_bytes, 32 + 1024);
        assert!(stats.allocated_bytes >= stats.used_bytes);
        assert_eq!(stats.class_for(32).unwrap().items_in_use, 1);
    }
}

//! Chunks: OS page regions carved into equal-size items.

use std::io;
use std::ptr::NonNull;

use os_pages::PageRegion;

use crate::header::{self, ObjectHeader, SLOT_GRANULARITY};

use super::SweepStats;

/// Result of sweeping one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkSweep {
    /// Items that were in use when the sweep started.
    pub in_use_before: usize,
    /// Items still in use afterwards.
    pub live: usize,
}

/// A page region holding items of a single size.
///
/// Items `[0, frontier)` have been handed out at least once; free ones among
/// them form an index-linked list through their headers. Items at and past
/// the frontier are untouched and all-zero.
pub struct Chunk {
    region: PageRegion,
    item_size: usize,
    capacity: u32,
    frontier: u32,
    /// Index + 1 of the first free item below the frontier (0: none).
    free_head: u32,
    in_use: u32,
}

impl Chunk {
    /// Map a chunk of at least `len` bytes for `item_size`-byte items.
    pub fn new(item_size: usize, len: usize) -> io::Result<Self> {
        debug_assert!(item_size >= SLOT_GRANULARITY && item_size % SLOT_GRANULARITY == 0);
        let region = PageRegion::map_zeroed(len)?;
        let capacity = u32::try_from(region.len() / item_size).unwrap_or(u32::MAX - 1);
        Ok(Self {
            region,
            item_size,
            capacity,
            frontier: 0,
            free_head: 0,
            in_use: 0,
        })
    }

    /// Address of the first item.
    #[must_use]
    pub fn start(&self) -> usize {
        self.region.as_ptr() as usize
    }

    /// One past the last byte that can belong to an item.
    #[must_use]
    pub fn end(&self) -> usize {
        self.start() + self.capacity as usize * self.item_size
    }

    /// Bytes mapped for this chunk.
    #[must_use]
    pub fn mapped_bytes(&self) -> usize {
        self.region.len()
    }

    #[must_use]
    pub const fn item_size(&self) -> usize {
        self.item_size
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[must_use]
    pub const fn in_use(&self) -> usize {
        self.in_use as usize
    }

    /// Whether every item is free.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    /// Whether `pop_free` would succeed.
    #[must_use]
    pub const fn has_free(&self) -> bool {
        self.in_use < self.capacity
    }

    fn item(&self, index: u32) -> NonNull<ObjectHeader> {
        debug_assert!(index < self.capacity);
        let addr = self.start() + index as usize * self.item_size;
        // SAFETY: the address lies inside the mapped region, which is never null.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            NonNull::new_unchecked(addr as *mut ObjectHeader)
        }
    }

    /// The item whose header starts exactly at `addr`, if it has ever been handed out.
    #[must_use]
    pub fn item_at(&self, addr: usize) -> Option<NonNull<ObjectHeader>> {
        if addr < self.start() || addr >= self.end() {
            return None;
        }
        let offset = addr - self.start();
        if offset % self.item_size != 0 {
            return None;
        }
        let index = u32::try_from(offset / self.item_size).ok()?;
        (index < self.frontier).then(|| self.item(index))
    }

    /// Take a zeroed free item.
    pub fn pop_free(&mut self) -> Option<NonNull<ObjectHeader>> {
        let item = if self.free_head != 0 {
            let item = self.item(self.free_head - 1);
            // SAFETY: free-list entries are valid free items of this chunk.
            unsafe {
                let header = &mut *item.as_ptr();
                self.free_head = header.next_free();
                header.set_next_free(0);
            }
            item
        } else if self.frontier < self.capacity {
            let item = self.item(self.frontier);
            self.frontier += 1;
            item
        } else {
            return None;
        };
        self.in_use += 1;
        Some(item)
    }

    /// Reclaim unmarked objects, clear marks on survivors and rebuild the
    /// free list from scratch.
    pub fn sweep(&mut self, stats: &mut SweepStats) -> ChunkSweep {
        let mut result = ChunkSweep::default();
        let mut head = 0;

        // Walk backwards so the rebuilt list hands out low addresses first.
        for index in (0..self.frontier).rev() {
            let item = self.item(index);
            // SAFETY: every item below the frontier is a valid header.
            unsafe {
                let header = &mut *item.as_ptr();
                if header.is_marked() {
                    header.clear_mark();
                    result.in_use_before += 1;
                    result.live += 1;
                    continue;
                }
                if header.is_in_use() {
                    result.in_use_before += 1;
                    stats.unmanaged_released += header::reclaim(item, self.item_size);
                    stats.objects_reclaimed += 1;
                    stats.bytes_reclaimed += self.item_size;
                }
                (*item.as_ptr()).set_next_free(head);
            }
            head = index + 1;
        }

        self.free_head = head;
        self.in_use = u32::try_from(result.live).unwrap_or(u32::MAX);
        stats.objects_live += result.live;
        result
    }

    /// Clear every mark bit without reclaiming anything.
    pub fn clear_marks(&mut self) {
        for index in 0..self.frontier {
            // SAFETY: every item below the frontier is a valid header.
            unsafe { (*self.item(index).as_ptr()).clear_mark() };
        }
    }

    /// Destroy every in-use object. Used at teardown.
    pub fn destroy_all(&mut self, stats: &mut SweepStats) {
        self.clear_marks();
        self.sweep(stats);
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("start", &(self.start() as *const u8))
            .field("item_size", &self.item_size)
            .field("capacity", &self.capacity)
            .field("frontier", &self.frontier)
            .field("in_use", &self.in_use)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ObjectClass;

    static LEAF: ObjectClass = ObjectClass::leaf("leaf");

    fn allocate(chunk: &mut Chunk) -> NonNull<ObjectHeader> {
        let item = chunk.pop_free().expect("chunk exhausted");
        unsafe { (*item.as_ptr()).init_in_use(&LEAF, 0) };
        item
    }

    #[test]
    fn test_items_are_aligned_and_distinct() {
        let mut chunk = Chunk::new(48, 4096).unwrap();
        let a = allocate(&mut chunk);
        let b = allocate(&mut chunk);
        assert_eq!(a.as_ptr() as usize % 16, 0);
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 48);
        assert_eq!(chunk.in_use(), 2);
        assert!(chunk.end() <= chunk.start() + chunk.mapped_bytes());
    }

    #[test]
    fn test_exhaustion() {
        let mut chunk = Chunk::new(512, 4096).unwrap();
        let capacity = chunk.capacity();
        for _ in 0..capacity {
            allocate(&mut chunk);
        }
        assert!(!chunk.has_free());
        assert!(chunk.pop_free().is_none());
    }

    #[test]
    fn test_sweep_rebuilds_free_list() {
        let mut chunk = Chunk::new(32, 4096).unwrap();
        let items: Vec<_> = (0..8).map(|_| allocate(&mut chunk)).collect();

        // Keep the even items.
        for item in items.iter().step_by(2) {
            unsafe { assert!((*item.as_ptr()).try_mark()) };
        }

        let mut stats = SweepStats::default();
        let result = chunk.sweep(&mut stats);
        assert_eq!(result, ChunkSweep { in_use_before: 8, live: 4 });
        assert_eq!(stats.objects_reclaimed, 4);
        assert_eq!(stats.bytes_reclaimed, 4 * 32);
        assert_eq!(chunk.in_use(), 4);

        for item in items.iter().step_by(2) {
            let header = unsafe { &*item.as_ptr() };
            assert!(header.is_in_use());
            assert!(!header.is_marked());
        }

        // Freed odd items come back first, lowest address first.
        let again = chunk.pop_free().unwrap();
        assert_eq!(again, items[1]);
        let bytes = unsafe { std::slice::from_raw_parts(again.as_ptr().cast::<u8>(), 32) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_item_at_rejects_interior_and_untouched() {
        let mut chunk = Chunk::new(64, 4096).unwrap();
        let a = allocate(&mut chunk);
        let addr = a.as_ptr() as usize;
        assert_eq!(chunk.item_at(addr), Some(a));
        assert_eq!(chunk.item_at(addr + 16), None);
        assert_eq!(chunk.item_at(addr + 64), None);
        assert_eq!(chunk.item_at(addr.wrapping_sub(64)), None);
    }

    #[test]
    fn test_destroy_all_empties_chunk() {
        let mut chunk = Chunk::new(16, 4096).unwrap();
        for _ in 0..10 {
            let item = allocate(&mut chunk);
            unsafe { (*item.as_ptr()).try_mark() };
        }
        let mut stats = SweepStats::default();
        chunk.destroy_all(&mut stats);
        assert!(chunk.is_empty());
        assert_eq!(stats.objects_reclaimed, 10);
    }
}

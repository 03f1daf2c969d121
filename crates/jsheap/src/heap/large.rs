//! Large object store.
//!
//! Objects at or above the large-object threshold get their own zeroed
//! allocation, linked into a singly linked list through a small node header
//! placed in front of the object.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashSet;
use std::ptr::NonNull;

use crate::error::AllocError;
use crate::header::{self, ObjectHeader, SLOT_GRANULARITY};

use super::SweepStats;

#[derive(Debug)]
#[repr(C, align(16))]
struct LargeNode {
    next: Option<NonNull<LargeNode>>,
    /// Object bytes, excluding this node.
    size: usize,
}

const NODE_SIZE: usize = std::mem::size_of::<LargeNode>();

const _: () = assert!(NODE_SIZE % SLOT_GRANULARITY == 0);

impl LargeNode {
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(NODE_SIZE.checked_add(size)?, SLOT_GRANULARITY).ok()
    }

    fn object(node: NonNull<Self>) -> NonNull<ObjectHeader> {
        // SAFETY: the object immediately follows the node inside one allocation.
        unsafe { node.cast::<u8>().add(NODE_SIZE).cast() }
    }
}

/// The list of individually allocated large objects.
#[derive(Debug)]
pub struct LargeObjectStore {
    head: Option<NonNull<LargeNode>>,
    /// Object header addresses, for validating stray references.
    index: HashSet<usize>,
    bytes: usize,
    bytes_since_gc: usize,
}

impl Default for LargeObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LargeObjectStore {
    pub fn new() -> Self {
        Self {
            head: None,
            index: HashSet::new(),
            bytes: 0,
            bytes_since_gc: 0,
        }
    }

    /// Allocate a zeroed `size`-byte object and link it at the head of the list.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<ObjectHeader>, AllocError> {
        let layout = LargeNode::layout(size).ok_or(AllocError::OutOfMemory { requested: size })?;
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let node = NonNull::new(raw.cast::<LargeNode>()).ok_or(AllocError::OutOfMemory {
            requested: layout.size(),
        })?;
        // SAFETY: freshly allocated and suitably aligned for a node.
        unsafe {
            node.as_ptr().write(LargeNode {
                next: self.head,
                size,
            });
        }
        self.head = Some(node);

        let object = LargeNode::object(node);
        self.index.insert(object.as_ptr() as usize);
        self.bytes += size;
        self.bytes_since_gc += size;
        Ok(object)
    }

    /// Whether `addr` is the header of a live large object.
    pub fn contains(&self, addr: usize) -> bool {
        self.index.contains(&addr)
    }

    /// Bytes held by large objects.
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Bytes allocated since the counter was last reset.
    pub const fn bytes_since_gc(&self) -> usize {
        self.bytes_since_gc
    }

    pub fn reset_allocation_counter(&mut self) {
        self.bytes_since_gc = 0;
    }

    /// Free unmarked objects and clear the mark on the rest.
    ///
    /// Survivors are relinked in reverse order; list order carries no meaning.
    pub fn sweep(&mut self, stats: &mut SweepStats) {
        let mut cursor = self.head.take();
        while let Some(node) = cursor {
            // SAFETY: `node` came off the list and is a live allocation.
            unsafe {
                cursor = (*node.as_ptr()).next;
                let header = &mut *LargeNode::object(node).as_ptr();
                if header.is_marked() {
                    header.clear_mark();
                    stats.objects_live += 1;
                    (*node.as_ptr()).next = self.head;
                    self.head = Some(node);
                } else {
                    self.free(node, stats);
                }
            }
        }
    }

    /// Destroy every large object.
    pub fn destroy_all(&mut self, stats: &mut SweepStats) {
        while let Some(node) = self.head {
            // SAFETY: `node` is the live head of the list.
            unsafe {
                self.head = (*node.as_ptr()).next;
                self.free(node, stats);
            }
        }
    }

    /// Run the object's destroy hook and release the allocation.
    ///
    /// # Safety
    ///
    /// `node` must already be unlinked from the list.
    unsafe fn free(&mut self, node: NonNull<LargeNode>, stats: &mut SweepStats) {
        unsafe {
            let size = (*node.as_ptr()).size;
            let object = LargeNode::object(node);
            if (*object.as_ptr()).is_in_use() {
                stats.unmanaged_released += header::reclaim(object, size);
                stats.objects_reclaimed += 1;
            }
            stats.bytes_reclaimed += size;
            self.index.remove(&(object.as_ptr() as usize));
            self.bytes -= size;
            if let Some(layout) = LargeNode::layout(size) {
                dealloc(node.as_ptr().cast(), layout);
            }
        }
    }

    pub fn clear_marks(&mut self) {
        let mut cursor = self.head;
        while let Some(node) = cursor {
            // SAFETY: nodes in the list are live.
            unsafe {
                (*LargeNode::object(node).as_ptr()).clear_mark();
                cursor = (*node.as_ptr()).next;
            }
        }
    }
}

impl Drop for LargeObjectStore {
    fn drop(&mut self) {
        let mut stats = SweepStats::default();
        self.destroy_all(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ObjectClass;

    static BLOB: ObjectClass = ObjectClass::leaf("blob");

    fn allocate(store: &mut LargeObjectStore, size: usize) -> NonNull<ObjectHeader> {
        let object = store.allocate(size).unwrap();
        unsafe { (*object.as_ptr()).init_in_use(&BLOB, 0) };
        object
    }

    #[test]
    fn test_allocation_is_zeroed_and_tracked() {
        let mut store = LargeObjectStore::new();
        let object = store.allocate(4096).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(object.as_ptr().cast::<u8>(), 4096) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(object.as_ptr() as usize % 16, 0);
        assert!(store.contains(object.as_ptr() as usize));
        assert_eq!(store.bytes(), 4096);
        assert_eq!(store.bytes_since_gc(), 4096);
    }

    #[test]
    fn test_sweep_frees_unmarked_only() {
        let mut store = LargeObjectStore::new();
        let keep = allocate(&mut store, 1024);
        let drop_a = allocate(&mut store, 2048);
        let drop_b = allocate(&mut store, 4096);
        unsafe { (*keep.as_ptr()).try_mark() };

        let mut stats = SweepStats::default();
        store.sweep(&mut stats);

        assert_eq!(stats.objects_reclaimed, 2);
        assert_eq!(stats.bytes_reclaimed, 2048 + 4096);
        assert_eq!(store.len(), 1);
        assert!(store.contains(keep.as_ptr() as usize));
        assert!(!store.contains(drop_a.as_ptr() as usize));
        assert!(!store.contains(drop_b.as_ptr() as usize));
        assert!(!unsafe { (*keep.as_ptr()).is_marked() });
        assert_eq!(store.bytes(), 1024);
    }

    #[test]
    fn test_destroy_all() {
        let mut store = LargeObjectStore::new();
        for size in [512, 1024, 8192] {
            allocate(&mut store, size);
        }
        let mut stats = SweepStats::default();
        store.destroy_all(&mut stats);
        assert_eq!(store.len(), 0);
        assert_eq!(store.bytes(), 0);
        assert_eq!(stats.objects_reclaimed, 3);
    }
}

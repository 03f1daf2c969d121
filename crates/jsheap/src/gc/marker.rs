//! The mark stack.
//!
//! Marking pushes newly marked objects onto an explicit stack; draining pops
//! them and runs their class's `trace` hook, which marks the children.
//! Every reference is looked up in the heap before its header is touched, so
//! stale values held by roots or by live objects are ignored.

use std::ptr::NonNull;

use crate::header::ObjectHeader;
use crate::heap::Heap;
use crate::value::{Gc, HeapRef, Value};

/// Stack depth at which root marking stops to drain.
pub(crate) const DEFAULT_SOFT_LIMIT: usize = 4096;

/// Marking context handed to [`Trace`](crate::Trace) implementations.
pub struct Marker<'h> {
    heap: &'h Heap,
    stack: Vec<NonNull<ObjectHeader>>,
    objects_marked: usize,
    soft_limit: usize,
}

impl<'h> Marker<'h> {
    pub(crate) fn new(heap: &'h Heap, soft_limit: usize) -> Self {
        Self {
            heap,
            stack: Vec::with_capacity(soft_limit.min(DEFAULT_SOFT_LIMIT)),
            objects_marked: 0,
            soft_limit,
        }
    }

    /// Mark `object` reachable.
    ///
    /// Marking an already marked object does nothing, so cycles terminate and
    /// each object is traced at most once per collection. References that no
    /// longer address an in-use object are skipped.
    pub fn mark(&mut self, object: HeapRef) {
        let Some(header) = self.heap.find_object(object.addr()) else {
            return;
        };
        // SAFETY: `find_object` only returns headers of in-use objects.
        let newly_marked = unsafe { (*header.as_ptr()).try_mark() };
        if newly_marked {
            self.objects_marked += 1;
            self.stack.push(header);
        }
    }

    /// Mark the object `value` refers to, if any.
    pub fn mark_value(&mut self, value: &Value) {
        if let Value::Object(object) = value {
            self.mark(*object);
        }
    }

    /// Mark a typed reference.
    pub fn mark_gc<T>(&mut self, gc: Gc<T>) {
        self.mark(gc.as_heap_ref());
    }

    /// Objects marked so far in this collection.
    #[must_use]
    pub const fn objects_marked(&self) -> usize {
        self.objects_marked
    }

    /// Objects marked but not yet traced.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.stack.len()
    }

    /// Trace until the stack is empty.
    pub(crate) fn drain(&mut self) {
        while let Some(header) = self.stack.pop() {
            // SAFETY: only in-use objects are pushed, and nothing is
            // reclaimed while marking.
            let class = unsafe { (*header.as_ptr()).class() };
            if let Some(class) = class {
                // SAFETY: the class describes this object's payload.
                unsafe { (class.trace)(header, self) };
            }
        }
    }

    /// Drain if the stack grew past the soft limit.
    pub(crate) fn drain_if_full(&mut self) {
        if self.stack.len() >= self.soft_limit {
            self.drain();
        }
    }
}

impl std::fmt::Debug for Marker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marker")
            .field("pending", &self.stack.len())
            .field("objects_marked", &self.objects_marked)
            .finish()
    }
}

//! The `Trace` and `HeapObject` traits.
//!
//! `Trace` is the "mark children" capability: an implementation reports every
//! heap reference it holds to the [`Marker`]. `HeapObject` adds what the
//! collector needs to allocate and reclaim a type.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::BuildHasher;

use crate::gc::Marker;
use crate::value::{Gc, HeapRef, Value};

// ============================================================================
// Core Traits
// ============================================================================

/// A type whose heap references can be enumerated by the collector.
///
/// # Safety
///
/// Implementations **MUST** report every `Gc`, `HeapRef` or object `Value`
/// they contain by passing it to the marker. A missed reference lets the
/// collector reclaim a reachable object.
///
/// Prefer `#[derive(Trace)]` over manual implementations.
///
/// ```ignore
/// unsafe impl Trace for Pair {
///     fn trace(&self, marker: &mut Marker) {
///         self.first.trace(marker);
///         self.second.trace(marker);
///     }
/// }
/// ```
pub unsafe trait Trace {
    /// Report every heap reference held by `self`.
    fn trace(&self, marker: &mut Marker);
}

/// A type that can live in the managed heap.
pub trait HeapObject: Trace + Sized + 'static {
    /// Class name used in diagnostics.
    const NAME: &'static str;

    /// External bytes owned by this object (for example a string's backing
    /// buffer). Counted against the unmanaged-heap threshold while the object
    /// is alive and released when it is reclaimed.
    fn unmanaged_size(&self) -> usize {
        0
    }

    /// Called once, right before the value is dropped by the sweeper.
    fn on_reclaim(&mut self) {}
}

// ============================================================================
// Heap references
// ============================================================================

unsafe impl Trace for HeapRef {
    #[inline]
    fn trace(&self, marker: &mut Marker) {
        marker.mark(*self);
    }
}

unsafe impl<T> Trace for Gc<T> {
    #[inline]
    fn trace(&self, marker: &mut Marker) {
        marker.mark(self.as_heap_ref());
    }
}

unsafe impl Trace for Value {
    #[inline]
    fn trace(&self, marker: &mut Marker) {
        if let Self::Object(r) = self {
            marker.mark(*r);
        }
    }
}

// ============================================================================
// Leaf types
// ============================================================================

macro_rules! impl_leaf_trace {
    ($($t:ty),* $(,)?) => {
        $(
            unsafe impl Trace for $t {
                #[inline]
                fn trace(&self, _marker: &mut Marker) {}
            }
        )*
    };
}

impl_leaf_trace!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    str,
);

// ============================================================================
// Containers
// ============================================================================

unsafe impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, marker: &mut Marker) {
        if let Some(value) = self {
            value.trace(marker);
        }
    }
}

unsafe impl<T: Trace + ?Sized> Trace for Box<T> {
    #[inline]
    fn trace(&self, marker: &mut Marker) {
        (**self).trace(marker);
    }
}

unsafe impl<T: Trace> Trace for [T] {
    fn trace(&self, marker: &mut Marker) {
        for item in self {
            item.trace(marker);
        }
    }
}

unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    fn trace(&self, marker: &mut Marker) {
        self.as_slice().trace(marker);
    }
}

unsafe impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, marker: &mut Marker) {
        self.as_slice().trace(marker);
    }
}

unsafe impl<T: Trace> Trace for VecDeque<T> {
    fn trace(&self, marker: &mut Marker) {
        for item in self {
            item.trace(marker);
        }
    }
}

unsafe impl<K: Trace, V: Trace, S: BuildHasher> Trace for HashMap<K, V, S> {
    fn trace(&self, marker: &mut Marker) {
        for (k, v) in self {
            k.trace(marker);
            v.trace(marker);
        }
    }
}

unsafe impl<K: Trace, V: Trace> Trace for BTreeMap<K, V> {
    fn trace(&self, marker: &mut Marker) {
        for (k, v) in self {
            k.trace(marker);
            v.trace(marker);
        }
    }
}

unsafe impl<T: Trace + Copy> Trace for Cell<T> {
    #[inline]
    fn trace(&self, marker: &mut Marker) {
        self.get().trace(marker);
    }
}

unsafe impl<T: Trace + ?Sized> Trace for RefCell<T> {
    fn trace(&self, marker: &mut Marker) {
        // Marking never runs while the mutator holds a borrow of heap data.
        self.borrow().trace(marker);
    }
}

unsafe impl<A: Trace, B: Trace> Trace for (A, B) {
    fn trace(&self, marker: &mut Marker) {
        self.0.trace(marker);
        self.1.trace(marker);
    }
}

unsafe impl<A: Trace, B: Trace, C: Trace> Trace for (A, B, C) {
    fn trace(&self, marker: &mut Marker) {
        self.0.trace(marker);
        self.1.trace(marker);
        self.2.trace(marker);
    }
}

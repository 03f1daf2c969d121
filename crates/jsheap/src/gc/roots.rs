//! Embedder hooks consulted by the collector.
//!
//! None of these receive the memory manager, so they cannot allocate or
//! start a nested collection.

use crate::handles::WeakHandle;
use crate::value::Value;

use super::Marker;

/// Marks embedder-owned roots: globals, prototypes, compiled code.
pub trait RootProvider {
    /// Mark every heap reference this provider keeps alive.
    fn mark_roots(&mut self, marker: &mut Marker);
}

impl<F: FnMut(&mut Marker)> RootProvider for F {
    fn mark_roots(&mut self, marker: &mut Marker) {
        self(marker);
    }
}

/// Decides whether a weak handle's target must survive this collection.
///
/// Queried once per live weak handle during marking. It must be cheap and
/// free of side effects.
pub trait RetentionPolicy {
    /// Whether the object held by `handle` is retained by its native owner.
    fn retain(&self, handle: WeakHandle, value: &Value) -> bool;
}

impl<F: Fn(WeakHandle, &Value) -> bool> RetentionPolicy for F {
    fn retain(&self, handle: WeakHandle, value: &Value) -> bool {
        self(handle, value)
    }
}

/// Post-sweep notification, run exactly once.
///
/// `last` is `true` when the notification comes from teardown rather than
/// an ordinary collection.
pub trait Deletable {
    /// Consume the notification.
    fn run(self: Box<Self>, last: bool);
}

impl<F: FnOnce(bool)> Deletable for F {
    fn run(self: Box<Self>, last: bool) {
        (*self)(last);
    }
}

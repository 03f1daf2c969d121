//! Mark phase.

use crate::handles::{HandleTable, Strong, Weak};
use crate::heap::Heap;
use crate::stack::EvalStack;
use crate::trace::Trace;
use crate::value::Value;

use super::marker::{Marker, DEFAULT_SOFT_LIMIT};
use super::roots::{RetentionPolicy, RootProvider};

/// Every root source of one collection.
pub(crate) struct Roots<'a> {
    /// Value being allocated when the collection fired.
    pub pending: Option<&'a dyn Trace>,
    pub providers: &'a mut [Box<dyn RootProvider>],
    pub persistent: &'a HandleTable<Strong>,
    pub stack: &'a EvalStack,
    pub weak: &'a HandleTable<Weak>,
    pub retention: Option<&'a dyn RetentionPolicy>,
}

/// Mark everything reachable from `roots`. Returns the number of objects marked.
pub(crate) fn mark_from_roots(heap: &Heap, roots: Roots<'_>) -> usize {
    let mut marker = Marker::new(heap, DEFAULT_SOFT_LIMIT);

    if let Some(pending) = roots.pending {
        pending.trace(&mut marker);
        marker.drain();
    }

    for provider in roots.providers.iter_mut() {
        provider.mark_roots(&mut marker);
        marker.drain();
    }

    for (_, value) in roots.persistent.iter() {
        marker.mark_value(&value);
        marker.drain_if_full();
    }
    marker.drain();

    // Popped-without-clear slots and dead frames may hold references to
    // reclaimed items; the marker skips those.
    for value in roots.stack.live_slots() {
        marker.mark_value(value);
        marker.drain_if_full();
    }
    marker.drain();

    if let Some(retention) = roots.retention {
        for (handle, value) in roots.weak.iter() {
            let live = matches!(
                value,
                Value::Object(object) if heap.find_object(object.addr()).is_some()
            );
            if live && retention.retain(handle, &value) {
                marker.mark_value(&value);
                marker.drain_if_full();
            }
        }
    }
    marker.drain();

    marker.objects_marked()
}

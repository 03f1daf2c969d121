//! Sweep-side bookkeeping outside the heap: weak handles and deletables.

use crate::handles::{HandleTable, Weak};
use crate::heap::Heap;
use crate::value::Value;

use super::roots::Deletable;

/// Reset every weak handle whose target was not marked, or is no longer an
/// in-use object at all.
///
/// Must run after marking and before the heap sweep, while mark bits are
/// still meaningful and targets are still in use.
pub(crate) fn reset_weak_handles(weak: &mut HandleTable<Weak>, heap: &Heap) -> usize {
    let mut reset = 0;
    for value in weak.values_mut() {
        if let Value::Object(object) = value {
            let marked = heap.find_object(object.addr()).is_some_and(|header| {
                // SAFETY: `find_object` only returns headers of in-use objects.
                unsafe { (*header.as_ptr()).is_marked() }
            });
            if !marked {
                *value = Value::Undefined;
                reset += 1;
            }
        }
    }
    reset
}

/// Reset every weak handle that refers to an object. Used at teardown.
pub(crate) fn reset_all_weak_handles(weak: &mut HandleTable<Weak>) -> usize {
    let mut reset = 0;
    for value in weak.values_mut() {
        if value.is_object() {
            *value = Value::Undefined;
            reset += 1;
        }
    }
    reset
}

/// Run and drop every queued deletable.
pub(crate) fn run_deletables(queue: &mut Vec<Box<dyn Deletable>>, last: bool) -> usize {
    let pending = std::mem::take(queue);
    let count = pending.len();
    for deletable in pending {
        deletable.run(last);
    }
    count
}

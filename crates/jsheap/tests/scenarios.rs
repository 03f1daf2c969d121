//! End-to-end scenarios for the memory manager.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use jsheap::{HeapConfig, HeapObject, Marker, MemoryManager, ObjectClass, ObjectHeader, Trace};

static DESTROYED: AtomicUsize = AtomicUsize::new(0);

unsafe fn count_destroy(_header: NonNull<ObjectHeader>) {
    DESTROYED.fetch_add(1, Ordering::Relaxed);
}

unsafe fn trace_nothing(_header: NonNull<ObjectHeader>, _marker: &mut Marker) {}

static COUNTED: ObjectClass = ObjectClass::raw("Counted", trace_nothing, Some(count_destroy));

#[test]
fn test_thousand_small_objects_are_reclaimed() {
    let mut mm = MemoryManager::with_config(HeapConfig::new()).unwrap();
    let used_before = mm.stats().used_bytes;

    let objects: Vec<_> = (0..1000).map(|_| mm.allocate(&COUNTED, 32, 0)).collect();
    assert_eq!(mm.stats().used_bytes, used_before + 1000 * 32);
    assert_eq!(mm.stats().class_for(32).unwrap().items_in_use, 1000);
    drop(objects);

    assert!(mm.run_gc());
    assert_eq!(DESTROYED.load(Ordering::Relaxed), 1000);
    assert_eq!(mm.stats().used_bytes, used_before);
    assert_eq!(mm.last_gc_metrics().objects_reclaimed, 1000);
    assert_eq!(mm.last_gc_metrics().bytes_reclaimed, 32_000);
}

/// A string whose characters live outside the managed heap.
struct JsString {
    chars: String,
}

unsafe impl Trace for JsString {
    fn trace(&self, _marker: &mut Marker) {}
}

impl HeapObject for JsString {
    const NAME: &'static str = "String";

    fn unmanaged_size(&self) -> usize {
        self.chars.len()
    }
}

#[test]
fn test_unmanaged_bytes_follow_string_lifetime() {
    let mut mm = MemoryManager::with_config(HeapConfig::new()).unwrap();
    let s = mm.alloc(JsString {
        chars: "x".repeat(10_000),
    });
    assert_eq!(mm.unmanaged_bytes(), 10_000);
    assert_eq!(mm.get(s).unwrap().chars.len(), 10_000);

    mm.run_gc();
    assert_eq!(mm.unmanaged_bytes(), 0);
    assert_eq!(mm.last_gc_metrics().unmanaged_released, 10_000);
    assert!(mm.get(s).is_none());
}

static RAW_STRING: ObjectClass = ObjectClass::leaf("RawString");

#[test]
fn test_raw_unmanaged_hint() {
    let mut mm = MemoryManager::with_config(HeapConfig::new()).unwrap();
    let s = mm.allocate(&RAW_STRING, 48, 10_000);
    assert_eq!(mm.unmanaged_bytes(), 10_000);
    assert_eq!(mm.unmanaged_size_of(s), Some(10_000));
    mm.run_gc();
    assert_eq!(mm.unmanaged_bytes(), 0);
}

#[test]
fn test_blocked_gc_allocates_past_threshold() {
    let mut mm = MemoryManager::with_config(HeapConfig::new()).unwrap();
    mm.set_gc_blocked(true);
    let threshold = mm.unmanaged_threshold();
    let mut strings = Vec::new();
    while mm.unmanaged_bytes() <= 4 * threshold {
        strings.push(mm.alloc(JsString {
            chars: "y".repeat(4096),
        }));
    }
    assert_eq!(mm.collections(), 0);
    assert!(strings.iter().all(|&s| mm.get(s).is_some()));
}

#[test]
fn test_deletables_run_once_with_final_flag() {
    let calls: Rc<RefCell<Vec<(&'static str, bool)>>> = Rc::new(RefCell::new(Vec::new()));
    let mut mm = MemoryManager::with_config(HeapConfig::new()).unwrap();

    let log = Rc::clone(&calls);
    mm.register_deletable(move |last: bool| log.borrow_mut().push(("first", last)));
    mm.run_gc();
    assert_eq!(*calls.borrow(), vec![("first", false)]);
    assert_eq!(mm.last_gc_metrics().deletables_run, 1);

    mm.run_gc();
    assert_eq!(calls.borrow().len(), 1, "invoked exactly once");

    let log = Rc::clone(&calls);
    mm.register_deletable(move |last: bool| log.borrow_mut().push(("second", last)));
    mm.teardown();
    assert_eq!(*calls.borrow(), vec![("first", false), ("second", true)]);

    drop(mm);
    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn test_deletable_pending_at_drop_sees_final() {
    let seen = Rc::new(Cell::new(None));
    {
        let mut mm = MemoryManager::with_config(HeapConfig::new()).unwrap();
        let seen = Rc::clone(&seen);
        mm.register_deletable(move |last: bool| seen.set(Some(last)));
    }
    assert_eq!(seen.get(), Some(true));
}

#[test]
fn test_blocked_gc_defers_deletables() {
    let ran = Rc::new(Cell::new(0));
    let mut mm = MemoryManager::with_config(HeapConfig::new()).unwrap();
    let counter = Rc::clone(&ran);
    mm.register_deletable(move |_last: bool| counter.set(counter.get() + 1));

    mm.set_gc_blocked(true);
    mm.run_gc();
    assert_eq!(ran.get(), 0);

    mm.set_gc_blocked(false);
    mm.run_gc();
    assert_eq!(ran.get(), 1);
}

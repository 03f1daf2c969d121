//! The memory manager: allocation entry points and the collection cycle.
//!
//! [`MemoryManager`] owns the heap, the evaluation stack, the handle tables,
//! and the trigger state. Every allocation goes through it, and every
//! collection is started by it, either because a heuristic fired during an
//! allocation or because the host called [`MemoryManager::run_gc`].

use std::alloc::{handle_alloc_error, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::time::Instant;

use crate::config::HeapConfig;
use crate::error::{AllocError, ConfigError};
use crate::gc::{
    mark_from_roots, reset_all_weak_handles, reset_weak_handles, run_deletables, Deletable,
    RetentionPolicy, RootProvider, Roots, UnmanagedThreshold,
};
use crate::handles::{HandleTable, PersistentHandle, Strong, Weak, WeakHandle};
use crate::header::{self, ClassOf, ObjectClass, ObjectHeader, HEADER_SIZE, MAX_PAYLOAD_ALIGN};
use crate::heap::Heap;
use crate::metrics::{GcMetrics, GcTrigger, HeapStats, PhaseTimer};
use crate::stack::EvalStack;
use crate::trace::{HeapObject, Trace};
use crate::tracing::{
    log_alloc_failure, log_cycle_stats, log_heap_stats, log_phase_end, log_phase_start,
    next_gc_id, trace_gc_collection, warn_invalid_config, GcPhase,
};
use crate::value::{Gc, HeapRef, Value};

/// Single-threaded mark-and-sweep memory manager.
pub struct MemoryManager {
    config: HeapConfig,
    heap: Heap,
    unmanaged: UnmanagedThreshold,
    stack: EvalStack,
    persistent: HandleTable<Strong>,
    weak: HandleTable<Weak>,
    providers: Vec<Box<dyn RootProvider>>,
    retention: Option<Box<dyn RetentionPolicy>>,
    deletables: Vec<Box<dyn Deletable>>,
    gc_blocked: bool,
    collecting: bool,
    collections: usize,
    last_metrics: GcMetrics,
}

impl MemoryManager {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a manager configured from the `JSHEAP_*` environment variables.
    ///
    /// An environment that produces an inconsistent configuration is logged
    /// and replaced by the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeapConfig::from_env()).unwrap_or_else(|error| {
            warn_invalid_config(&error);
            Self::build(HeapConfig::new(), Heap::default())
        })
    }

    /// Create a manager with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] reported by [`HeapConfig::validate`].
    pub fn with_config(config: HeapConfig) -> Result<Self, ConfigError> {
        let heap = Heap::new(&config)?;
        Ok(Self::build(config, heap))
    }

    fn build(config: HeapConfig, heap: Heap) -> Self {
        Self {
            heap,
            unmanaged: UnmanagedThreshold::new(&config),
            config,
            stack: EvalStack::new(),
            persistent: HandleTable::new(),
            weak: HandleTable::new(),
            providers: Vec::new(),
            retention: None,
            deletables: Vec::new(),
            gc_blocked: false,
            collecting: false,
            collections: 0,
            last_metrics: GcMetrics::default(),
        }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate a zeroed object of `size` bytes (header included) for a raw class.
    ///
    /// `unmanaged_hint` is the number of bytes the object owns outside the
    /// heap. It counts towards the unmanaged trigger and is released when the
    /// object is reclaimed.
    ///
    /// May run a collection first. Never fails: running out of memory aborts
    /// through [`handle_alloc_error`].
    pub fn allocate(
        &mut self,
        class: &'static ObjectClass,
        size: usize,
        unmanaged_hint: usize,
    ) -> HeapRef {
        let unmanaged = clamp_unmanaged(unmanaged_hint);
        match self.allocate_item(size, unmanaged, None) {
            Ok(item) => {
                // SAFETY: a fresh zeroed item, not yet visible to anyone.
                unsafe { (*item.as_ptr()).init_in_use(class, unmanaged) };
                HeapRef::from_header(item)
            }
            Err(error) => oom(&error),
        }
    }

    /// Move `value` into the heap.
    ///
    /// References held by `value` are treated as roots by any collection this
    /// allocation triggers.
    ///
    /// # Panics
    ///
    /// Panics if `T` needs an alignment above 16 bytes. Running out of
    /// memory aborts through [`handle_alloc_error`].
    pub fn alloc<T: HeapObject>(&mut self, value: T) -> Gc<T> {
        match self.try_alloc(value) {
            Ok(gc) => gc,
            Err(error @ AllocError::UnsupportedLayout { .. }) => panic!("{error}"),
            Err(error) => oom(&error),
        }
    }

    /// Fallible form of [`alloc`](Self::alloc).
    ///
    /// # Errors
    ///
    /// [`AllocError::UnsupportedLayout`] if `T` is over-aligned,
    /// [`AllocError::OutOfMemory`] if the OS refuses more memory.
    pub fn try_alloc<T: HeapObject>(&mut self, value: T) -> Result<Gc<T>, AllocError> {
        if std::mem::align_of::<T>() > MAX_PAYLOAD_ALIGN {
            return Err(AllocError::UnsupportedLayout {
                size: std::mem::size_of::<T>(),
                align: std::mem::align_of::<T>(),
            });
        }
        let size = HEADER_SIZE + std::mem::size_of::<T>();
        let unmanaged = clamp_unmanaged(value.unmanaged_size());
        let item = match self.allocate_item(size, unmanaged, Some(&value as &dyn Trace)) {
            Ok(item) => item,
            Err(error) => {
                self.unmanaged.release(unmanaged as usize);
                return Err(error);
            }
        };
        // SAFETY: the item is zeroed, spans `size` bytes, and its payload is
        // 16-byte aligned.
        unsafe {
            (*item.as_ptr()).init_in_use(T::CLASS, unmanaged);
            header::payload::<T>(item).as_ptr().write(value);
        }
        Ok(Gc::from_header(item))
    }

    fn allocate_item(
        &mut self,
        size: usize,
        unmanaged: u32,
        pending: Option<&dyn Trace>,
    ) -> Result<NonNull<ObjectHeader>, AllocError> {
        let unmanaged = unmanaged as usize;
        let mut collected = false;
        let exceeded = self.unmanaged.add(unmanaged);
        if self.config.aggressive_gc {
            collected = self.collect(GcTrigger::Aggressive, unmanaged, pending);
        } else if exceeded {
            collected = self.collect(GcTrigger::Unmanaged, unmanaged, pending);
        }

        let Some(class) = self.heap.size_class_index(size) else {
            if !collected && self.heap.large_bytes_since_gc() > self.config.large_object_gc_cap {
                self.collect(GcTrigger::LargeObjects, 0, pending);
            }
            return self.heap.allocate_large(size);
        };

        if let Some(item) = self.heap.pop_free(class) {
            return Ok(item);
        }
        if !collected
            && self.heap.under_pressure(class)
            && self.collect(GcTrigger::SizeClassPressure, 0, pending)
        {
            if let Some(item) = self.heap.pop_free(class) {
                return Ok(item);
            }
        }
        self.heap.grow(class)?;
        self.heap
            .pop_free(class)
            .ok_or(AllocError::OutOfMemory { requested: size })
    }

    // ========================================================================
    // Object access
    // ========================================================================

    /// Borrow a live object of type `T`.
    ///
    /// Returns `None` if `gc` does not address a live object of class `T`.
    #[must_use]
    pub fn get<T: HeapObject>(&self, gc: Gc<T>) -> Option<&T> {
        let header = self.checked_header::<T>(gc)?;
        // SAFETY: a live object of `T`'s class holds an initialized `T`; the
        // borrow of `self` keeps collections out.
        Some(unsafe { header::payload::<T>(header).as_ref() })
    }

    /// Mutably borrow a live object of type `T`.
    #[must_use]
    pub fn get_mut<T: HeapObject>(&mut self, gc: Gc<T>) -> Option<&mut T> {
        let header = self.checked_header::<T>(gc)?;
        // SAFETY: as in `get`; the exclusive borrow of `self` makes this the
        // only reference handed out.
        Some(unsafe { header::payload::<T>(header).as_mut() })
    }

    fn checked_header<T: HeapObject>(&self, gc: Gc<T>) -> Option<NonNull<ObjectHeader>> {
        let header = self.heap.find_object(gc.addr())?;
        // SAFETY: `find_object` only returns in-use headers.
        let class = unsafe { (*header.as_ptr()).class() }?;
        class.is::<T>().then_some(header)
    }

    /// Whether `object` addresses a live heap object.
    #[must_use]
    pub fn is_live(&self, object: HeapRef) -> bool {
        self.heap.find_object(object.addr()).is_some()
    }

    /// Class of a live object.
    #[must_use]
    pub fn class_of(&self, object: HeapRef) -> Option<&'static ObjectClass> {
        let header = self.heap.find_object(object.addr())?;
        // SAFETY: in-use header.
        unsafe { (*header.as_ptr()).class() }
    }

    /// Payload of a live object allocated with [`allocate`](Self::allocate).
    #[must_use]
    pub fn payload_ptr(&self, object: HeapRef) -> Option<NonNull<u8>> {
        let header = self.heap.find_object(object.addr())?;
        // SAFETY: every item is at least one header long; the payload may be
        // empty but the pointer is in bounds or one past the end.
        Some(unsafe { header::payload::<u8>(header) })
    }

    /// Unmanaged bytes currently attributed to a live object.
    #[must_use]
    pub fn unmanaged_size_of(&self, object: HeapRef) -> Option<usize> {
        let header = self.heap.find_object(object.addr())?;
        // SAFETY: in-use header.
        Some(unsafe { (*header.as_ptr()).unmanaged_bytes() })
    }

    /// Grow or shrink the unmanaged bytes attributed to `object` after its
    /// external buffer was resized.
    ///
    /// Returns `false` if `object` is not live. Does not start a collection;
    /// the next allocation sees the new total.
    pub fn change_unmanaged_usage(&mut self, object: HeapRef, delta: isize) -> bool {
        let Some(header) = self.heap.find_object(object.addr()) else {
            return false;
        };
        // SAFETY: in-use header, no other reference to it is live.
        let header = unsafe { &mut *header.as_ptr() };
        let old = header.unmanaged_bytes();
        let new = clamp_unmanaged(old.saturating_add_signed(delta));
        header.set_unmanaged_bytes(new);
        let new = new as usize;
        if new >= old {
            self.unmanaged.add(new - old);
        } else {
            self.unmanaged.release(old - new);
        }
        true
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Run a full collection now.
    ///
    /// Returns `false` without doing anything when collection is blocked.
    pub fn run_gc(&mut self) -> bool {
        self.collect(GcTrigger::Explicit, 0, None)
    }

    fn collect(&mut self, trigger: GcTrigger, requested: usize, pending: Option<&dyn Trace>) -> bool {
        if self.gc_blocked {
            return false;
        }
        assert!(!self.collecting, "collection started while collecting");
        self.collecting = true;

        let gc_id = next_gc_id();
        let _span = trace_gc_collection(trigger.as_str(), gc_id);
        let started = Instant::now();
        let mut timer = PhaseTimer::new();
        let before_bytes = self.heap.used_bytes();

        timer.start();
        log_phase_start(GcPhase::Mark, before_bytes);
        let objects_marked = mark_from_roots(
            &self.heap,
            Roots {
                pending,
                providers: &mut self.providers,
                persistent: &self.persistent,
                stack: &self.stack,
                weak: &self.weak,
                retention: self.retention.as_deref(),
            },
        );
        timer.end_mark();
        log_phase_end(GcPhase::Mark, objects_marked);

        timer.start();
        log_phase_start(GcPhase::Sweep, before_bytes);
        let weak_handles_reset = reset_weak_handles(&mut self.weak, &self.heap);
        let swept = self.heap.sweep();
        self.unmanaged.release(swept.unmanaged_released);
        let deletables_run = run_deletables(&mut self.deletables, false);
        timer.end_sweep();
        log_phase_end(GcPhase::Sweep, swept.objects_reclaimed);

        self.heap.reset_allocation_counters();
        // Only unmanaged pressure moves the limit; other triggers say nothing
        // about how much external memory the program keeps.
        if trigger == GcTrigger::Unmanaged {
            self.unmanaged.adjust_after_collection(requested);
        }
        self.collections += 1;
        self.last_metrics = GcMetrics {
            duration: started.elapsed(),
            mark_duration: timer.mark,
            sweep_duration: timer.sweep,
            objects_marked,
            objects_surviving: swept.objects_live,
            objects_reclaimed: swept.objects_reclaimed,
            bytes_reclaimed: swept.bytes_reclaimed,
            unmanaged_released: swept.unmanaged_released,
            chunks_released: swept.chunks_released,
            weak_handles_reset,
            deletables_run,
            trigger,
            total_collections: self.collections,
        };
        if self.config.stats {
            log_cycle_stats(&self.last_metrics, &self.stats());
        }

        self.collecting = false;
        true
    }

    /// Suppress or re-enable collection. Allocation keeps working while blocked.
    pub fn set_gc_blocked(&mut self, blocked: bool) {
        self.gc_blocked = blocked;
    }

    /// Whether collection is currently suppressed.
    #[must_use]
    pub const fn is_gc_blocked(&self) -> bool {
        self.gc_blocked
    }

    /// Block collection until the returned guard is dropped.
    ///
    /// The guard dereferences to the manager, so allocation continues
    /// through it.
    pub fn block_gc(&mut self) -> GcBlocker<'_> {
        let previous = std::mem::replace(&mut self.gc_blocked, true);
        GcBlocker { mm: self, previous }
    }

    /// Whether a collection is in progress.
    #[must_use]
    pub const fn is_collecting(&self) -> bool {
        self.collecting
    }

    // ========================================================================
    // Host hooks
    // ========================================================================

    /// Queue a notification to run once after the next sweep, or at teardown.
    pub fn register_deletable<D: Deletable + 'static>(&mut self, deletable: D) {
        self.deletables.push(Box::new(deletable));
    }

    /// Add a source of embedder roots, consulted on every collection.
    pub fn add_root_provider<P: RootProvider + 'static>(&mut self, provider: P) {
        self.providers.push(Box::new(provider));
    }

    /// Install the policy deciding which weak handles retain their target.
    ///
    /// Without a policy no weak handle keeps its target alive.
    pub fn set_retention_policy<R: RetentionPolicy + 'static>(&mut self, policy: R) {
        self.retention = Some(Box::new(policy));
    }

    // ========================================================================
    // Stack and handles
    // ========================================================================

    /// The evaluation stack.
    #[must_use]
    pub const fn stack(&self) -> &EvalStack {
        &self.stack
    }

    /// The evaluation stack, for pushing and popping.
    pub fn stack_mut(&mut self) -> &mut EvalStack {
        &mut self.stack
    }

    /// Root `value` until the handle is released.
    pub fn new_persistent(&mut self, value: impl Into<Value>) -> PersistentHandle {
        self.persistent.allocate(value.into())
    }

    /// Track `value` without rooting it.
    pub fn new_weak(&mut self, value: impl Into<Value>) -> WeakHandle {
        self.weak.allocate(value.into())
    }

    /// The persistent handle table.
    #[must_use]
    pub const fn persistent_handles(&self) -> &HandleTable<Strong> {
        &self.persistent
    }

    /// The persistent handle table, for updating or releasing handles.
    pub fn persistent_handles_mut(&mut self) -> &mut HandleTable<Strong> {
        &mut self.persistent
    }

    /// The weak handle table.
    #[must_use]
    pub const fn weak_handles(&self) -> &HandleTable<Weak> {
        &self.weak
    }

    /// The weak handle table, for updating or releasing handles.
    pub fn weak_handles_mut(&mut self) -> &mut HandleTable<Weak> {
        &mut self.weak
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Heap occupancy snapshot.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            unmanaged_bytes: self.unmanaged.usage(),
            unmanaged_threshold: self.unmanaged.limit(),
            ..self.heap.stats()
        }
    }

    /// Log per-size-class statistics and return them.
    pub fn dump_stats(&self) -> HeapStats {
        let stats = self.stats();
        log_heap_stats(&stats);
        stats
    }

    /// Metrics of the most recent collection.
    #[must_use]
    pub const fn last_gc_metrics(&self) -> &GcMetrics {
        &self.last_metrics
    }

    /// Collections run so far.
    #[must_use]
    pub const fn collections(&self) -> usize {
        self.collections
    }

    /// Unmanaged bytes attributed to live objects.
    #[must_use]
    pub const fn unmanaged_bytes(&self) -> usize {
        self.unmanaged.usage()
    }

    /// Current unmanaged trigger threshold.
    #[must_use]
    pub const fn unmanaged_threshold(&self) -> usize {
        self.unmanaged.limit()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Destroy every object, reset every weak handle, and run the remaining
    /// deletables with `last = true`.
    ///
    /// Every destroy hook runs exactly once. The manager stays usable and the
    /// call is idempotent; dropping the manager performs it as well.
    pub fn teardown(&mut self) {
        assert!(!self.collecting, "teardown during collection");
        self.collecting = true;

        // Nothing is marked from here on; stale marks must not keep objects.
        self.heap.clear_marks();
        reset_all_weak_handles(&mut self.weak);
        for value in self.persistent.values_mut() {
            *value = Value::Undefined;
        }
        self.stack.clear();

        let swept = self.heap.destroy_all();
        self.unmanaged.release(swept.unmanaged_released);
        run_deletables(&mut self.deletables, true);

        self.collecting = false;
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        if !self.collecting {
            self.teardown();
        }
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("collections", &self.collections)
            .field("gc_blocked", &self.gc_blocked)
            .field("unmanaged_bytes", &self.unmanaged.usage())
            .field("unmanaged_threshold", &self.unmanaged.limit())
            .finish_non_exhaustive()
    }
}

/// Keeps collection blocked while alive. See [`MemoryManager::block_gc`].
pub struct GcBlocker<'a> {
    mm: &'a mut MemoryManager,
    previous: bool,
}

impl Deref for GcBlocker<'_> {
    type Target = MemoryManager;

    fn deref(&self) -> &MemoryManager {
        self.mm
    }
}

impl DerefMut for GcBlocker<'_> {
    fn deref_mut(&mut self) -> &mut MemoryManager {
        self.mm
    }
}

impl Drop for GcBlocker<'_> {
    fn drop(&mut self) {
        self.mm.gc_blocked = self.previous;
    }
}

fn clamp_unmanaged(bytes: usize) -> u32 {
    u32::try_from(bytes).unwrap_or(u32::MAX)
}

fn oom(error: &AllocError) -> ! {
    log_alloc_failure(error);
    let layout = Layout::from_size_align(error.requested(), MAX_PAYLOAD_ALIGN)
        .unwrap_or_else(|_| Layout::new::<ObjectHeader>());
    handle_alloc_error(layout)
}

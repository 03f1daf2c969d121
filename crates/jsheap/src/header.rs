//! Object headers and internal classes.
//!
//! Every heap item starts with an [`ObjectHeader`]. While an item is free the
//! header only carries the free-list link; while it is in use the header
//! names the object's [`ObjectClass`] and holds the mark bit.

use std::any::TypeId;
use std::ptr::NonNull;

use crate::gc::Marker;
use crate::trace::HeapObject;

// ============================================================================
// Constants
// ============================================================================

/// Allocation granularity. Item sizes are multiples of this.
pub const SLOT_GRANULARITY: usize = 16;

/// Size of [`ObjectHeader`]; also the minimum object size.
pub const HEADER_SIZE: usize = std::mem::size_of::<ObjectHeader>();

/// Largest payload alignment an object may require.
pub const MAX_PAYLOAD_ALIGN: usize = SLOT_GRANULARITY;

const _: () = assert!(HEADER_SIZE == SLOT_GRANULARITY);

const FLAG_IN_USE: u32 = 1 << 0;
const FLAG_MARKED: u32 = 1 << 1;

/// Round `size` up to the allocation granularity, never below the header.
#[must_use]
pub const fn round_object_size(size: usize) -> usize {
    let size = if size < HEADER_SIZE { HEADER_SIZE } else { size };
    (size + SLOT_GRANULARITY - 1) & !(SLOT_GRANULARITY - 1)
}

// ============================================================================
// ObjectHeader
// ============================================================================

/// Header at the start of every heap item.
///
/// An all-zero header is a free item at the end of its free list.
#[repr(C, align(16))]
pub struct ObjectHeader {
    class: Option<&'static ObjectClass>,
    flags: u32,
    /// Free: index + 1 of the next free item in the chunk (0 ends the list).
    /// In use: unmanaged bytes attributed to this object.
    link: u32,
}

impl ObjectHeader {
    /// Whether the item holds a live (not yet reclaimed) object.
    #[must_use]
    pub const fn is_in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }

    /// Whether the object was reached by the current mark phase.
    #[must_use]
    pub const fn is_marked(&self) -> bool {
        self.flags & FLAG_MARKED != 0
    }

    /// The object's class. `None` for free items.
    #[must_use]
    pub const fn class(&self) -> Option<&'static ObjectClass> {
        self.class
    }

    /// Unmanaged bytes attributed to this object at allocation time.
    #[must_use]
    pub const fn unmanaged_bytes(&self) -> usize {
        if self.is_in_use() {
            self.link as usize
        } else {
            0
        }
    }

    /// Set the mark bit. Returns `false` if it was already set.
    pub(crate) fn try_mark(&mut self) -> bool {
        if self.is_marked() {
            return false;
        }
        self.flags |= FLAG_MARKED;
        true
    }

    pub(crate) fn clear_mark(&mut self) {
        self.flags &= !FLAG_MARKED;
    }

    /// Turn a zeroed free item into an in-use object of `class`.
    pub(crate) fn init_in_use(&mut self, class: &'static ObjectClass, unmanaged: u32) {
        debug_assert!(!self.is_in_use(), "allocating an item that is already in use");
        self.class = Some(class);
        self.flags = FLAG_IN_USE;
        self.link = unmanaged;
    }

    pub(crate) fn set_unmanaged_bytes(&mut self, bytes: u32) {
        debug_assert!(self.is_in_use());
        self.link = bytes;
    }

    pub(crate) const fn next_free(&self) -> u32 {
        self.link
    }

    pub(crate) fn set_next_free(&mut self, next: u32) {
        debug_assert!(!self.is_in_use(), "linking an in-use item into a free list");
        self.link = next;
    }
}

/// Pointer to the payload that follows `header`.
///
/// # Safety
///
/// `header` must point to an item at least `HEADER_SIZE + size_of::<T>()` bytes long.
#[must_use]
pub unsafe fn payload<T>(header: NonNull<ObjectHeader>) -> NonNull<T> {
    // SAFETY: the caller guarantees the item extends past the header.
    unsafe { header.cast::<u8>().add(HEADER_SIZE).cast::<T>() }
}

/// Destroy the object in `header` and zero the `item_size` bytes it spans.
///
/// Returns the unmanaged bytes the object was carrying.
///
/// # Safety
///
/// `header` must be an in-use object spanning `item_size` bytes.
pub(crate) unsafe fn reclaim(header: NonNull<ObjectHeader>, item_size: usize) -> usize {
    unsafe {
        let (class, unmanaged) = {
            let h = &*header.as_ptr();
            debug_assert!(h.is_in_use(), "double free of heap object");
            (h.class, h.unmanaged_bytes())
        };
        if let Some(destroy) = class.and_then(|c| c.destroy) {
            destroy(header);
        }
        std::ptr::write_bytes(header.as_ptr().cast::<u8>(), 0, item_size);
        unmanaged
    }
}

// ============================================================================
// ObjectClass
// ============================================================================

/// Type descriptor shared by all objects of one kind.
///
/// Classes for [`HeapObject`] types are built at compile time. Raw classes
/// describe payloads the embedder lays out by hand.
pub struct ObjectClass {
    name: &'static str,
    pub(crate) trace: unsafe fn(NonNull<ObjectHeader>, &mut Marker),
    pub(crate) destroy: Option<unsafe fn(NonNull<ObjectHeader>)>,
    type_id: Option<fn() -> TypeId>,
}

impl ObjectClass {
    /// Class for a typed heap object.
    #[must_use]
    pub const fn of<T: HeapObject>() -> Self {
        Self {
            name: T::NAME,
            trace: trace_erased::<T>,
            destroy: Some(destroy_erased::<T> as unsafe fn(NonNull<ObjectHeader>)),
            type_id: Some(TypeId::of::<T> as fn() -> TypeId),
        }
    }

    /// Class for a raw payload that holds no heap references and needs no cleanup.
    #[must_use]
    pub const fn leaf(name: &'static str) -> Self {
        Self {
            name,
            trace: trace_nothing,
            destroy: None,
            type_id: None,
        }
    }

    /// Class for a raw payload with custom marking and destruction.
    ///
    /// `trace` receives the object header and must mark every heap reference
    /// stored in the payload. `destroy` runs once when the object is reclaimed.
    #[must_use]
    pub const fn raw(
        name: &'static str,
        trace: unsafe fn(NonNull<ObjectHeader>, &mut Marker),
        destroy: Option<unsafe fn(NonNull<ObjectHeader>)>,
    ) -> Self {
        Self {
            name,
            trace,
            destroy,
            type_id: None,
        }
    }

    /// Human-readable class name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this is the class of `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id.is_some_and(|id| id() == TypeId::of::<T>())
    }

    /// Whether reclaiming an object of this class runs a destroy hook.
    #[must_use]
    pub const fn has_destroy_hook(&self) -> bool {
        self.destroy.is_some()
    }
}

impl std::fmt::Debug for ObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectClass")
            .field("name", &self.name)
            .field("destroy", &self.destroy.is_some())
            .finish_non_exhaustive()
    }
}

/// Compile-time class lookup for typed objects.
pub(crate) trait ClassOf {
    const CLASS: &'static ObjectClass;
}

impl<T: HeapObject> ClassOf for T {
    const CLASS: &'static ObjectClass = &ObjectClass::of::<T>();
}

unsafe fn trace_erased<T: HeapObject>(header: NonNull<ObjectHeader>, marker: &mut Marker) {
    // SAFETY: objects of this class were allocated with room for a `T`.
    let value = unsafe { payload::<T>(header).as_ref() };
    value.trace(marker);
}

unsafe fn destroy_erased<T: HeapObject>(header: NonNull<ObjectHeader>) {
    // SAFETY: the payload holds an initialized `T` that is dropped exactly once.
    unsafe {
        let value = payload::<T>(header).as_ptr();
        (*value).on_reclaim();
        std::ptr::drop_in_place(value);
    }
}

unsafe fn trace_nothing(_header: NonNull<ObjectHeader>, _marker: &mut Marker) {}

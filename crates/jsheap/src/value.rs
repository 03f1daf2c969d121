//! Tagged values and heap references.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::header::ObjectHeader;

/// Untyped reference to a heap object.
///
/// A `HeapRef` does not keep its target alive. It stays meaningful only while
/// the object is reachable from a root.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapRef(NonNull<ObjectHeader>);

impl HeapRef {
    pub(crate) const fn from_header(header: NonNull<ObjectHeader>) -> Self {
        Self(header)
    }

    /// Address of the object header.
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Reinterpret as a typed reference without checking the class.
    ///
    /// Use [`MemoryManager::get`](crate::MemoryManager::get) to find out
    /// whether the object really is a `T`.
    #[must_use]
    pub const fn cast<T>(self) -> Gc<T> {
        Gc::from_header(self.0)
    }
}

impl fmt::Debug for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({:p})", self.0)
    }
}

/// Typed reference to a heap object of type `T`.
///
/// Like [`HeapRef`], a `Gc` is a plain pointer: copying it is free and it
/// does not root the object.
pub struct Gc<T> {
    ptr: NonNull<ObjectHeader>,
    _marker: PhantomData<*const T>,
}

impl<T> Gc<T> {
    pub(crate) const fn from_header(ptr: NonNull<ObjectHeader>) -> Self {
        Self {
            ptr,
            _marker: PhantomData,
        }
    }

    /// Erase the type.
    #[must_use]
    pub const fn as_heap_ref(self) -> HeapRef {
        HeapRef(self.ptr)
    }

    /// Wrap in a tagged value.
    #[must_use]
    pub const fn to_value(self) -> Value {
        Value::Object(HeapRef(self.ptr))
    }

    /// Address of the object header.
    #[must_use]
    pub fn addr(self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Whether two references point at the same object.
    #[must_use]
    pub fn ptr_eq(a: Self, b: Self) -> bool {
        a.ptr == b.ptr
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Gc<T> {}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for Gc<T> {}

impl<T> Hash for Gc<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl<T> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gc<{}>({:p})", std::any::type_name::<T>(), self.ptr)
    }
}

impl<T> From<Gc<T>> for HeapRef {
    fn from(gc: Gc<T>) -> Self {
        gc.as_heap_ref()
    }
}

/// A tagged script value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Value {
    /// The `undefined` value. Also what cleared handles and slots hold.
    #[default]
    Undefined,
    /// The `null` value.
    Null,
    /// A boolean.
    Boolean(bool),
    /// An IEEE-754 double.
    Number(f64),
    /// A reference into the managed heap.
    Object(HeapRef),
}

impl Value {
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Whether the value refers to a heap object.
    #[must_use]
    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<HeapRef> {
        match self {
            Self::Object(r) => Some(*r),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<HeapRef> for Value {
    fn from(r: HeapRef) -> Self {
        Self::Object(r)
    }
}

impl<T> From<Gc<T>> for Value {
    fn from(gc: Gc<T>) -> Self {
        gc.to_value()
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Self>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

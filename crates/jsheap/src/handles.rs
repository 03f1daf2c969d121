//! Persistent and weak handle tables.
//!
//! Handles give the embedder references into the heap that outlive any
//! single stack frame. Strong handles are always roots. Weak handles only
//! keep their target alive while the retention policy says so, and are reset
//! to `undefined` once their target is collected.
//!
//! Slots are reused after release, so each handle carries the generation of
//! the slot it was issued for; a stale handle reads as `None`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::value::Value;

/// Marker for tables whose handles are roots.
#[derive(Debug)]
pub enum Strong {}

/// Marker for tables whose handles do not keep their target alive.
#[derive(Debug)]
pub enum Weak {}

/// Handle into a [`HandleTable`].
pub struct Handle<K> {
    index: u32,
    generation: u32,
    _kind: PhantomData<fn() -> K>,
}

/// Handle that roots its value.
pub type PersistentHandle = Handle<Strong>;
/// Handle that is reset when its value is collected.
pub type WeakHandle = Handle<Weak>;

impl<K> Handle<K> {
    /// Slot index, stable for the handle's lifetime.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Handle<K> {}

impl<K> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<K> Eq for Handle<K> {}

impl<K> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<K> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot {
    value: Value,
    generation: u32,
    occupied: bool,
}

/// Indexed storage of tagged values with slot reuse.
pub struct HandleTable<K> {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
    _kind: PhantomData<fn() -> K>,
}

impl<K> HandleTable<K> {
    /// Create an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _kind: PhantomData,
        }
    }

    /// Store `value` in a free slot, appending one if none is free.
    ///
    /// # Panics
    ///
    /// Panics if the table would exceed `u32::MAX` slots.
    pub fn allocate(&mut self, value: Value) -> Handle<K> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = value;
            slot.occupied = true;
            return Handle {
                index,
                generation: slot.generation,
                _kind: PhantomData,
            };
        }
        let index = u32::try_from(self.slots.len()).expect("handle table overflow");
        self.slots.push(Slot {
            value,
            generation: 0,
            occupied: true,
        });
        Handle {
            index,
            generation: 0,
            _kind: PhantomData,
        }
    }

    fn slot(&self, handle: Handle<K>) -> Option<&Slot> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.occupied && slot.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: Handle<K>) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.occupied && slot.generation == handle.generation)
    }

    /// Current value, or `None` for a released handle.
    #[must_use]
    pub fn get(&self, handle: Handle<K>) -> Option<Value> {
        self.slot(handle).map(|slot| slot.value)
    }

    /// Overwrite the value. Returns `false` for a released handle.
    pub fn set(&mut self, handle: Handle<K>, value: Value) -> bool {
        self.slot_mut(handle).map(|slot| slot.value = value).is_some()
    }

    /// Free the slot and return its last value. Releasing twice is a no-op.
    pub fn release(&mut self, handle: Handle<K>) -> Option<Value> {
        let slot = self.slot_mut(handle)?;
        let value = std::mem::take(&mut slot.value);
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Live handles and their values.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<K>, Value)> + '_ {
        self.slots.iter().zip(0u32..).filter(|(slot, _)| slot.occupied).map(|(slot, index)| {
            (
                Handle {
                    index,
                    generation: slot.generation,
                    _kind: PhantomData,
                },
                slot.value,
            )
        })
    }

    /// Values of live handles.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> + '_ {
        self.slots
            .iter_mut()
            .filter(|slot| slot.occupied)
            .map(|slot| &mut slot.value)
    }

    /// Number of live handles.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no handle is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<K> Default for HandleTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for HandleTable<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_get_set() {
        let mut table = HandleTable::<Strong>::new();
        let h = table.allocate(Value::Number(1.0));
        assert_eq!(table.get(h), Some(Value::Number(1.0)));
        assert!(table.set(h, Value::Boolean(true)));
        assert_eq!(table.get(h), Some(Value::Boolean(true)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_release_reuses_slot_with_new_generation() {
        let mut table = HandleTable::<Weak>::new();
        let first = table.allocate(Value::Null);
        assert_eq!(table.release(first), Some(Value::Null));
        assert_eq!(table.release(first), None);

        let second = table.allocate(Value::Number(2.0));
        assert_eq!(second.index(), first.index());
        assert_ne!(second, first);
        assert_eq!(table.get(first), None);
        assert!(!table.set(first, Value::Null));
        assert_eq!(table.get(second), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_iter_skips_released() {
        let mut table = HandleTable::<Strong>::new();
        let a = table.allocate(Value::Number(1.0));
        let b = table.allocate(Value::Number(2.0));
        let c = table.allocate(Value::Number(3.0));
        table.release(b);
        let live: Vec<_> = table.iter().collect();
        assert_eq!(live, vec![(a, Value::Number(1.0)), (c, Value::Number(3.0))]);
        assert_eq!(table.len(), 2);

        for value in table.values_mut() {
            *value = Value::Undefined;
        }
        assert_eq!(table.get(c), Some(Value::Undefined));
    }
}

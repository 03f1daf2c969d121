//! The interpreter's evaluation stack.
//!
//! Values between `0` and `top` are roots. Popping only moves `top`, so slots
//! above it may still hold stale references; the collector never reads them,
//! and values below `top` are validated against the heap before marking.

use crate::value::Value;

#[derive(Debug, Default)]
pub struct EvalStack {
    slots: Vec<Value>,
    top: usize,
}

impl EvalStack {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            top: 0,
        }
    }

    /// Push `value` and return its slot index.
    pub fn push(&mut self, value: Value) -> usize {
        let index = self.top;
        if index == self.slots.len() {
            self.slots.push(value);
        } else {
            self.slots[index] = value;
        }
        self.top += 1;
        index
    }

    /// Pop the top value, leaving the slot contents in place.
    pub fn pop(&mut self) -> Option<Value> {
        self.top = self.top.checked_sub(1)?;
        Some(self.slots[self.top])
    }

    /// Pop the top value and clear the slot.
    pub fn pop_clear(&mut self) -> Option<Value> {
        self.top = self.top.checked_sub(1)?;
        Some(std::mem::take(&mut self.slots[self.top]))
    }

    /// Reserve `n` slots set to `undefined` and return the index of the first.
    pub fn alloc_frame(&mut self, n: usize) -> usize {
        let base = self.top;
        let end = base + n;
        if self.slots.len() < end {
            self.slots.resize(end, Value::Undefined);
        }
        self.slots[base..end].fill(Value::Undefined);
        self.top = end;
        base
    }

    /// Value at `index`, if below the top.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.live_slots().get(index).copied()
    }

    /// Overwrite a slot below the top. Returns `false` if `index` is not live.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        if index >= self.top {
            return false;
        }
        self.slots[index] = value;
        true
    }

    /// Drop every slot at or above `top`. Contents are left as they are.
    pub fn truncate(&mut self, top: usize) {
        self.top = self.top.min(top);
    }

    /// Number of live slots.
    #[must_use]
    pub const fn top(&self) -> usize {
        self.top
    }

    #[must_use]
    pub fn live_slots(&self) -> &[Value] {
        &self.slots[..self.top]
    }

    /// Empty the stack and clear every slot.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.top = 0;
    }
}

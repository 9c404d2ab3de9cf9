//! Evaluation stack and call frames
//!
//! The stack is one contiguous vector of value slots shared by every active
//! call. Each [`CallFrame`] owns the window starting at its `base`; the called
//! function value sits in the slot just below the window.
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ arg₁ … argₙ / results (top)         │  ← frame N window
//! │ function N                          │  ← base - 1
//! ├─────────────────────────────────────┤
//! │ frame N-1 window                    │
//! │   ...                               │
//! └─────────────────────────────────────┘
//! ```
//!
//! Positive indices address slots relative to the current frame (1-based),
//! negative indices count down from the top (`-1` is the top slot).

use crate::defaults::MAX_STACK_SLOTS;
use crate::value::Value;
use crate::{VmError, VmResult};
use std::rc::Rc;

/// Activation record of one native call
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// First argument slot
    pub base: usize,

    /// Function being executed
    pub function: Value,

    /// Debug name of the function
    pub name: Option<Rc<str>>,
}

impl CallFrame {
    /// Create a call frame
    pub fn new(base: usize, function: Value, name: Option<Rc<str>>) -> Self {
        Self {
            base,
            function,
            name,
        }
    }
}

/// Value stack with frame bookkeeping
#[derive(Debug)]
pub struct Stack {
    slots: Vec<Value>,
    frames: Vec<CallFrame>,
    max_size: usize,
}

impl Stack {
    /// Create a stack with the default slot limit
    pub fn new() -> Self {
        Self::with_capacity(MAX_STACK_SLOTS)
    }

    /// Create a stack with a custom slot limit
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(64),
            frames: Vec::new(),
            max_size,
        }
    }

    /// Base slot of the current frame
    #[inline]
    pub fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.base)
    }

    /// Number of slots in the current frame
    #[inline]
    pub fn top(&self) -> usize {
        self.slots.len() - self.base()
    }

    /// Total number of occupied slots across all frames
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is occupied
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Resolve a frame index into an absolute slot, if it is in range
    pub fn slot_of(&self, index: i32) -> Option<usize> {
        let base = self.base();
        let len = self.slots.len();
        if index > 0 {
            let slot = base + index as usize - 1;
            (slot < len).then_some(slot)
        } else if index < 0 {
            let back = index.unsigned_abs() as usize;
            (back <= len - base).then(|| len - back)
        } else {
            None
        }
    }

    /// Convert a frame index to its positive form
    pub fn abs_index(&self, index: i32) -> i32 {
        if index < 0 {
            self.top() as i32 + index + 1
        } else {
            index
        }
    }

    /// Fail if the stack holds more than its slot limit
    pub fn check_overflow(&self) -> VmResult<()> {
        if self.slots.len() > self.max_size {
            return Err(VmError::runtime("stack overflow"));
        }
        Ok(())
    }

    /// Push a value
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.slots.push(value);
    }

    /// Pop the top value of the current frame
    pub fn pop(&mut self) -> Option<Value> {
        if self.top() == 0 {
            return None;
        }
        self.slots.pop()
    }

    /// Value at a frame index (`nil` when out of range)
    pub fn get(&self, index: i32) -> Value {
        self.slot_of(index)
            .map(|s| self.slots[s].clone())
            .unwrap_or_default()
    }

    /// Overwrite the slot at a frame index
    pub fn set(&mut self, index: i32, value: Value) -> bool {
        match self.slot_of(index) {
            Some(s) => {
                self.slots[s] = value;
                true
            }
            None => false,
        }
    }

    /// Set the frame's top; growing fills with `nil`
    pub fn set_top(&mut self, index: i32) {
        let base = self.base();
        let new_len = if index >= 0 {
            base + index as usize
        } else {
            let back = (index + 1).unsigned_abs() as usize;
            self.slots.len().saturating_sub(back).max(base)
        };
        self.slots.resize(new_len, Value::Nil);
    }

    /// Truncate to an absolute slot count
    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    /// Move the top value into `index`, shifting values above it up
    pub fn insert(&mut self, index: i32) {
        if let Some(slot) = self.slot_of(index) {
            if let Some(v) = self.slots.pop() {
                self.slots.insert(slot, v);
            }
        }
    }

    /// Remove the value at `index`, shifting values above it down
    pub fn remove(&mut self, index: i32) -> Option<Value> {
        self.slot_of(index).map(|slot| self.slots.remove(slot))
    }

    /// Remove `count` values from the top and return them in stack order
    pub fn pop_n(&mut self, count: usize) -> Vec<Value> {
        let count = count.min(self.top());
        let start = self.slots.len() - count;
        self.slots.split_off(start)
    }

    /// Push a call frame
    pub fn push_frame(&mut self, frame: CallFrame) {
        self.frames.push(frame);
    }

    /// Pop the current call frame
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    /// Number of active frames
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Drop frames above `depth`
    pub fn truncate_frames(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Active frames, innermost last
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Current frame
    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Every occupied slot (for root scanning)
    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    /// Drop all slots and frames
    pub fn clear(&mut self) {
        self.slots.clear();
        self.frames.clear();
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

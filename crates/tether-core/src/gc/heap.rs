//! Heap arena for collected objects
//!
//! Objects live in a slot vector. A [`GcRef`] names a slot together with the
//! generation it was allocated in, so a reference that outlives its object is
//! detected instead of silently aliasing whatever reuses the slot.

use crate::function::NativeFunction;
use crate::table::Table;
use crate::userdata::Userdata;
use crate::{VmError, VmResult};
use std::fmt;

/// Generational reference to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    /// Slot index
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x}.{}", self.index, self.generation)
    }
}

/// Heap object
#[derive(Debug)]
pub enum GcObject {
    /// Table
    Table(Table),
    /// Native closure
    Function(NativeFunction),
    /// Userdata
    Userdata(Userdata),
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    marked: bool,
    object: Option<GcObject>,
}

/// Heap allocator for collected objects
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    max_objects: usize,
}

impl Heap {
    /// Create a heap with an optional object limit (0 = unlimited)
    pub fn new(max_objects: usize) -> Self {
        Self {
            max_objects,
            ..Self::default()
        }
    }

    /// Allocate an object
    ///
    /// Fails with [`VmError::Memory`] once the object limit is reached.
    pub fn allocate(&mut self, object: GcObject) -> VmResult<GcRef> {
        if self.max_objects > 0 && self.live >= self.max_objects {
            return Err(VmError::Memory);
        }
        Ok(self.insert(object))
    }

    /// Allocate an object ignoring the object limit
    pub(crate) fn insert(&mut self, object: GcObject) -> GcRef {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.marked = false;
            return GcRef {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            marked: false,
            object: Some(object),
        });
        GcRef {
            index,
            generation: 0,
        }
    }

    fn slot(&self, r: GcRef) -> Option<&Slot> {
        self.slots
            .get(r.index as usize)
            .filter(|s| s.generation == r.generation && s.object.is_some())
    }

    fn slot_mut(&mut self, r: GcRef) -> Option<&mut Slot> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|s| s.generation == r.generation && s.object.is_some())
    }

    /// Look up an object
    pub fn get(&self, r: GcRef) -> Option<&GcObject> {
        self.slot(r).and_then(|s| s.object.as_ref())
    }

    /// Look up an object mutably
    pub fn get_mut(&mut self, r: GcRef) -> Option<&mut GcObject> {
        self.slot_mut(r).and_then(|s| s.object.as_mut())
    }

    /// Whether `r` still names a live object
    pub fn contains(&self, r: GcRef) -> bool {
        self.slot(r).is_some()
    }

    /// Table accessor
    pub fn table(&self, r: GcRef) -> Option<&Table> {
        match self.get(r) {
            Some(GcObject::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// Mutable table accessor
    pub fn table_mut(&mut self, r: GcRef) -> Option<&mut Table> {
        match self.get_mut(r) {
            Some(GcObject::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// Function accessor
    pub fn function(&self, r: GcRef) -> Option<&NativeFunction> {
        match self.get(r) {
            Some(GcObject::Function(f)) => Some(f),
            _ => None,
        }
    }

    /// Userdata accessor
    pub fn userdata(&self, r: GcRef) -> Option<&Userdata> {
        match self.get(r) {
            Some(GcObject::Userdata(u)) => Some(u),
            _ => None,
        }
    }

    /// Mutable userdata accessor
    pub fn userdata_mut(&mut self, r: GcRef) -> Option<&mut Userdata> {
        match self.get_mut(r) {
            Some(GcObject::Userdata(u)) => Some(u),
            _ => None,
        }
    }

    /// Free an object, returning it so the caller controls when it is dropped
    pub fn free(&mut self, r: GcRef) -> Option<GcObject> {
        let slot = self.slot_mut(r)?;
        let object = slot.object.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.marked = false;
        self.live -= 1;
        self.free.push(r.index);
        object
    }

    /// Free every object
    pub fn drain(&mut self) -> Vec<GcObject> {
        let objects: Vec<GcObject> = self
            .slots
            .iter_mut()
            .filter_map(|s| {
                s.generation = s.generation.wrapping_add(1);
                s.object.take()
            })
            .collect();
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.live = 0;
        objects
    }

    /// References to every live object, in slot order
    pub fn live_refs(&self) -> Vec<GcRef> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.object.is_some())
            .map(|(i, s)| GcRef {
                index: i as u32,
                generation: s.generation,
            })
            .collect()
    }

    /// Number of live objects
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Object limit (0 = unlimited)
    pub fn max_objects(&self) -> usize {
        self.max_objects
    }

    /// Set the object limit (0 = unlimited)
    pub fn set_max_objects(&mut self, max: usize) {
        self.max_objects = max;
    }

    /// Set the mark bit; returns `true` if the object was live and unmarked
    pub(crate) fn mark(&mut self, r: GcRef) -> bool {
        match self.slot_mut(r) {
            Some(slot) if !slot.marked => {
                slot.marked = true;
                true
            }
            _ => false,
        }
    }

    /// Whether the object is marked (stale references count as unmarked)
    pub(crate) fn is_marked(&self, r: GcRef) -> bool {
        self.slot(r).map_or(false, |s| s.marked)
    }

    /// Clear every mark bit
    pub(crate) fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
    }
}

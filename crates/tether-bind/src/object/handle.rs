//! Handle arena
//!
//! Every exposed native object gets one [`HandleId`]. Ids are generational:
//! once a slot is freed its generation moves on, so a stale id can never
//! reach the object that reuses the slot.

use super::HandleState;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::rc::Rc;

/// Identifier of an exposed object, stored as the payload of its userdata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

/// Bridge-side record of an exposed object
pub(crate) struct Handle {
    /// The native object; `None` once released
    pub object: Option<Rc<dyn Any>>,
    /// Identity key (address of the object)
    pub key: usize,
    /// Dynamic class
    pub class: Rc<str>,
    /// Native-visible references
    pub refs: usize,
    /// A newer handle took over this object before this one was finalized
    pub superseded: bool,
}

impl Handle {
    pub fn new(object: Rc<dyn Any>, key: usize, class: Rc<str>) -> Self {
        Self {
            object: Some(object),
            key,
            class,
            refs: 1,
            superseded: false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.object.is_some()
    }
}

struct Slot {
    generation: u32,
    handle: Option<Handle>,
}

/// Generational arena of handles with an index from identity key to the
/// current handle of that object
#[derive(Default)]
pub(crate) struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_key: FxHashMap<usize, HandleId>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` and make it the current handle for its key
    pub fn insert(&mut self, handle: Handle) -> HandleId {
        let key = handle.key;
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.handle = Some(handle);
                HandleId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    handle: Some(handle),
                });
                HandleId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.by_key.insert(key, id);
        id
    }

    pub fn get(&self, id: HandleId) -> Option<&Handle> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.handle.as_ref())
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut Handle> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.handle.as_mut())
    }

    /// Free the slot of `id`
    pub fn remove(&mut self, id: HandleId) -> Option<Handle> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let handle = slot.handle.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.forget_key(handle.key, id);
        Some(handle)
    }

    /// Current handle of the object with identity `key`
    pub fn find(&self, key: usize) -> Option<HandleId> {
        self.by_key.get(&key).copied()
    }

    /// Drop the key index entry if it still points at `id`
    pub fn forget_key(&mut self, key: usize, id: HandleId) {
        if self.by_key.get(&key) == Some(&id) {
            self.by_key.remove(&key);
        }
    }

    /// Make a superseded handle current again with `refs` references
    pub fn reinstate(&mut self, id: HandleId, refs: usize) {
        let Some(h) = self.get_mut(id) else {
            return;
        };
        h.superseded = false;
        h.refs = refs;
        let key = h.key;
        self.by_key.insert(key, id);
    }

    pub fn state(&self, id: HandleId) -> HandleState {
        match self.get(id) {
            Some(h) if h.is_live() => HandleState::Live,
            Some(_) => HandleState::Released,
            None => HandleState::Collected,
        }
    }

    /// Number of handles not yet finalized
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.handle.is_some()).count()
    }
}

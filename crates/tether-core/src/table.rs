//! Tables
//!
//! A table is an insertion-ordered associative array. Integral float keys are
//! normalized to integers so `t[1]` and `t[1.0]` address the same slot.
//! Assigning `nil` leaves a tombstone behind; tombstones keep `next` stable
//! while a traversal clears fields and are purged by the collector.

use crate::gc::GcRef;
use crate::value::{float_to_integer, ByteStr, Value};
use crate::{VmError, VmResult};
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Normalized table key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    /// Boolean key
    Boolean(bool),
    /// Integer key (including integral floats)
    Integer(i64),
    /// Non-integral float key, stored by bit pattern
    Number(u64),
    /// String key
    String(ByteStr),
    /// Table key
    Table(GcRef),
    /// Function key
    Function(GcRef),
    /// Userdata key
    Userdata(GcRef),
    /// Light userdata key
    LightUserdata(usize),
}

impl TableKey {
    /// Normalize a value into a key; `nil` and NaN are not valid keys
    pub fn from_value(value: &Value) -> Option<TableKey> {
        Some(match value {
            Value::Nil => return None,
            Value::Boolean(b) => TableKey::Boolean(*b),
            Value::Integer(i) => TableKey::Integer(*i),
            Value::Number(n) => {
                if n.is_nan() {
                    return None;
                }
                match float_to_integer(*n) {
                    Some(i) => TableKey::Integer(i),
                    None => TableKey::Number(n.to_bits()),
                }
            }
            Value::String(s) => TableKey::String(s.clone()),
            Value::Table(r) => TableKey::Table(*r),
            Value::Function(r) => TableKey::Function(*r),
            Value::Userdata(r) => TableKey::Userdata(*r),
            Value::LightUserdata(p) => TableKey::LightUserdata(*p),
        })
    }

    /// Convert back into a value
    pub fn to_value(&self) -> Value {
        match self {
            TableKey::Boolean(b) => Value::Boolean(*b),
            TableKey::Integer(i) => Value::Integer(*i),
            TableKey::Number(bits) => Value::Number(f64::from_bits(*bits)),
            TableKey::String(s) => Value::String(s.clone()),
            TableKey::Table(r) => Value::Table(*r),
            TableKey::Function(r) => Value::Function(*r),
            TableKey::Userdata(r) => Value::Userdata(*r),
            TableKey::LightUserdata(p) => Value::LightUserdata(*p),
        }
    }

    /// Heap reference held by this key, if any
    pub fn as_gc(&self) -> Option<GcRef> {
        match self {
            TableKey::Table(r) | TableKey::Function(r) | TableKey::Userdata(r) => Some(*r),
            _ => None,
        }
    }
}

/// Heap table
#[derive(Debug, Default)]
pub struct Table {
    entries: FxIndexMap<TableKey, Value>,
    metatable: Option<GcRef>,
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with preallocated space
    pub fn with_capacity(narr: usize, nrec: usize) -> Self {
        Self {
            entries: FxIndexMap::with_capacity_and_hasher(narr + nrec, Default::default()),
            metatable: None,
        }
    }

    /// Raw lookup
    pub fn get(&self, key: &Value) -> Value {
        match TableKey::from_value(key) {
            Some(k) => self.get_key(&k),
            None => Value::Nil,
        }
    }

    /// Raw lookup by normalized key
    pub fn get_key(&self, key: &TableKey) -> Value {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Raw lookup by integer key
    pub fn get_int(&self, key: i64) -> Value {
        self.get_key(&TableKey::Integer(key))
    }

    /// Raw lookup by string key
    pub fn get_str(&self, key: &str) -> Value {
        self.get_key(&TableKey::String(ByteStr::from(key)))
    }

    /// Raw assignment
    pub fn set(&mut self, key: Value, value: Value) -> VmResult<()> {
        let k = match TableKey::from_value(&key) {
            Some(k) => k,
            None if key.is_nil() => return Err(VmError::runtime("table index is nil")),
            None => return Err(VmError::runtime("table index is NaN")),
        };
        self.set_key(k, value);
        Ok(())
    }

    /// Raw assignment by normalized key
    pub fn set_key(&mut self, key: TableKey, value: Value) {
        if value.is_nil() {
            if let Some(slot) = self.entries.get_mut(&key) {
                *slot = Value::Nil;
            }
        } else {
            self.entries.insert(key, value);
        }
    }

    /// Raw assignment by integer key
    pub fn set_int(&mut self, key: i64, value: Value) {
        self.set_key(TableKey::Integer(key), value);
    }

    /// Raw assignment by string key
    pub fn set_str(&mut self, key: &str, value: Value) {
        self.set_key(TableKey::String(ByteStr::from(key)), value);
    }

    /// Border length: the count of consecutive non-nil integer keys from 1
    pub fn len(&self) -> usize {
        let mut n = 0i64;
        while !self.get_int(n + 1).is_nil() {
            n += 1;
        }
        n as usize
    }

    /// Whether the table holds no non-nil entries
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Traversal step: the entry following `key` (`nil` starts the traversal).
    ///
    /// Returns `Err` if `key` is not present in the table.
    pub fn next(&self, key: &Value) -> VmResult<Option<(Value, Value)>> {
        let start = if key.is_nil() {
            0
        } else {
            let k = TableKey::from_value(key)
                .ok_or_else(|| VmError::runtime("invalid key to 'next'"))?;
            match self.entries.get_index_of(&k) {
                Some(i) => i + 1,
                None => return Err(VmError::runtime("invalid key to 'next'")),
            }
        };
        Ok(self
            .entries
            .iter()
            .skip(start)
            .find(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.to_value(), v.clone())))
    }

    /// Iterate over non-nil entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &Value)> + '_ {
        self.entries.iter().filter(|(_, v)| !v.is_nil())
    }

    /// Metatable reference
    #[inline]
    pub fn metatable(&self) -> Option<GcRef> {
        self.metatable
    }

    /// Set or clear the metatable
    #[inline]
    pub fn set_metatable(&mut self, mt: Option<GcRef>) {
        self.metatable = mt;
    }

    /// Clear every entry matching `pred` (used for weak tables)
    pub(crate) fn clear_where(&mut self, mut pred: impl FnMut(&TableKey, &Value) -> bool) {
        for (k, v) in self.entries.iter_mut() {
            if !v.is_nil() && pred(k, v) {
                *v = Value::Nil;
            }
        }
    }

    /// Drop tombstones left by `nil` assignments
    pub(crate) fn purge_tombstones(&mut self) {
        self.entries.retain(|_, v| !v.is_nil());
    }
}

//! Table access, metatables, globals and the registry

use super::State;
use crate::defaults::MAX_META_CHAIN;
use crate::gc::GcRef;
use crate::table::Table;
use crate::value::{Value, ValueType};
use crate::{VmError, VmResult};

fn index_error(value: &Value) -> VmError {
    VmError::runtime(format!("attempt to index a {} value", value.type_name()))
}

fn table_expected(value: &Value) -> VmError {
    VmError::runtime(format!("table expected, got {}", value.type_name()))
}

impl State {
    // ========================================================================
    // Value-level access
    // ========================================================================

    /// Metatable of a table or userdata value
    pub fn metatable_of(&self, value: &Value) -> Option<GcRef> {
        let heap = self.heap();
        match value {
            Value::Table(r) => heap.table(*r).and_then(Table::metatable),
            Value::Userdata(r) => heap.userdata(*r).and_then(|u| u.metatable),
            _ => None,
        }
    }

    /// Raw field of a value's metatable (`nil` when absent)
    pub fn metafield_of(&self, value: &Value, name: &str) -> Value {
        match self.metatable_of(value) {
            Some(mt) => self
                .heap()
                .table(mt)
                .map(|t| t.get_str(name))
                .unwrap_or_default(),
            None => Value::Nil,
        }
    }

    /// Raw lookup in a table value
    pub fn raw_get_value(&self, table: &Value, key: &Value) -> VmResult<Value> {
        match table {
            Value::Table(r) => self
                .heap()
                .table(*r)
                .map(|t| t.get(key))
                .ok_or_else(|| table_expected(table)),
            other => Err(table_expected(other)),
        }
    }

    /// Raw assignment into a table value
    pub fn raw_set_value(&self, table: &Value, key: Value, value: Value) -> VmResult<()> {
        match table {
            Value::Table(r) => match self.heap_mut().table_mut(*r) {
                Some(t) => t.set(key, value),
                None => Err(table_expected(table)),
            },
            other => Err(table_expected(other)),
        }
    }

    /// `obj[key]` honoring `__index`
    pub fn index_value(&self, obj: &Value, key: &Value) -> VmResult<Value> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            let (raw, mt) = {
                let heap = self.heap();
                match &current {
                    Value::Table(r) => {
                        let t = heap.table(*r).ok_or_else(|| index_error(&current))?;
                        (t.get(key), t.metatable())
                    }
                    Value::Userdata(r) => {
                        (Value::Nil, heap.userdata(*r).and_then(|u| u.metatable))
                    }
                    other => return Err(index_error(other)),
                }
            };
            if !raw.is_nil() {
                return Ok(raw);
            }
            let handler = match mt {
                Some(mt) => self
                    .heap()
                    .table(mt)
                    .map(|t| t.get_str("__index"))
                    .unwrap_or_default(),
                None => Value::Nil,
            };
            match handler {
                Value::Nil if matches!(current, Value::Table(_)) => return Ok(Value::Nil),
                Value::Nil => return Err(index_error(&current)),
                Value::Function(_) => {
                    return self.call_metamethod(handler, vec![current, key.clone()]);
                }
                next => current = next,
            }
        }
        Err(VmError::runtime("'__index' chain too long; possible loop"))
    }

    /// `obj[key] = value` honoring `__newindex`
    pub fn set_value_field(&self, obj: &Value, key: Value, value: Value) -> VmResult<()> {
        let mut current = obj.clone();
        for _ in 0..MAX_META_CHAIN {
            let (present, mt) = {
                let heap = self.heap();
                match &current {
                    Value::Table(r) => {
                        let t = heap.table(*r).ok_or_else(|| index_error(&current))?;
                        (!t.get(&key).is_nil(), t.metatable())
                    }
                    Value::Userdata(r) => (false, heap.userdata(*r).and_then(|u| u.metatable)),
                    other => return Err(index_error(other)),
                }
            };
            let handler = match mt {
                Some(mt) if !present => self
                    .heap()
                    .table(mt)
                    .map(|t| t.get_str("__newindex"))
                    .unwrap_or_default(),
                _ => Value::Nil,
            };
            match handler {
                Value::Nil if matches!(current, Value::Table(_)) => {
                    return self.raw_set_value(&current, key, value);
                }
                Value::Nil => return Err(index_error(&current)),
                Value::Function(_) => {
                    self.call_metamethod_n(handler, vec![current, key, value], 0)?;
                    return Ok(());
                }
                next => current = next,
            }
        }
        Err(VmError::runtime("'__newindex' chain too long; possible loop"))
    }

    fn call_metamethod(&self, handler: Value, args: Vec<Value>) -> VmResult<Value> {
        self.call_metamethod_n(handler, args, 1)?;
        Ok(self.pop_value())
    }

    fn call_metamethod_n(
        &self,
        handler: Value,
        args: Vec<Value>,
        nresults: usize,
    ) -> VmResult<()> {
        let nargs = args.len();
        self.push_value(handler);
        for a in args {
            self.push_value(a);
        }
        self.call(nargs, Some(nresults))
    }

    // ========================================================================
    // Stack-level table access
    // ========================================================================

    /// Pop a key and push `t[key]`, where `t` is the value at `index`
    pub fn get_table(&self, index: i32) -> VmResult<ValueType> {
        let obj = self.value_at(index);
        let key = self.pop_value();
        let v = self.index_value(&obj, &key)?;
        let ty = v.value_type();
        self.push_value(v);
        Ok(ty)
    }

    /// Push `t[name]`
    pub fn get_field(&self, index: i32, name: &str) -> VmResult<ValueType> {
        let obj = self.value_at(index);
        let v = self.index_value(&obj, &Value::string(name))?;
        let ty = v.value_type();
        self.push_value(v);
        Ok(ty)
    }

    /// Push `t[n]`
    pub fn get_index(&self, index: i32, n: i64) -> VmResult<ValueType> {
        let obj = self.value_at(index);
        let v = self.index_value(&obj, &Value::Integer(n))?;
        let ty = v.value_type();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value and a key (value on top) and assign `t[key] = value`
    pub fn set_table(&self, index: i32) -> VmResult<()> {
        let obj = self.value_at(index);
        let value = self.pop_value();
        let key = self.pop_value();
        self.set_value_field(&obj, key, value)
    }

    /// Pop a value and assign `t[name] = value`
    pub fn set_field(&self, index: i32, name: &str) -> VmResult<()> {
        let obj = self.value_at(index);
        let value = self.pop_value();
        self.set_value_field(&obj, Value::string(name), value)
    }

    /// Pop a value and assign `t[n] = value`
    pub fn set_index(&self, index: i32, n: i64) -> VmResult<()> {
        let obj = self.value_at(index);
        let value = self.pop_value();
        self.set_value_field(&obj, Value::Integer(n), value)
    }

    /// Pop a key and push the raw `t[key]`
    pub fn raw_get(&self, index: i32) -> VmResult<ValueType> {
        let obj = self.value_at(index);
        let key = self.pop_value();
        let v = self.raw_get_value(&obj, &key)?;
        let ty = v.value_type();
        self.push_value(v);
        Ok(ty)
    }

    /// Push the raw `t[n]`
    pub fn raw_get_i(&self, index: i32, n: i64) -> VmResult<ValueType> {
        let obj = self.value_at(index);
        let v = self.raw_get_value(&obj, &Value::Integer(n))?;
        let ty = v.value_type();
        self.push_value(v);
        Ok(ty)
    }

    /// Push the raw `t[name]`
    pub fn raw_get_field(&self, index: i32, name: &str) -> VmResult<ValueType> {
        let obj = self.value_at(index);
        let v = self.raw_get_value(&obj, &Value::string(name))?;
        let ty = v.value_type();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value and a key and assign raw `t[key] = value`
    pub fn raw_set(&self, index: i32) -> VmResult<()> {
        let obj = self.value_at(index);
        let value = self.pop_value();
        let key = self.pop_value();
        self.raw_set_value(&obj, key, value)
    }

    /// Pop a value and assign raw `t[n] = value`
    pub fn raw_set_i(&self, index: i32, n: i64) -> VmResult<()> {
        let obj = self.value_at(index);
        let value = self.pop_value();
        self.raw_set_value(&obj, Value::Integer(n), value)
    }

    /// Pop a value and assign raw `t[name] = value`
    pub fn raw_set_field(&self, index: i32, name: &str) -> VmResult<()> {
        let obj = self.value_at(index);
        let value = self.pop_value();
        self.raw_set_value(&obj, Value::string(name), value)
    }

    /// Raw length: border of a table, byte length of a string, 0 otherwise
    pub fn raw_len(&self, index: i32) -> usize {
        match self.value_at(index) {
            Value::Table(r) => self.heap().table(r).map_or(0, Table::len),
            Value::String(s) => s.len(),
            _ => 0,
        }
    }

    /// Pop a key and push the next key/value pair of the table at `index`
    ///
    /// Returns `false` (pushing nothing) when the traversal is complete.
    pub fn next(&self, index: i32) -> VmResult<bool> {
        let obj = self.value_at(index);
        let key = self.pop_value();
        let entry = match &obj {
            Value::Table(r) => match self.heap().table(*r) {
                Some(t) => t.next(&key)?,
                None => return Err(table_expected(&obj)),
            },
            other => return Err(table_expected(other)),
        };
        match entry {
            Some((k, v)) => {
                self.push_value(k);
                self.push_value(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // Metatables and user values
    // ========================================================================

    /// Push the metatable of the value at `index`; returns `false` (pushing
    /// nothing) if it has none
    pub fn get_metatable(&self, index: i32) -> bool {
        match self.metatable_of(&self.value_at(index)) {
            Some(mt) => {
                self.push_value(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Pop a table (or `nil`) and install it as the metatable of the value at `index`
    pub fn set_metatable(&self, index: i32) -> VmResult<()> {
        let obj = self.value_at(index);
        let mt = match self.pop_value() {
            Value::Table(r) => Some(r),
            Value::Nil => None,
            other => return Err(table_expected(&other)),
        };
        let mut heap = self.heap_mut();
        match obj {
            Value::Table(r) => {
                if let Some(t) = heap.table_mut(r) {
                    t.set_metatable(mt);
                }
                Ok(())
            }
            Value::Userdata(r) => {
                if let Some(u) = heap.userdata_mut(r) {
                    u.metatable = mt;
                }
                Ok(())
            }
            other => Err(VmError::runtime(format!(
                "cannot set the metatable of a {} value",
                other.type_name()
            ))),
        }
    }

    /// Push a raw field of the metatable of the value at `index`; returns
    /// `false` (pushing nothing) if the field is absent
    pub fn get_metafield(&self, index: i32, name: &str) -> bool {
        let v = self.metafield_of(&self.value_at(index), name);
        if v.is_nil() {
            return false;
        }
        self.push_value(v);
        true
    }

    /// Push the user value of the userdata at `index`
    pub fn get_user_value(&self, index: i32) -> VmResult<ValueType> {
        let v = match self.value_at(index) {
            Value::Userdata(r) => self
                .heap()
                .userdata(r)
                .map(|u| u.user_value.clone())
                .unwrap_or_default(),
            other => {
                return Err(VmError::runtime(format!(
                    "userdata expected, got {}",
                    other.type_name()
                )))
            }
        };
        let ty = v.value_type();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value and store it as the user value of the userdata at `index`
    pub fn set_user_value(&self, index: i32) -> VmResult<()> {
        let obj = self.value_at(index);
        let v = self.pop_value();
        match obj {
            Value::Userdata(r) => {
                if let Some(u) = self.heap_mut().userdata_mut(r) {
                    u.user_value = v;
                }
                Ok(())
            }
            other => Err(VmError::runtime(format!(
                "userdata expected, got {}",
                other.type_name()
            ))),
        }
    }

    // ========================================================================
    // Globals and registry
    // ========================================================================

    /// Push the global `name`
    pub fn get_global(&self, name: &str) -> VmResult<ValueType> {
        let v = self.index_value(&self.globals(), &Value::string(name))?;
        let ty = v.value_type();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value and store it as the global `name`
    pub fn set_global(&self, name: &str) -> VmResult<()> {
        let v = self.pop_value();
        self.set_value_field(&self.globals(), Value::string(name), v)
    }

    /// Push the globals table
    pub fn push_globals(&self) {
        self.push_value(self.globals());
    }

    /// Push the registry table
    pub fn push_registry(&self) {
        self.push_value(self.registry());
    }

    /// Push the raw registry field `name`
    pub fn get_registry_field(&self, name: &str) -> ValueType {
        let v = self
            .raw_get_value(&self.registry(), &Value::string(name))
            .unwrap_or_default();
        let ty = v.value_type();
        self.push_value(v);
        ty
    }

    /// Pop a value and store it as the raw registry field `name`
    pub fn set_registry_field(&self, name: &str) -> VmResult<()> {
        let v = self.pop_value();
        self.raw_set_value(&self.registry(), Value::string(name), v)
    }

    /// Push the registry metatable `name`, creating it if needed
    ///
    /// Returns `true` when the table was created. New metatables get a
    /// `__name` field.
    pub fn new_metatable(&self, name: &str) -> VmResult<bool> {
        if self.get_registry_field(name) != ValueType::Nil {
            return Ok(false);
        }
        self.pop(1);
        self.create_table(0, 2)?;
        self.push_string(name);
        self.raw_set_field(-2, "__name")?;
        self.push_copy(-1);
        self.set_registry_field(name)?;
        Ok(true)
    }
}

//! Runtime state
//!
//! [`State`] is a cheap, clonable handle to one runtime instance. All
//! operations take `&self`; interior state lives in `RefCell`s that are never
//! borrowed across a call into native code, so native functions can freely
//! re-enter the state they were called from.
//!
//! The API is stack based: values are pushed, inspected by frame index and
//! consumed by table, call and conversion operations.
//!
//! Operations are split across submodules:
//! - this module: construction, stack manipulation, pushes, conversions,
//!   allocation, references and extension data
//! - [`access`]: tables, metatables, globals and the registry
//! - [`call`]: calls, protected calls, tracebacks, collection and shutdown

mod access;
mod call;

use crate::function::{NativeFn, NativeFunction};
use crate::gc::{GcObject, GcRef, GcStats, Heap};
use crate::options::VmOptions;
use crate::stack::Stack;
use crate::table::Table;
use crate::userdata::Userdata;
use crate::value::{ByteStr, Value, ValueType};
use crate::{VmResult, REF_NIL};
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

/// Collector bookkeeping
#[derive(Debug, Default)]
pub(crate) struct GcState {
    threshold: usize,
    stats: GcStats,
    pending: VecDeque<GcRef>,
}

/// Free list for registry references
#[derive(Debug)]
struct RefAllocator {
    free: Vec<i64>,
    next: i64,
}

pub(crate) struct StateInner {
    heap: RefCell<Heap>,
    stack: RefCell<Stack>,
    registry: GcRef,
    globals: GcRef,
    options: VmOptions,
    gc: RefCell<GcState>,
    collecting: Cell<bool>,
    finalizing: Cell<bool>,
    closed: Cell<bool>,
    handlers: RefCell<Vec<Option<Value>>>,
    refs: RefCell<RefAllocator>,
    app_data: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
}

/// Handle to a runtime instance
#[derive(Clone)]
pub struct State {
    inner: Rc<StateInner>,
}

/// Non-owning handle to a runtime instance
#[derive(Clone)]
pub struct WeakState {
    inner: Weak<StateInner>,
}

impl WeakState {
    /// Recover the state if it is still alive
    pub fn upgrade(&self) -> Option<State> {
        self.inner.upgrade().map(|inner| State { inner })
    }
}

impl fmt::Debug for WeakState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakState")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("top", &self.top())
            .field("live_objects", &self.heap().live_count())
            .finish()
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Create a runtime with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a runtime with specific options
    pub fn with_options(options: VmOptions) -> Self {
        let mut heap = Heap::new(options.max_objects);
        let registry = heap.insert(GcObject::Table(Table::new()));
        let globals = heap.insert(GcObject::Table(Table::new()));

        let gc = GcState {
            threshold: options.gc_threshold,
            ..GcState::default()
        };

        State {
            inner: Rc::new(StateInner {
                heap: RefCell::new(heap),
                stack: RefCell::new(Stack::new()),
                registry,
                globals,
                options,
                gc: RefCell::new(gc),
                collecting: Cell::new(false),
                finalizing: Cell::new(false),
                closed: Cell::new(false),
                handlers: RefCell::new(Vec::new()),
                refs: RefCell::new(RefAllocator {
                    free: Vec::new(),
                    next: 1,
                }),
                app_data: RefCell::new(FxHashMap::default()),
            }),
        }
    }

    /// Non-owning handle
    pub fn downgrade(&self) -> WeakState {
        WeakState {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same runtime
    pub fn ptr_eq(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Options the runtime was created with
    pub fn options(&self) -> &VmOptions {
        &self.inner.options
    }

    /// Whether [`close`](State::close) has run
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    pub(crate) fn heap(&self) -> Ref<'_, Heap> {
        self.inner.heap.borrow()
    }

    pub(crate) fn heap_mut(&self) -> RefMut<'_, Heap> {
        self.inner.heap.borrow_mut()
    }

    pub(crate) fn stack(&self) -> Ref<'_, Stack> {
        self.inner.stack.borrow()
    }

    pub(crate) fn stack_mut(&self) -> RefMut<'_, Stack> {
        self.inner.stack.borrow_mut()
    }

    /// Registry table value
    pub fn registry(&self) -> Value {
        Value::Table(self.inner.registry)
    }

    /// Globals table value
    pub fn globals(&self) -> Value {
        Value::Table(self.inner.globals)
    }

    // ========================================================================
    // Stack manipulation
    // ========================================================================

    /// Number of values in the current frame
    pub fn top(&self) -> i32 {
        self.stack().top() as i32
    }

    /// Set the current frame's top, filling with `nil` or discarding values
    pub fn set_top(&self, index: i32) {
        self.stack_mut().set_top(index);
    }

    /// Total number of occupied slots across every frame
    pub fn stack_depth(&self) -> usize {
        self.stack().len()
    }

    /// Convert a frame index to its positive form
    pub fn abs_index(&self, index: i32) -> i32 {
        self.stack().abs_index(index)
    }

    /// Whether `index` refers to an occupied slot
    pub fn is_valid(&self, index: i32) -> bool {
        self.stack().slot_of(index).is_some()
    }

    /// Value at a frame index (`nil` when out of range)
    pub fn value_at(&self, index: i32) -> Value {
        self.stack().get(index)
    }

    /// Push a value
    pub fn push_value(&self, value: Value) {
        self.stack_mut().push(value);
    }

    /// Push a copy of the value at `index`
    pub fn push_copy(&self, index: i32) {
        let v = self.value_at(index);
        self.push_value(v);
    }

    /// Pop `n` values
    pub fn pop(&self, n: usize) {
        self.stack_mut().pop_n(n);
    }

    /// Pop and return the top value (`nil` if the frame is empty)
    pub fn pop_value(&self) -> Value {
        self.stack_mut().pop().unwrap_or_default()
    }

    /// Move the top value into `index`
    pub fn insert(&self, index: i32) {
        self.stack_mut().insert(index);
    }

    /// Remove the value at `index`
    pub fn remove(&self, index: i32) {
        self.stack_mut().remove(index);
    }

    /// Pop the top value into `index`
    pub fn replace(&self, index: i32) {
        let index = self.abs_index(index);
        let v = self.pop_value();
        self.stack_mut().set(index, v);
    }

    // ========================================================================
    // Type queries
    // ========================================================================

    /// Type of the value at `index` (`ValueType::None` when out of range)
    pub fn type_of(&self, index: i32) -> ValueType {
        let stack = self.stack();
        match stack.slot_of(index) {
            Some(slot) => stack.slots()[slot].value_type(),
            None => ValueType::None,
        }
    }

    /// Type name of the value at `index`
    pub fn type_name(&self, index: i32) -> &'static str {
        self.type_of(index).name()
    }

    /// Whether the slot is out of range
    pub fn is_none(&self, index: i32) -> bool {
        self.type_of(index) == ValueType::None
    }

    /// Whether the slot holds `nil`
    pub fn is_nil(&self, index: i32) -> bool {
        self.type_of(index) == ValueType::Nil
    }

    /// Whether the slot is out of range or holds `nil`
    pub fn is_none_or_nil(&self, index: i32) -> bool {
        matches!(self.type_of(index), ValueType::None | ValueType::Nil)
    }

    /// Whether the slot holds a number or a numeric string
    pub fn is_number(&self, index: i32) -> bool {
        self.value_at(index).to_number().is_some()
    }

    /// Whether the slot holds a string or a number
    pub fn is_string(&self, index: i32) -> bool {
        matches!(self.type_of(index), ValueType::String | ValueType::Number)
    }

    /// Whether the slot holds a table
    pub fn is_table(&self, index: i32) -> bool {
        self.type_of(index) == ValueType::Table
    }

    /// Whether the slot holds a function
    pub fn is_function(&self, index: i32) -> bool {
        self.type_of(index) == ValueType::Function
    }

    /// Whether the slot holds full or light userdata
    pub fn is_userdata(&self, index: i32) -> bool {
        self.type_of(index) == ValueType::Userdata
    }

    // ========================================================================
    // Conversions
    // ========================================================================

    /// Truthiness of the value at `index`
    pub fn to_boolean(&self, index: i32) -> bool {
        self.value_at(index).is_truthy()
    }

    /// Number at `index`, coercing numeric strings
    pub fn to_number(&self, index: i32) -> Option<f64> {
        self.value_at(index).to_number()
    }

    /// Integer at `index`, coercing integral floats and numeric strings
    pub fn to_integer(&self, index: i32) -> Option<i64> {
        self.value_at(index).to_integer()
    }

    /// String at `index`, converting numbers
    pub fn to_bytes(&self, index: i32) -> Option<ByteStr> {
        self.value_at(index).to_bytes()
    }

    /// Payload of the full userdata at `index`
    pub fn to_userdata(&self, index: i32) -> Option<Rc<dyn Any>> {
        match self.value_at(index) {
            Value::Userdata(r) => self.heap().userdata(r).map(|u| u.payload.clone()),
            _ => None,
        }
    }

    /// Address of the light userdata at `index`
    pub fn to_light_userdata(&self, index: i32) -> Option<usize> {
        match self.value_at(index) {
            Value::LightUserdata(p) => Some(p),
            _ => None,
        }
    }

    /// Primitive equality of two slots
    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        if !self.is_valid(a) || !self.is_valid(b) {
            return false;
        }
        self.value_at(a).raw_eq(&self.value_at(b))
    }

    // ========================================================================
    // Pushes
    // ========================================================================

    /// Push `nil`
    pub fn push_nil(&self) {
        self.push_value(Value::Nil);
    }

    /// Push a boolean
    pub fn push_boolean(&self, b: bool) {
        self.push_value(Value::Boolean(b));
    }

    /// Push an integer
    pub fn push_integer(&self, i: i64) {
        self.push_value(Value::Integer(i));
    }

    /// Push a float
    pub fn push_number(&self, n: f64) {
        self.push_value(Value::Number(n));
    }

    /// Push a UTF-8 string
    pub fn push_string(&self, s: &str) {
        self.push_value(Value::string(s));
    }

    /// Push a byte string
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.push_value(Value::String(ByteStr::new(bytes)));
    }

    /// Push a light userdata token
    pub fn push_light_userdata(&self, p: usize) {
        self.push_value(Value::LightUserdata(p));
    }

    /// Pop `n_upvalues` values and push a native closure capturing them
    pub fn push_native(
        &self,
        func: NativeFn,
        name: Option<&str>,
        n_upvalues: usize,
    ) -> VmResult<()> {
        self.gc_checkpoint();
        let upvalues = self.stack_mut().pop_n(n_upvalues);
        let f = NativeFunction::new(func, name.map(Rc::from), upvalues);
        let r = self.alloc(GcObject::Function(f))?;
        self.push_value(Value::Function(r));
        Ok(())
    }

    /// Push a named native function without upvalues
    pub fn push_function<F>(&self, name: &str, func: F) -> VmResult<()>
    where
        F: Fn(&State) -> VmResult<usize> + 'static,
    {
        self.push_native(Rc::new(func), Some(name), 0)
    }

    /// Push upvalue `i` (1-based) of the running native closure
    pub fn push_upvalue(&self, i: usize) {
        let function = self
            .stack()
            .current_frame()
            .map(|f| f.function.clone())
            .unwrap_or_default();
        let v = match function {
            Value::Function(r) if i > 0 => self
                .heap()
                .function(r)
                .and_then(|f| f.upvalues.get(i - 1).cloned())
                .unwrap_or_default(),
            _ => Value::Nil,
        };
        self.push_value(v);
    }

    /// Debug name of the running native function
    pub fn current_function_name(&self) -> Option<Rc<str>> {
        self.stack().current_frame().and_then(|f| f.name.clone())
    }

    /// Push a new empty table
    pub fn new_table(&self) -> VmResult<()> {
        self.create_table(0, 0)
    }

    /// Push a new table with preallocated space
    pub fn create_table(&self, narr: usize, nrec: usize) -> VmResult<()> {
        self.gc_checkpoint();
        let r = self.alloc(GcObject::Table(Table::with_capacity(narr, nrec)))?;
        self.push_value(Value::Table(r));
        Ok(())
    }

    /// Push a new full userdata wrapping `payload`
    pub fn new_userdata(&self, payload: Rc<dyn Any>) -> VmResult<()> {
        self.gc_checkpoint();
        let r = self.alloc(GcObject::Userdata(Userdata::new(payload)))?;
        self.push_value(Value::Userdata(r));
        Ok(())
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Collect if the live object count crossed the threshold
    ///
    /// Callers run this before popping operands off the stack, so everything
    /// the pending operation uses is still rooted.
    pub(crate) fn gc_checkpoint(&self) {
        if self.inner.collecting.get() {
            return;
        }
        let due = self.heap().live_count() >= self.inner.gc.borrow().threshold;
        if due {
            self.full_gc();
        }
    }

    pub(crate) fn alloc(&self, object: GcObject) -> VmResult<GcRef> {
        self.heap_mut().allocate(object)
    }

    // ========================================================================
    // References
    // ========================================================================

    /// Pop the top value and anchor it in the registry under a fresh key
    ///
    /// Returns [`REF_NIL`] for `nil`.
    pub fn reference(&self) -> i64 {
        let v = self.pop_value();
        if v.is_nil() {
            return REF_NIL;
        }
        let key = {
            let mut refs = self.inner.refs.borrow_mut();
            match refs.free.pop() {
                Some(k) => k,
                None => {
                    refs.next += 1;
                    refs.next - 1
                }
            }
        };
        if let Some(t) = self.heap_mut().table_mut(self.inner.registry) {
            t.set_int(key, v);
        }
        key
    }

    /// Release a registry reference
    pub fn unreference(&self, key: i64) {
        if key <= 0 {
            return;
        }
        let released = {
            let mut heap = self.heap_mut();
            match heap.table_mut(self.inner.registry) {
                Some(t) if !t.get_int(key).is_nil() => {
                    let old = t.get_int(key);
                    t.set_int(key, Value::Nil);
                    Some(old)
                }
                _ => None,
            }
        };
        if released.is_some() {
            self.inner.refs.borrow_mut().free.push(key);
        }
    }

    /// Push the value anchored under `key` (`nil` for [`REF_NIL`] or a released key)
    pub fn push_reference(&self, key: i64) {
        let v = if key > 0 {
            self.heap()
                .table(self.inner.registry)
                .map(|t| t.get_int(key))
                .unwrap_or_default()
        } else {
            Value::Nil
        };
        self.push_value(v);
    }

    // ========================================================================
    // Extension data
    // ========================================================================

    /// Attach typed extension data, replacing any previous value of that type
    pub fn set_app_data<T: Any>(&self, data: Rc<T>) -> Option<Rc<T>> {
        let old = self
            .inner
            .app_data
            .borrow_mut()
            .insert(TypeId::of::<T>(), data);
        old.and_then(|o| o.downcast::<T>().ok())
    }

    /// Typed extension data
    pub fn app_data<T: Any>(&self) -> Option<Rc<T>> {
        let data = self.inner.app_data.borrow().get(&TypeId::of::<T>()).cloned();
        data.and_then(|d| d.downcast::<T>().ok())
    }

    /// Heap statistics
    pub fn gc_stats(&self) -> GcStats {
        let mut stats = self.inner.gc.borrow().stats.clone();
        stats.live_objects = self.heap().live_count();
        stats
    }
}

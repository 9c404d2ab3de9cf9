//! Native functions
//!
//! The runtime calls native code through one uniform convention: the
//! function receives the [`State`] with its arguments at frame indices
//! `1..=top()` and returns how many values it left on top of the stack as
//! results.

use crate::state::State;
use crate::value::Value;
use crate::VmResult;
use std::fmt;
use std::rc::Rc;

/// Native function signature
pub type NativeFn = Rc<dyn Fn(&State) -> VmResult<usize>>;

/// Heap-resident native closure
pub struct NativeFunction {
    pub(crate) func: NativeFn,
    pub(crate) upvalues: Vec<Value>,
    pub(crate) name: Option<Rc<str>>,
}

impl NativeFunction {
    /// Create a native closure
    pub fn new(func: NativeFn, name: Option<Rc<str>>, upvalues: Vec<Value>) -> Self {
        Self {
            func,
            upvalues,
            name,
        }
    }

    /// Debug name used in tracebacks
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Captured upvalues
    pub fn upvalues(&self) -> &[Value] {
        &self.upvalues
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

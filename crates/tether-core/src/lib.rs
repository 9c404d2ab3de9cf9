//! Tether Core Runtime
//!
//! This crate provides the embedded script runtime that the binding layer
//! talks to. It is a capability set, not a language: there is no parser or
//! bytecode. It offers:
//! - Dynamically typed values, byte strings and insertion-ordered tables
//! - Metatables with `__index`, `__newindex`, `__call`, `__gc` and `__mode`
//! - A shared evaluation stack with call frames and native closures
//! - A registry, integer references and per-state extension data
//! - Protected calls with message handlers and tracebacks
//! - A mark-sweep collector with weak tables and userdata finalizers

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod defaults;
pub mod function;
pub mod gc;
pub mod options;
pub mod stack;
pub mod state;
pub mod table;
pub mod userdata;
pub mod value;

pub use defaults::{NO_REF, REF_NIL};
pub use function::{NativeFn, NativeFunction};
pub use gc::{GcRef, GcStats};
pub use options::VmOptions;
pub use stack::{CallFrame, Stack};
pub use state::{State, WeakState};
pub use table::{Table, TableKey};
pub use userdata::Userdata;
pub use value::{ByteStr, Value, ValueType};

/// Outcome of a protected call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The call completed
    Ok,
    /// A runtime error was raised
    Runtime,
    /// Source failed to parse
    Syntax,
    /// An allocation exceeded the object limit
    Memory,
    /// The message handler itself failed
    ErrorHandler,
}

/// Runtime errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    /// Error raised with an arbitrary error value
    #[error("{}", describe_error_value(.value))]
    Runtime {
        /// Error value (usually a string)
        value: Value,
        /// Whether the active message handler already processed the value
        handled: bool,
    },

    /// Syntax error
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Object limit exceeded
    #[error("not enough memory")]
    Memory,

    /// Error while running the message handler
    #[error("error in error handling")]
    ErrorHandler,
}

impl VmError {
    /// Runtime error carrying a string message
    pub fn runtime(message: impl Into<String>) -> Self {
        VmError::Runtime {
            value: Value::string(message.into()),
            handled: false,
        }
    }

    /// Runtime error carrying an arbitrary value
    pub fn from_value(value: Value) -> Self {
        VmError::Runtime {
            value,
            handled: false,
        }
    }

    /// Protected-call status for this error
    pub fn status(&self) -> Status {
        match self {
            VmError::Runtime { .. } => Status::Runtime,
            VmError::Syntax(_) => Status::Syntax,
            VmError::Memory => Status::Memory,
            VmError::ErrorHandler => Status::ErrorHandler,
        }
    }

    /// Error value as seen by scripts
    pub fn into_value(self) -> Value {
        match self {
            VmError::Runtime { value, .. } => value,
            VmError::Syntax(msg) => Value::string(msg),
            other => Value::string(other.to_string()),
        }
    }
}

fn describe_error_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string_lossy(),
        Value::Integer(_) | Value::Number(_) => value.to_string(),
        other => format!("(error object is a {} value)", other.type_name()),
    }
}

/// Runtime result
pub type VmResult<T> = Result<T, VmError>;

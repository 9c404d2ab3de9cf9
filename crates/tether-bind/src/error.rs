//! Error types for the binding layer
//!
//! [`BindError`] is the one error type the bridge surfaces to native code.
//! Inside the runtime, errors travel as an [`ErrorObject`] userdata so a
//! protected call made from native code recovers the exact variant that was
//! raised, not just its message.

use std::borrow::Cow;
use std::rc::Rc;
use tether_core::{State, Status, Value, VmError};

/// Result type for binding operations
pub type BindResult<T> = Result<T, BindError>;

/// A value could not be converted to the requested native type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{expected} expected, got {got}")]
pub struct PullError {
    /// Expected type name
    pub expected: Cow<'static, str>,
    /// Actual type name
    pub got: Cow<'static, str>,
}

impl PullError {
    /// Create a conversion error
    pub fn new(expected: impl Into<Cow<'static, str>>, got: impl Into<Cow<'static, str>>) -> Self {
        Self {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Conversion error for the value at `index`, naming its runtime type
    pub fn at(state: &State, index: i32, expected: impl Into<Cow<'static, str>>) -> Self {
        Self::new(expected, state.type_name(index))
    }
}

/// Binding layer errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BindError {
    /// Script failed to parse
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Script-level execution fault, including translated native failures
    #[error("{message}")]
    Runtime {
        /// Error description
        message: String,
        /// Call trace captured where the error was raised
        traceback: Option<String>,
    },

    /// Allocation failure within the runtime
    #[error("not enough memory")]
    Memory,

    /// Failure while already handling another error
    #[error("error in error handling")]
    ErrorInHandler,

    /// Argument mismatch at call time (position 0 is the receiver)
    #[error("bad argument #{position} to '{function}' ({expected} expected, got {got})")]
    ArgumentType {
        /// Registered name of the called function
        function: String,
        /// 1-based argument position
        position: usize,
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Name collision during registration
    #[error("'{name}' is already defined in {scope}")]
    DuplicateBinding {
        /// Scope the name collides in
        scope: String,
        /// Colliding name
        name: String,
    },

    /// Dispatch on a released or collected handle
    #[error("attempt to use a released '{class}' object (accessing '{member}')")]
    StaleHandle {
        /// Class of the handle
        class: String,
        /// Member that was accessed
        member: String,
    },

    /// Object of a class that was never registered
    #[error("class '{0}' is not registered")]
    UnregisteredClass(String),

    /// Inconsistent binding declaration
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Conversion failure outside of an argument position
    #[error("conversion failed: {0}")]
    Conversion(#[from] PullError),

    /// Error returned by native code; becomes a runtime error at the crossing point
    #[error("{message}")]
    Native {
        /// Error description
        message: String,
    },
}

impl BindError {
    /// Runtime error without a traceback
    pub fn runtime(message: impl Into<String>) -> Self {
        BindError::Runtime {
            message: message.into(),
            traceback: None,
        }
    }

    /// Native error from any displayable value
    pub fn native(err: impl std::fmt::Display) -> Self {
        BindError::Native {
            message: err.to_string(),
        }
    }

    /// Taxonomy name of this error
    pub fn name(&self) -> &'static str {
        match self {
            BindError::Syntax(_) => "SyntaxError",
            BindError::Runtime { .. } | BindError::Native { .. } => "RuntimeError",
            BindError::Memory => "MemoryError",
            BindError::ErrorInHandler => "ErrorInHandler",
            BindError::ArgumentType { .. } | BindError::Conversion(_) => "ArgumentTypeError",
            BindError::DuplicateBinding { .. } => "DuplicateBindingError",
            BindError::StaleHandle { .. } => "StaleHandleError",
            BindError::UnregisteredClass(_) | BindError::InvalidBinding(_) => "BindingError",
            BindError::Config(_) => "ConfigError",
        }
    }

    /// Traceback attached to a runtime error
    pub fn traceback(&self) -> Option<&str> {
        match self {
            BindError::Runtime { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }

    /// Message followed by the traceback, if any
    pub fn full_message(&self) -> String {
        match self.traceback() {
            Some(tb) => format!("{}\n{}", self, tb),
            None => self.to_string(),
        }
    }

    /// Recover a typed error from a runtime error value
    pub fn from_value(state: &State, value: &Value) -> BindError {
        if let Value::Userdata(_) = value {
            state.push_value(value.clone());
            let payload = state.to_userdata(-1);
            state.pop(1);
            if let Some(obj) = payload.as_ref().and_then(|p| p.downcast_ref::<ErrorObject>()) {
                return obj.0.clone();
            }
        }
        match value {
            Value::String(s) => BindError::runtime(s.to_string_lossy()),
            Value::Integer(_) | Value::Number(_) => BindError::runtime(value.to_string()),
            other => BindError::runtime(format!("(error object is a {} value)", other.type_name())),
        }
    }

    /// Translate a runtime error
    pub fn from_vm(state: &State, err: VmError) -> BindError {
        match err {
            VmError::Runtime { value, .. } => BindError::from_value(state, &value),
            VmError::Syntax(msg) => BindError::Syntax(msg),
            VmError::Memory => BindError::Memory,
            VmError::ErrorHandler => BindError::ErrorInHandler,
        }
    }

    /// Pop the error value left by a failed protected call
    pub fn from_status(state: &State, status: Status) -> BindError {
        let value = state.pop_value();
        match status {
            Status::Memory => BindError::Memory,
            Status::ErrorHandler => BindError::ErrorInHandler,
            Status::Syntax => BindError::Syntax(value.to_string()),
            Status::Runtime | Status::Ok => BindError::from_value(state, &value),
        }
    }
}

impl From<String> for BindError {
    fn from(message: String) -> Self {
        BindError::Native { message }
    }
}

impl From<&str> for BindError {
    fn from(message: &str) -> Self {
        BindError::Native {
            message: message.to_string(),
        }
    }
}

/// Conversion of runtime results into binding results
pub(crate) trait VmResultExt<T> {
    fn into_bind(self, state: &State) -> BindResult<T>;
}

impl<T> VmResultExt<T> for tether_core::VmResult<T> {
    fn into_bind(self, state: &State) -> BindResult<T> {
        self.map_err(|e| BindError::from_vm(state, e))
    }
}

/// Userdata payload carrying a [`BindError`] through the runtime
#[derive(Debug)]
pub struct ErrorObject(pub BindError);

/// Raise `err` inside the runtime
///
/// Memory and handler failures map to their runtime statuses; everything else
/// travels as an [`ErrorObject`]. If even the error object cannot be
/// allocated, the message is raised as a plain string.
pub(crate) fn raise(state: &State, err: BindError) -> VmError {
    match err {
        BindError::Memory => VmError::Memory,
        BindError::ErrorInHandler => VmError::ErrorHandler,
        other => {
            let message = other.to_string();
            match state.new_userdata(Rc::new(ErrorObject(other))) {
                Ok(()) => state.error(),
                Err(_) => VmError::runtime(message),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_error_message() {
        let err = BindError::ArgumentType {
            function: "add".into(),
            position: 1,
            expected: "number".into(),
            got: "string".into(),
        };
        assert_eq!(
            err.to_string(),
            "bad argument #1 to 'add' (number expected, got string)"
        );
        assert_eq!(err.name(), "ArgumentTypeError");
    }

    #[test]
    fn test_error_names() {
        assert_eq!(BindError::runtime("x").name(), "RuntimeError");
        assert_eq!(BindError::Memory.name(), "MemoryError");
        assert_eq!(BindError::ErrorInHandler.name(), "ErrorInHandler");
        assert_eq!(BindError::Syntax("x".into()).name(), "SyntaxError");
        assert_eq!(
            BindError::StaleHandle {
                class: "A".into(),
                member: "f".into()
            }
            .name(),
            "StaleHandleError"
        );
    }

    #[test]
    fn test_error_object_round_trip() {
        let state = State::new();
        let vm = raise(
            &state,
            BindError::DuplicateBinding {
                scope: "global scope".into(),
                name: "foo".into(),
            },
        );
        let back = BindError::from_vm(&state, vm);
        assert!(matches!(back, BindError::DuplicateBinding { ref name, .. } if name == "foo"));
    }

    #[test]
    fn test_string_errors_become_runtime() {
        let state = State::new();
        let err = BindError::from_vm(&state, VmError::runtime("plain"));
        assert!(matches!(err, BindError::Runtime { ref message, .. } if message == "plain"));
        assert!(matches!(
            BindError::from_vm(&state, VmError::Memory),
            BindError::Memory
        ));
    }

    #[test]
    fn test_full_message_includes_traceback() {
        let err = BindError::Runtime {
            message: "boom".into(),
            traceback: Some("stack traceback:".into()),
        };
        assert_eq!(err.full_message(), "boom\nstack traceback:");
    }
}

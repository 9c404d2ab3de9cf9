//! Integers, floats and booleans
//!
//! Pulling a number accepts numeric strings and treats `nil` (or a missing
//! argument) as zero. Floats pulled into integer types are truncated toward
//! zero; values outside the target range fail instead of wrapping. Unsigned
//! values above `i64::MAX` have no exact runtime representation and fail to
//! push.

use super::{Pull, Push};
use crate::error::{BindResult, PullError};
use tether_core::{State, Value};

/// Numeric view of the value at `index`: `Ok(None)` for nil or no value
fn numeric(state: &State, index: i32) -> Result<Option<Value>, PullError> {
    match state.value_at(index) {
        Value::Nil => Ok(None),
        v @ (Value::Integer(_) | Value::Number(_)) => Ok(Some(v)),
        Value::String(s) => tether_core::value::parse_number(s.as_bytes())
            .map(Some)
            .ok_or_else(|| PullError::new("number", "string")),
        other => Err(PullError::new("number", other.type_name())),
    }
}

macro_rules! impl_integer {
    ($($t:ty),*) => {$(
        impl Push for $t {
            fn push_value(self, state: &State) -> BindResult<usize> {
                let i = i64::try_from(self).map_err(|_| {
                    PullError::new("integer within the 64-bit signed range", format!("{}", self))
                })?;
                state.push_integer(i);
                Ok(1)
            }
        }

        impl Pull for $t {
            fn pull(state: &State, index: i32) -> Result<Self, PullError> {
                let out_of_range = || PullError::new(stringify!($t), "out-of-range number");
                match numeric(state, index)? {
                    None => Ok(0),
                    Some(Value::Integer(i)) => <$t>::try_from(i).map_err(|_| out_of_range()),
                    Some(Value::Number(n)) => {
                        let n = n.trunc();
                        // MAX as f64 rounds up to 2^N for the 64-bit types
                        if n.is_finite() && n >= <$t>::MIN as f64 && n < <$t>::MAX as f64 + 1.0 {
                            Ok(n as $t)
                        } else {
                            Err(out_of_range())
                        }
                    }
                    Some(_) => Err(PullError::at(state, index, "number")),
                }
            }
        }
    )*};
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_float {
    ($($t:ty),*) => {$(
        impl Push for $t {
            fn push_value(self, state: &State) -> BindResult<usize> {
                state.push_number(self as f64);
                Ok(1)
            }
        }

        impl Pull for $t {
            fn pull(state: &State, index: i32) -> Result<Self, PullError> {
                Ok(numeric(state, index)?
                    .and_then(|v| v.as_number())
                    .unwrap_or(0.0) as $t)
            }
        }
    )*};
}

impl_float!(f32, f64);

impl Push for bool {
    fn push_value(self, state: &State) -> BindResult<usize> {
        state.push_boolean(self);
        Ok(1)
    }
}

impl Pull for bool {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        Ok(state.to_boolean(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Push + Pull>(v: T) -> T {
        let state = State::new();
        v.push_value(&state).unwrap();
        T::pull(&state, -1).unwrap()
    }

    #[test]
    fn test_integer_round_trip() {
        assert_eq!(round_trip(-5i8), -5);
        assert_eq!(round_trip(i64::MAX), i64::MAX);
        assert_eq!(round_trip(u32::MAX), u32::MAX);
    }

    #[test]
    fn test_large_u64_rejected() {
        let state = State::new();
        let err = (i64::MAX as u64 + 2).push_value(&state).unwrap_err();
        assert_eq!(
            err.to_string(),
            "conversion failed: integer within the 64-bit signed range expected, got 9223372036854775809"
        );
        assert_eq!(state.top(), 0);
        assert_eq!(round_trip(i64::MAX as u64), i64::MAX as u64);
    }

    #[test]
    fn test_float_at_type_max_rejected() {
        let state = State::new();
        state.push_number(9_223_372_036_854_775_808.0);
        assert!(i64::pull(&state, 1).is_err());
        assert_eq!(u64::pull(&state, 1).unwrap(), 1 << 63);
        state.push_number(18_446_744_073_709_551_616.0);
        assert!(u64::pull(&state, 2).is_err());
        state.push_number(255.0);
        assert_eq!(u8::pull(&state, 3).unwrap(), 255);
        state.push_number(256.0);
        assert!(u8::pull(&state, 4).is_err());
    }

    #[test]
    fn test_nil_pulls_as_zero() {
        let state = State::new();
        state.push_nil();
        assert_eq!(i32::pull(&state, 1).unwrap(), 0);
        assert_eq!(f64::pull(&state, 1).unwrap(), 0.0);
        assert_eq!(u8::pull(&state, 5).unwrap(), 0);
    }

    #[test]
    fn test_numeric_string_accepted() {
        let state = State::new();
        state.push_string(" 42 ");
        assert_eq!(i32::pull(&state, 1).unwrap(), 42);
        state.push_string("2.5");
        assert_eq!(f32::pull(&state, 2).unwrap(), 2.5);
    }

    #[test]
    fn test_non_numeric_rejected() {
        let state = State::new();
        state.push_string("x");
        let err = i32::pull(&state, 1).unwrap_err();
        assert_eq!(err.expected, "number");
        assert_eq!(err.got, "string");

        state.push_boolean(true);
        assert_eq!(f64::pull(&state, 2).unwrap_err().got, "boolean");
    }

    #[test]
    fn test_out_of_range_rejected() {
        let state = State::new();
        state.push_integer(300);
        assert!(u8::pull(&state, 1).is_err());
        state.push_integer(-1);
        assert!(u32::pull(&state, 2).is_err());
    }

    #[test]
    fn test_float_truncated_to_integer() {
        let state = State::new();
        state.push_number(3.9);
        assert_eq!(i32::pull(&state, 1).unwrap(), 3);
        state.push_number(-3.9);
        assert_eq!(i32::pull(&state, 2).unwrap(), -3);
    }

    #[test]
    fn test_bool_truthiness() {
        let state = State::new();
        state.push_integer(0);
        state.push_nil();
        assert!(bool::pull(&state, 1).unwrap());
        assert!(!bool::pull(&state, 2).unwrap());
        assert!(round_trip(true));
    }
}

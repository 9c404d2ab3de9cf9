//! Strings
//!
//! Strings are byte-exact in both directions. Numbers pull as their string
//! form and `nil` pulls as the empty string. [`ByteStr`] carries embedded
//! zero bytes and invalid UTF-8 unchanged.

use super::{Pull, Push};
use crate::error::{BindResult, PullError};
use std::borrow::Cow;
use tether_core::{ByteStr, State, Value};

fn bytes_at(state: &State, index: i32) -> Result<ByteStr, PullError> {
    match state.value_at(index) {
        Value::Nil => Ok(ByteStr::from("")),
        v => v.to_bytes().ok_or_else(|| PullError::new("string", v.type_name())),
    }
}

impl Push for &str {
    fn push_value(self, state: &State) -> BindResult<usize> {
        state.push_string(self);
        Ok(1)
    }
}

impl Push for String {
    fn push_value(self, state: &State) -> BindResult<usize> {
        state.push_string(&self);
        Ok(1)
    }
}

impl Push for &String {
    fn push_value(self, state: &State) -> BindResult<usize> {
        state.push_string(self);
        Ok(1)
    }
}

impl Push for Cow<'_, str> {
    fn push_value(self, state: &State) -> BindResult<usize> {
        state.push_string(&self);
        Ok(1)
    }
}

impl Push for char {
    fn push_value(self, state: &State) -> BindResult<usize> {
        let mut buf = [0u8; 4];
        state.push_string(self.encode_utf8(&mut buf));
        Ok(1)
    }
}

impl Push for ByteStr {
    fn push_value(self, state: &State) -> BindResult<usize> {
        state.push_value(Value::String(self));
        Ok(1)
    }
}

impl Pull for String {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let bytes = bytes_at(state, index)?;
        String::from_utf8(bytes.as_bytes().to_vec())
            .map_err(|_| PullError::new("utf-8 string", "binary string"))
    }
}

impl Pull for ByteStr {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        bytes_at(state, index)
    }
}

impl Pull for char {
    fn pull(state: &State, index: i32) -> Result<Self, PullError> {
        let s = String::pull(state, index)?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(PullError::new("single character", "string")),
        }
    }
}

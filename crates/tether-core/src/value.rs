//! Runtime value representation
//!
//! Every value the runtime manipulates is a [`Value`]. Scalars and strings are
//! stored inline; tables, functions and userdata live on the collected heap and
//! are referred to through a generational [`GcRef`].

use crate::gc::GcRef;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

// ============================================================================
// Byte strings
// ============================================================================

/// Immutable, length-carrying byte string.
///
/// Strings may contain embedded NUL bytes and need not be valid UTF-8.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteStr(Rc<[u8]>);

impl ByteStr {
    /// Create a byte string from raw bytes
    pub fn new(bytes: &[u8]) -> Self {
        ByteStr(Rc::from(bytes))
    }

    /// Raw bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the string is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow as `&str` if the bytes are valid UTF-8
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Lossy UTF-8 conversion
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl Hash for ByteStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl From<&str> for ByteStr {
    fn from(s: &str) -> Self {
        ByteStr::new(s.as_bytes())
    }
}

impl From<String> for ByteStr {
    fn from(s: String) -> Self {
        ByteStr(Rc::from(s.into_bytes().into_boxed_slice()))
    }
}

impl From<&[u8]> for ByteStr {
    fn from(b: &[u8]) -> Self {
        ByteStr::new(b)
    }
}

impl From<Vec<u8>> for ByteStr {
    fn from(b: Vec<u8>) -> Self {
        ByteStr(Rc::from(b.into_boxed_slice()))
    }
}

impl fmt::Debug for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

// ============================================================================
// Value types
// ============================================================================

/// Script-visible type of a value or stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Stack slot outside the valid range
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Integer or floating point number
    Number,
    /// Byte string
    String,
    /// Table
    Table,
    /// Native function
    Function,
    /// Full or light userdata
    Userdata,
}

impl ValueType {
    /// Script-visible type name
    pub fn name(self) -> &'static str {
        match self {
            ValueType::None => "no value",
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Table => "table",
            ValueType::Function => "function",
            ValueType::Userdata => "userdata",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Value
// ============================================================================

/// A runtime value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// 64-bit integer
    Integer(i64),
    /// 64-bit float
    Number(f64),
    /// Byte string
    String(ByteStr),
    /// Heap table
    Table(GcRef),
    /// Heap native function
    Function(GcRef),
    /// Heap userdata
    Userdata(GcRef),
    /// Uncollected pointer-sized token
    LightUserdata(usize),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl Into<ByteStr>) -> Self {
        Value::String(s.into())
    }

    /// Script-visible type
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) | Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Table(_) => ValueType::Table,
            Value::Function(_) => ValueType::Function,
            Value::Userdata(_) | Value::LightUserdata(_) => ValueType::Userdata,
        }
    }

    /// Script-visible type name
    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    /// Check if nil
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Truthiness: everything except `nil` and `false` is true
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Heap reference, if this value is collectable
    pub fn as_gc(&self) -> Option<GcRef> {
        match self {
            Value::Table(r) | Value::Function(r) | Value::Userdata(r) => Some(*r),
            _ => None,
        }
    }

    /// Numeric value without string coercion
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value, coercing numeric strings
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::String(s) => parse_number(s.as_bytes()).and_then(|v| v.as_number()),
            other => other.as_number(),
        }
    }

    /// Integer value, coercing integral floats and numeric strings
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_integer(*n),
            Value::String(s) => parse_number(s.as_bytes()).and_then(|v| v.to_integer()),
            _ => None,
        }
    }

    /// String form of strings and numbers
    pub fn to_bytes(&self) -> Option<ByteStr> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(ByteStr::from(i.to_string())),
            Value::Number(n) => Some(ByteStr::from(format_number(*n))),
            _ => None,
        }
    }

    /// Primitive equality: numbers by value, strings by content, heap values by identity
    pub fn raw_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(a), Value::Number(b)) | (Value::Number(b), Value::Integer(a)) => {
                (*a as f64) == *b && float_to_integer(*b) == Some(*a)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b))
            | (Value::Function(a), Value::Function(b))
            | (Value::Userdata(a), Value::Userdata(b)) => a == b,
            (Value::LightUserdata(a), Value::LightUserdata(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_eq(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Table(r) => write!(f, "table: {}", r),
            Value::Function(r) => write!(f, "function: {}", r),
            Value::Userdata(r) => write!(f, "userdata: {}", r),
            Value::LightUserdata(p) => write!(f, "userdata: {:#x}", p),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<ByteStr> for Value {
    fn from(s: ByteStr) -> Self {
        Value::String(s)
    }
}

// ============================================================================
// Number helpers
// ============================================================================

/// Convert a float to an integer when it has an exact integer representation
pub fn float_to_integer(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= -9.223_372_036_854_776e18 && n < 9.223_372_036_854_776e18 {
        Some(n as i64)
    } else {
        None
    }
}

/// Format a float the way scripts print numbers
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

/// Parse a numeric string (decimal, float or `0x` hex integer)
pub fn parse_number(bytes: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let v = u64::from_str_radix(hex, 16).ok()? as i64;
        return Some(Value::Integer(if negative { v.wrapping_neg() } else { v }));
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    let lowered = digits.to_ascii_lowercase();
    if lowered.starts_with("inf") || lowered.starts_with("nan") {
        return None;
    }
    text.parse::<f64>().ok().map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_names() {
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::Integer(1).type_name(), "number");
        assert_eq!(Value::Number(1.5).type_name(), "number");
        assert_eq!(Value::from("x").type_name(), "string");
        assert_eq!(Value::LightUserdata(8).type_name(), "userdata");
        assert_eq!(ValueType::None.name(), "no value");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Boolean(true).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::from("").is_truthy());
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::from("42").to_integer(), Some(42));
        assert_eq!(Value::from(" 2.5 ").to_number(), Some(2.5));
        assert_eq!(Value::from("0x10").to_integer(), Some(16));
        assert_eq!(Value::from("x").to_number(), None);
        assert_eq!(Value::Number(3.0).to_integer(), Some(3));
        assert_eq!(Value::Number(3.5).to_integer(), None);
        assert_eq!(Value::from("inf").to_number(), None);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(Value::Integer(12).to_string(), "12");
        assert_eq!(Value::Number(2.0).to_string(), "2.0");
        assert_eq!(Value::Number(0.5).to_string(), "0.5");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "inf");
    }

    #[test]
    fn test_raw_equality_across_number_kinds() {
        assert_eq!(Value::Integer(2), Value::Number(2.0));
        assert_ne!(Value::Integer(2), Value::Number(2.5));
        assert_ne!(Value::Integer(1), Value::from("1"));
        assert_eq!(Value::from("a"), Value::from("a"));
    }

    #[test]
    fn test_byte_str_embedded_nul() {
        let s = ByteStr::new(b"a\0b");
        assert_eq!(s.len(), 3);
        assert_eq!(s.as_bytes()[1], 0);
        assert_eq!(s.to_str(), Some("a\0b"));
    }
}

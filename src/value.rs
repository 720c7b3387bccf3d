//! Scalar values carried by tree nodes

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::error::{NetconfError, Result};

/// Value of a node.
///
/// Values parsed off the wire are always `String`; the typed variants are for
/// trees built by the application. Two values are equal when their wire forms
/// are equal, so `Integer(1)` equals `String("1")`.
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    /// YANG `binary`, rendered as base64
    Binary(Vec<u8>),
}

impl Value {
    /// Decode a base64 text into a binary value
    pub fn binary_from_base64(text: &str) -> Result<Self> {
        BASE64
            .decode(text.trim())
            .map(Value::Binary)
            .map_err(|e| NetconfError::Parser(format!("bad base64 value: {}", e)))
    }

    /// Wire representation of the value
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Borrow the string if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Decoded bytes of a binary value, or of a base64 string
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Binary(b) => Some(b.clone()),
            Value::String(s) => BASE64.decode(s.trim()).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Binary(b) => f.write_str(&BASE64.encode(b)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            _ => self.to_wire() == other.to_wire(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Decimal(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Binary(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_equality() {
        assert_eq!(Value::Integer(42), Value::from("42"));
        assert_eq!(Value::Boolean(true), Value::from("true"));
        assert_ne!(Value::from("a"), Value::from("b"));
    }

    #[test]
    fn test_binary_base64() {
        let v = Value::Binary(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(v.to_string(), "3q2+7w==");

        let decoded = Value::binary_from_base64("3q2+7w==").unwrap();
        assert_eq!(decoded, v);
        assert_eq!(Value::from("3q2+7w==").as_bytes(), Some(vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_bad_base64() {
        assert!(Value::binary_from_base64("***").is_err());
    }
}

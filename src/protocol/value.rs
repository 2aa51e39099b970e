//! Typed values
//!
//! A stored value carries an explicit type discriminant across the wire and
//! inside the store. Reconstruction to a native type happens at decode time;
//! the raw encodings are:
//! - String: UTF-8 bytes, whole payload
//! - Int:    4 bytes, signed, big-endian, two's complement
//! - Bool:   1 byte, 0x00 = false, 0x01 = true

use crate::error::{Result, TideError};

/// Wire tags for value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Str = 0x01,
    Int = 0x02,
    Bool = 0x03,
}

impl ValueType {
    /// Parse a wire tag
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(ValueType::Str),
            0x02 => Ok(ValueType::Int),
            0x03 => Ok(ValueType::Bool),
            other => Err(TideError::MalformedPacket(format!(
                "unknown value type: 0x{:02x}",
                other
            ))),
        }
    }
}

/// A typed value stored under a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Int(i32),
    Bool(bool),
}

impl Value {
    /// Get the wire tag for this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::Str,
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
        }
    }

    /// Encode the raw value bytes (without the type tag)
    pub fn encode_bytes(&self) -> Vec<u8> {
        match self {
            Value::Str(s) => s.as_bytes().to_vec(),
            Value::Int(i) => i.to_be_bytes().to_vec(),
            Value::Bool(b) => vec![u8::from(*b)],
        }
    }

    /// Decode raw value bytes for the given type tag
    pub fn decode_bytes(value_type: ValueType, bytes: &[u8]) -> Result<Self> {
        match value_type {
            ValueType::Str => {
                let s = std::str::from_utf8(bytes).map_err(|_| {
                    TideError::MalformedPacket("string value is not valid UTF-8".to_string())
                })?;
                Ok(Value::Str(s.to_string()))
            }
            ValueType::Int => {
                let raw: [u8; 4] = bytes.try_into().map_err(|_| {
                    TideError::MalformedPacket(format!(
                        "int value must be 4 bytes, got {}",
                        bytes.len()
                    ))
                })?;
                Ok(Value::Int(i32::from_be_bytes(raw)))
            }
            ValueType::Bool => match bytes {
                [0x00] => Ok(Value::Bool(false)),
                [0x01] => Ok(Value::Bool(true)),
                _ => Err(TideError::MalformedPacket(
                    "bool value must be a single 0x00/0x01 byte".to_string(),
                )),
            },
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};

/// Width of every column inside a record (and of every key inside a node)
pub const FIELD_SIZE: usize = 40;

/// Represents a column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,      // 4 bytes
    Float,    // 8 bytes
    Char(u8), // n bytes (fixed length, at most FIELD_SIZE)
}

impl ColumnType {
    /// Number of meaningful bytes inside the 40-byte field
    pub fn size(&self) -> usize {
        match self {
            ColumnType::Int => 4,
            ColumnType::Float => 8,
            ColumnType::Char(n) => *n as usize,
        }
    }

    /// On-disk type tag
    pub fn tag(&self) -> u8 {
        match self {
            ColumnType::Int => 1,
            ColumnType::Float => 2,
            ColumnType::Char(_) => 3,
        }
    }

    /// Rebuild a type from its tag and stored size
    pub fn from_tag(tag: u8, size: u8) -> RecordResult<Self> {
        match tag {
            1 => Ok(ColumnType::Int),
            2 => Ok(ColumnType::Float),
            3 if size > 0 && size as usize <= FIELD_SIZE => Ok(ColumnType::Char(size)),
            _ => Err(RecordError::Deserialization(format!(
                "Unknown column type tag {} (size {})",
                tag, size
            ))),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int => write!(f, "INT"),
            ColumnType::Float => write!(f, "FLOAT"),
            ColumnType::Char(n) => write!(f, "CHAR({})", n),
        }
    }
}

/// Represents a single column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f64),
    String(String),
}

impl Value {
    /// Parse a textual value for a column of the given type
    pub fn parse(text: &str, column_type: ColumnType) -> RecordResult<Self> {
        let mismatch = || RecordError::TypeMismatch {
            expected: column_type.to_string(),
            actual: text.to_string(),
        };
        match column_type {
            ColumnType::Int => text.trim().parse().map(Value::Int).map_err(|_| mismatch()),
            ColumnType::Float => text
                .trim()
                .parse()
                .map(Value::Float)
                .map_err(|_| mismatch()),
            ColumnType::Char(_) => Ok(Value::String(text.to_string())),
        }
    }

    /// Serialize value into a zero-padded field
    pub fn encode_field(&self, column_type: ColumnType) -> RecordResult<[u8; FIELD_SIZE]> {
        let mut field = [0u8; FIELD_SIZE];
        match (self, column_type) {
            (Value::Int(i), ColumnType::Int) => field[..4].copy_from_slice(&i.to_le_bytes()),
            (Value::Float(f), ColumnType::Float) => field[..8].copy_from_slice(&f.to_le_bytes()),
            (Value::String(s), ColumnType::Char(max_len)) => {
                let bytes = s.as_bytes();
                if bytes.len() > max_len as usize {
                    return Err(RecordError::Serialization(format!(
                        "String length {} exceeds max length {}",
                        bytes.len(),
                        max_len
                    )));
                }
                field[..bytes.len()].copy_from_slice(bytes);
            }
            _ => {
                return Err(RecordError::TypeMismatch {
                    expected: column_type.to_string(),
                    actual: format!("{:?}", self),
                });
            }
        }
        Ok(field)
    }

    /// Deserialize value from a field
    pub fn decode_field(field: &[u8], column_type: ColumnType) -> RecordResult<Self> {
        if field.len() < column_type.size() {
            return Err(RecordError::Deserialization(format!(
                "Expected {} bytes for {}, got {}",
                column_type.size(),
                column_type,
                field.len()
            )));
        }

        match column_type {
            ColumnType::Int => Ok(Value::Int(i32::from_le_bytes([
                field[0], field[1], field[2], field[3],
            ]))),
            ColumnType::Float => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&field[..8]);
                Ok(Value::Float(f64::from_le_bytes(buf)))
            }
            ColumnType::Char(max_len) => {
                let bytes = &field[..max_len as usize];
                // Find the first null byte (string terminator)
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let s = String::from_utf8(bytes[..end].to_vec())
                    .map_err(|e| RecordError::Deserialization(format!("Invalid UTF-8: {}", e)))?;
                Ok(Value::String(s))
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

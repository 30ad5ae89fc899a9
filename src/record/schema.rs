use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};
use super::value::{ColumnType, FIELD_SIZE, Value};
use crate::file::{Addr, RESERVED_SIZE};

/// Maximum number of columns in a table
pub const MAX_COLUMNS: usize = 10;

/// Maximum byte length of a column name
pub const NAME_SIZE: usize = 20;

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    /// Create a new column definition
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Table schema, stored in the reserved area of the index file header
///
/// `head` is the root node and `tail` the leftmost leaf. The leftmost leaf
/// never changes address: splits keep the lower half in place and merges
/// always absorb into the left node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    /// Key column
    pub index: usize,
    pub columns: Vec<Column>,
    pub head: Addr,
    pub tail: Addr,
    /// Maximum entries per tree node
    pub node_capacity: usize,
}

// Reserved area layout
const COUNT_OFFSET: usize = 1;
const NAMES_OFFSET: usize = 2;
const KEY_SIZE_OFFSET: usize = NAMES_OFFSET + MAX_COLUMNS * NAME_SIZE;
const VAL_SIZE_OFFSET: usize = KEY_SIZE_OFFSET + MAX_COLUMNS;
const TYPE_OFFSET: usize = VAL_SIZE_OFFSET + MAX_COLUMNS;
const HEAD_OFFSET: usize = TYPE_OFFSET + MAX_COLUMNS;
const TAIL_OFFSET: usize = HEAD_OFFSET + Addr::SIZE;
const CAPACITY_OFFSET: usize = TAIL_OFFSET + Addr::SIZE;

impl Attr {
    /// Encoded size inside the reserved area
    pub const SIZE: usize = CAPACITY_OFFSET + 2;

    /// Build a schema keyed on `columns[index]`; tree fields are filled in by the index
    pub fn new(columns: Vec<Column>, index: usize) -> RecordResult<Self> {
        let attr = Self {
            index,
            columns,
            head: Addr::NULL,
            tail: Addr::NULL,
            node_capacity: 0,
        };
        attr.validate()?;
        Ok(attr)
    }

    /// Check column count, key column, names and type widths
    pub fn validate(&self) -> RecordResult<()> {
        if self.columns.is_empty() || self.columns.len() > MAX_COLUMNS {
            return Err(RecordError::InvalidSchema(format!(
                "Expected 1..={} columns, got {}",
                MAX_COLUMNS,
                self.columns.len()
            )));
        }
        if self.index >= self.columns.len() {
            return Err(RecordError::InvalidSchema(format!(
                "Key column {} out of range",
                self.index
            )));
        }
        for column in &self.columns {
            if column.name.is_empty() || column.name.len() > NAME_SIZE {
                return Err(RecordError::InvalidSchema(format!(
                    "Column name '{}' must be 1..={} bytes",
                    column.name, NAME_SIZE
                )));
            }
            if let ColumnType::Char(n) = column.column_type
                && (n == 0 || n as usize > FIELD_SIZE)
            {
                return Err(RecordError::InvalidSchema(format!(
                    "Column '{}' has invalid width {}",
                    column.name, n
                )));
            }
        }
        Ok(())
    }

    /// Get column count
    pub fn count(&self) -> usize {
        self.columns.len()
    }

    /// Key column definition
    pub fn key_column(&self) -> &Column {
        &self.columns[self.index]
    }

    /// Byte length handed to the key comparator
    pub fn key_len(&self) -> usize {
        self.key_column().column_type.size()
    }

    /// Byte range of the key field inside a record
    pub fn key_range(&self) -> std::ops::Range<usize> {
        self.index * FIELD_SIZE..(self.index + 1) * FIELD_SIZE
    }

    /// Get total record size in bytes
    pub fn record_size(&self) -> usize {
        self.count() * FIELD_SIZE
    }

    /// Find column index by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn encode(&self) -> [u8; RESERVED_SIZE] {
        let mut buf = [0u8; RESERVED_SIZE];
        buf[0] = self.index as u8;
        buf[COUNT_OFFSET] = self.count() as u8;
        for (i, column) in self.columns.iter().enumerate() {
            let name = column.name.as_bytes();
            let start = NAMES_OFFSET + i * NAME_SIZE;
            buf[start..start + name.len()].copy_from_slice(name);
            buf[KEY_SIZE_OFFSET + i] = name.len() as u8;
            buf[VAL_SIZE_OFFSET + i] = column.column_type.size() as u8;
            buf[TYPE_OFFSET + i] = column.column_type.tag();
        }
        self.head.encode(&mut buf[HEAD_OFFSET..TAIL_OFFSET]);
        self.tail.encode(&mut buf[TAIL_OFFSET..CAPACITY_OFFSET]);
        buf[CAPACITY_OFFSET..Self::SIZE].copy_from_slice(&(self.node_capacity as u16).to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> RecordResult<Self> {
        let index = buf[0] as usize;
        let count = buf[COUNT_OFFSET] as usize;
        if count > MAX_COLUMNS {
            return Err(RecordError::Deserialization(format!(
                "Column count {} exceeds {}",
                count, MAX_COLUMNS
            )));
        }

        let mut columns = Vec::with_capacity(count);
        for i in 0..count {
            let start = NAMES_OFFSET + i * NAME_SIZE;
            let len = (buf[KEY_SIZE_OFFSET + i] as usize).min(NAME_SIZE);
            let name = String::from_utf8(buf[start..start + len].to_vec())
                .map_err(|e| RecordError::Deserialization(format!("Invalid UTF-8: {}", e)))?;
            let column_type = ColumnType::from_tag(buf[TYPE_OFFSET + i], buf[VAL_SIZE_OFFSET + i])?;
            columns.push(Column { name, column_type });
        }

        let attr = Self {
            index,
            columns,
            head: Addr::decode(&buf[HEAD_OFFSET..TAIL_OFFSET]),
            tail: Addr::decode(&buf[TAIL_OFFSET..CAPACITY_OFFSET]),
            node_capacity: u16::from_le_bytes([buf[CAPACITY_OFFSET], buf[CAPACITY_OFFSET + 1]])
                as usize,
        };
        attr.validate()?;
        Ok(attr)
    }

    /// Encode typed values into a record of `record_size()` bytes
    pub fn encode_record(&self, values: &[Value]) -> RecordResult<Vec<u8>> {
        if values.len() != self.count() {
            return Err(RecordError::SchemaMismatch(format!(
                "Expected {} columns, got {}",
                self.count(),
                values.len()
            )));
        }

        let mut record = Vec::with_capacity(self.record_size());
        for (value, column) in values.iter().zip(&self.columns) {
            record.extend_from_slice(&value.encode_field(column.column_type)?);
        }
        Ok(record)
    }

    /// Decode a record back into typed values
    pub fn decode_record(&self, record: &[u8]) -> RecordResult<Vec<Value>> {
        if record.len() != self.record_size() {
            return Err(RecordError::InvalidRecord(format!(
                "Expected {} bytes, got {}",
                self.record_size(),
                record.len()
            )));
        }

        record
            .chunks_exact(FIELD_SIZE)
            .zip(&self.columns)
            .map(|(field, column)| Value::decode_field(field, column.column_type))
            .collect()
    }

    /// Encode a single key value as a full field
    pub fn encode_key(&self, key: &Value) -> RecordResult<[u8; FIELD_SIZE]> {
        key.encode_field(self.key_column().column_type)
    }
}

//! Typed records over fixed 40-byte fields
//!
//! A record is `count * FIELD_SIZE` bytes; column `i` occupies bytes
//! `i * FIELD_SIZE..(i + 1) * FIELD_SIZE`, zero padded after its value.

mod error;
mod schema;
mod value;

pub use error::{RecordError, RecordResult};
pub use schema::{Attr, Column, MAX_COLUMNS, NAME_SIZE};
pub use value::{ColumnType, FIELD_SIZE, Value};

/// Encode typed values against a schema
pub fn encode_record(attr: &Attr, values: &[Value]) -> RecordResult<Vec<u8>> {
    attr.encode_record(values)
}

/// Decode a raw record against a schema
pub fn decode_record(attr: &Attr, record: &[u8]) -> RecordResult<Vec<Value>> {
    attr.decode_record(record)
}

pub mod btree;
pub mod config;
pub mod file;
pub mod record;

pub use btree::{
    BPlusTree, BPlusTreeError, BPlusTreeResult, KeyComparator, NODE_NUM, compare_bytes,
    compare_float, compare_int, compare_str, comparator_for,
};
pub use config::{ConfigError, ConfigResult, StorageConfig};
pub use file::{
    Addr, BUFFER_POOL_SIZE, BufferPool, FileError, FileHandle, FileResult, PAGE_SIZE,
    PagedFileManager,
};
pub use record::{
    Attr, Column, ColumnType, FIELD_SIZE, RecordError, RecordResult, Value, decode_record,
    encode_record,
};

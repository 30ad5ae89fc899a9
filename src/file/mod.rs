mod buffer_pool;
mod error;
mod file_manager;
mod page;
mod slot;

pub use buffer_pool::BufferPool;
pub use error::{FileError, FileResult};
pub use file_manager::{FileHandle, PagedFileManager};
pub use page::{FrameId, Page, PageHandle, PageKey};
pub use slot::{Addr, FileHeader, PagedFile};

/// Page size in bytes (16KB)
pub const PAGE_SIZE: usize = 16384;

/// Number of frames in the buffer pool
/// 4096 frames × 16KB = 64MB
pub const BUFFER_POOL_SIZE: usize = 4096;

/// Bytes of the file header handed to upper layers (schema storage for index files)
pub const RESERVED_SIZE: usize = 512;

/// Page ID type
pub type PageId = u32;

use std::io;
use thiserror::Error;

use super::slot::Addr;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(usize),

    #[error("Stale page handle: frame {frame} no longer holds page {page_id}")]
    StalePage { frame: usize, page_id: u32 },

    #[error("Buffer pool is full")]
    BufferPoolFull,

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Invalid slot address: {0}")]
    InvalidAddr(Addr),

    #[error("Slot of {0} bytes does not fit in a page")]
    SlotTooLarge(usize),

    #[error("File truncated: header lists {expected} pages, found {actual}")]
    Truncated { expected: usize, actual: usize },
}

pub type FileResult<T> = Result<T, FileError>;

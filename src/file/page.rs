use super::file_manager::FileHandle;
use super::{PAGE_SIZE, PageId};

/// Index of a frame in the buffer pool arena
pub type FrameId = usize;

/// A key identifying a page in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub file: FileHandle,
    pub page_id: PageId,
}

impl PageKey {
    pub fn new(file: FileHandle, page_id: PageId) -> Self {
        Self { file, page_id }
    }

    /// Page 0 of every file holds the file header and is pinned
    pub fn is_header(&self) -> bool {
        self.page_id == 0
    }
}

/// One in-memory frame of the buffer pool
///
/// The generation counter is bumped every time the frame is handed to a
/// different page, which is what lets [`PageHandle`]s detect reuse.
pub struct Page {
    data: Box<[u8]>,
    owner: Option<PageKey>,
    dirty: bool,
    generation: u64,
}

impl Page {
    pub(crate) fn new() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            owner: None,
            dirty: false,
            generation: 0,
        }
    }

    /// Hand the frame to a new page
    pub(crate) fn assign(&mut self, owner: PageKey) {
        self.owner = Some(owner);
        self.dirty = false;
        self.generation += 1;
    }

    /// Detach the frame from its page
    pub(crate) fn release(&mut self) {
        self.owner = None;
        self.dirty = false;
        self.generation += 1;
    }

    pub fn owner(&self) -> Option<PageKey> {
        self.owner
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Lease on a resident page
///
/// Handles are cheap to copy. Resolving one through the pool checks that the
/// frame still holds the same page, so a handle kept across an eviction fails
/// instead of reading someone else's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHandle {
    pub(crate) frame: FrameId,
    pub(crate) generation: u64,
    pub(crate) key: PageKey,
}

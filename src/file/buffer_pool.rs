use std::collections::VecDeque;
use std::path::Path;

use ahash::AHashMap;
use log::{debug, warn};
use lru::LruCache;

use super::error::{FileError, FileResult};
use super::file_manager::{FileHandle, PagedFileManager};
use super::page::{FrameId, Page, PageHandle, PageKey};
use super::slot::{FileHeader, PagedFile};
use super::{BUFFER_POOL_SIZE, PAGE_SIZE, PageId};

/// Resident state of an open file
struct OpenFile {
    /// Frame pinned to page 0
    header: FrameId,
    /// Non-header pages currently resident
    pages: AHashMap<PageId, FrameId>,
    /// Registration order, used to pick a file to close under pressure
    opened_at: u64,
}

/// Fixed-capacity page cache with LRU eviction
///
/// Header pages (page 0) of open files are pinned: they never enter the LRU
/// list and stay resident until their file is closed. Every other resident
/// page sits on the LRU list and is promoted on access.
pub struct BufferPool {
    /// Underlying file manager
    file_manager: PagedFileManager,
    /// Frame arena
    frames: Vec<Page>,
    /// Frames released by closed files, reused before anything else
    free_frames: VecDeque<FrameId>,
    /// LRU order of unpinned resident pages
    lru: LruCache<PageKey, FrameId>,
    /// Files with a resident header page
    open_files: AHashMap<FileHandle, OpenFile>,
    /// Maximum number of frames
    capacity: usize,
    /// Counter feeding `OpenFile::opened_at`
    open_seq: u64,
}

impl BufferPool {
    /// Create a new buffer pool
    pub fn new(file_manager: PagedFileManager) -> Self {
        Self::with_capacity(file_manager, BUFFER_POOL_SIZE)
    }

    /// Create a new buffer pool with specified capacity
    pub fn with_capacity(file_manager: PagedFileManager, capacity: usize) -> Self {
        Self {
            file_manager,
            frames: Vec::new(),
            free_frames: VecDeque::new(),
            lru: LruCache::unbounded(),
            open_files: AHashMap::new(),
            capacity: capacity.max(1),
            open_seq: 0,
        }
    }

    /// Slot-level access to an open (or lazily reopened) file
    pub fn file(&mut self, handle: FileHandle) -> PagedFile<'_> {
        PagedFile::new(self, handle)
    }

    // ========== File Lifecycle ==========

    /// Create a file, write its initial header page and open it
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let path = path.as_ref();
        self.file_manager.create_file(path)?;
        let handle = self.file_manager.register(path)?;
        self.file_manager.open(handle)?;

        let mut page = vec![0u8; PAGE_SIZE];
        FileHeader::new().encode(&mut page);
        self.file_manager.write_page(handle, 0, &page)?;

        self.ensure_open(handle)?;
        Ok(handle)
    }

    /// Open an existing file, returning its handle
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let handle = self.file_manager.register(path)?;
        self.ensure_open(handle)?;
        Ok(handle)
    }

    /// Flush every resident page of a file and release its frames
    pub fn close_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let Some(open) = self.open_files.get(&handle) else {
            return Ok(());
        };

        let mut frames: Vec<FrameId> = open.pages.values().copied().collect();
        frames.push(open.header);

        for &frame in &frames {
            self.write_back(frame)?;
        }

        let open = self
            .open_files
            .remove(&handle)
            .ok_or(FileError::InvalidHandle(handle.as_usize()))?;
        for &page_id in open.pages.keys() {
            self.lru.pop(&PageKey::new(handle, page_id));
        }
        for frame in frames {
            self.frames[frame].release();
            self.free_frames.push_back(frame);
        }

        self.file_manager.close(handle)?;
        debug!("closed file {} and released its frames", handle);
        Ok(())
    }

    /// Close (if open) and delete a file
    pub fn delete_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();
        if let Some(handle) = self.file_manager.handle_of(path) {
            self.close_file(handle)?;
        }
        self.file_manager.remove_file(path)
    }

    /// Close every open file
    pub fn close_all(&mut self) -> FileResult<()> {
        let handles: Vec<FileHandle> = self.open_files.keys().copied().collect();
        for handle in handles {
            self.close_file(handle)?;
        }
        Ok(())
    }

    /// Make sure a registered file is open with its header pinned
    fn ensure_open(&mut self, handle: FileHandle) -> FileResult<()> {
        if self.open_files.contains_key(&handle) {
            return Ok(());
        }

        self.file_manager.open(handle)?;
        let frame = self.acquire_frame(handle)?;
        if let Err(e) = self
            .load_into(frame, PageKey::new(handle, 0))
            .and_then(|()| self.check_length(handle, frame))
        {
            self.frames[frame].release();
            self.free_frames.push_back(frame);
            return Err(e);
        }

        self.open_seq += 1;
        self.open_files.insert(
            handle,
            OpenFile {
                header: frame,
                pages: AHashMap::new(),
                opened_at: self.open_seq,
            },
        );
        Ok(())
    }

    // ========== Page Access ==========

    /// Get a handle to a page, loading it from disk if necessary
    pub fn get_page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<PageHandle> {
        self.ensure_open(file)?;
        let key = PageKey::new(file, page_id);

        let resident = {
            let open = self
                .open_files
                .get(&file)
                .ok_or(FileError::InvalidHandle(file.as_usize()))?;
            if key.is_header() {
                Some(open.header)
            } else {
                open.pages.get(&page_id).copied()
            }
        };

        if let Some(frame) = resident {
            if !key.is_header() {
                self.lru.promote(&key);
            }
            return Ok(self.handle(frame, key));
        }

        let frame = self.acquire_frame(file)?;
        if let Err(e) = self.load_into(frame, key) {
            self.free_frames.push_back(frame);
            return Err(e);
        }
        self.track(frame, key)?;

        Ok(self.handle(frame, key))
    }

    /// Append a zeroed page to a file, writing it through immediately
    pub fn new_page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<PageHandle> {
        self.ensure_open(file)?;
        let key = PageKey::new(file, page_id);

        if let Some(frame) = self.resident_frame(file, page_id) {
            let page = &mut self.frames[frame];
            page.data_mut().fill(0);
            self.file_manager.write_page(file, page_id, page.data())?;
            page.mark_clean();
            return Ok(self.handle(frame, key));
        }

        let frame = self.acquire_frame(file)?;
        let page = &mut self.frames[frame];
        page.assign(key);
        page.data_mut().fill(0);
        if let Err(e) = self.file_manager.write_page(file, page_id, page.data()) {
            page.release();
            self.free_frames.push_back(frame);
            return Err(e);
        }
        self.track(frame, key)?;

        debug!("appended page {} to file {}", page_id, file);
        Ok(self.handle(frame, key))
    }

    /// Resolve a handle to the page bytes
    pub fn page(&self, handle: PageHandle) -> FileResult<&[u8]> {
        self.check_handle(handle)?;
        Ok(self.frames[handle.frame].data())
    }

    /// Resolve a handle to mutable page bytes, marking the page dirty
    pub fn page_mut(&mut self, handle: PageHandle) -> FileResult<&mut [u8]> {
        self.check_handle(handle)?;
        let page = &mut self.frames[handle.frame];
        page.mark_dirty();
        Ok(page.data_mut())
    }

    /// Copy bytes out of a page
    pub fn read_at(
        &mut self,
        file: FileHandle,
        page_id: PageId,
        offset: usize,
        buf: &mut [u8],
    ) -> FileResult<()> {
        check_range(offset, buf.len())?;
        let handle = self.get_page(file, page_id)?;
        let data = self.page(handle)?;
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        Ok(())
    }

    /// Copy bytes into a page, marking it dirty
    pub fn write_at(
        &mut self,
        file: FileHandle,
        page_id: PageId,
        offset: usize,
        bytes: &[u8],
    ) -> FileResult<()> {
        check_range(offset, bytes.len())?;
        let handle = self.get_page(file, page_id)?;
        let data = self.page_mut(handle)?;
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    // ========== Flushing ==========

    /// Flush a specific page to disk if it's resident and dirty
    pub fn flush_page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<()> {
        if let Some(frame) = self.resident_frame(file, page_id) {
            self.write_back(frame)?;
        }
        Ok(())
    }

    /// Flush all dirty pages to disk
    pub fn flush_all(&mut self) -> FileResult<()> {
        for frame in 0..self.frames.len() {
            self.write_back(frame)?;
        }

        // Sync all files to ensure data is persisted to disk
        self.file_manager.sync_all()?;

        Ok(())
    }

    // ========== Frame Management ==========

    /// Find a frame for a page of `serving`
    ///
    /// Order: free queue, fresh allocation below capacity, LRU victim, and as
    /// a last resort closing the eldest other open file.
    fn acquire_frame(&mut self, serving: FileHandle) -> FileResult<FrameId> {
        loop {
            if let Some(frame) = self.free_frames.pop_front() {
                return Ok(frame);
            }

            if self.frames.len() < self.capacity {
                self.frames.push(Page::new());
                return Ok(self.frames.len() - 1);
            }

            if let Some((&key, &frame)) = self.lru.peek_lru() {
                self.write_back(frame)?;
                self.lru.pop_lru();
                if let Some(open) = self.open_files.get_mut(&key.file) {
                    open.pages.remove(&key.page_id);
                }
                self.frames[frame].release();
                debug!(
                    "evicted page {} of file {} from frame {}",
                    key.page_id, key.file, frame
                );
                return Ok(frame);
            }

            // Only pinned header pages are resident
            let victim = self
                .open_files
                .iter()
                .filter(|&(&handle, _)| handle != serving)
                .min_by_key(|(_, open)| open.opened_at)
                .map(|(&handle, _)| handle)
                .ok_or(FileError::BufferPoolFull)?;

            warn!(
                "buffer pool holds only header pages, closing file {} to reclaim a frame",
                victim
            );
            self.close_file(victim)?;
        }
    }

    /// Read a page from disk into a frame and assign the frame to it
    fn load_into(&mut self, frame: FrameId, key: PageKey) -> FileResult<()> {
        let page = &mut self.frames[frame];
        self.file_manager
            .read_page(key.file, key.page_id, page.data_mut())?;
        page.assign(key);
        Ok(())
    }

    /// Pages are written through on append, so the file can never be shorter
    /// than its header says
    fn check_length(&mut self, handle: FileHandle, header: FrameId) -> FileResult<()> {
        let expected = FileHeader::decode(self.frames[header].data()).page_count as usize;
        let actual = self.file_manager.get_page_count(handle)?;
        if actual < expected {
            return Err(FileError::Truncated { expected, actual });
        }
        Ok(())
    }

    /// Record a freshly loaded non-header page in the LRU list and the file's map
    fn track(&mut self, frame: FrameId, key: PageKey) -> FileResult<()> {
        let open = self
            .open_files
            .get_mut(&key.file)
            .ok_or(FileError::InvalidHandle(key.file.as_usize()))?;
        open.pages.insert(key.page_id, frame);
        self.lru.put(key, frame);
        Ok(())
    }

    /// Write a frame back to its page if dirty
    fn write_back(&mut self, frame: FrameId) -> FileResult<()> {
        let page = &mut self.frames[frame];
        if let Some(owner) = page.owner()
            && page.is_dirty()
        {
            self.file_manager
                .write_page(owner.file, owner.page_id, page.data())?;
            page.mark_clean();
        }
        Ok(())
    }

    fn handle(&self, frame: FrameId, key: PageKey) -> PageHandle {
        PageHandle {
            frame,
            generation: self.frames[frame].generation(),
            key,
        }
    }

    fn check_handle(&self, handle: PageHandle) -> FileResult<()> {
        let page = self
            .frames
            .get(handle.frame)
            .ok_or(FileError::InvalidHandle(handle.key.file.as_usize()))?;
        if page.generation() != handle.generation || page.owner() != Some(handle.key) {
            return Err(FileError::StalePage {
                frame: handle.frame,
                page_id: handle.key.page_id,
            });
        }
        Ok(())
    }

    fn resident_frame(&self, file: FileHandle, page_id: PageId) -> Option<FrameId> {
        let open = self.open_files.get(&file)?;
        if page_id == 0 {
            Some(open.header)
        } else {
            open.pages.get(&page_id).copied()
        }
    }

    // ========== Introspection ==========

    /// Maximum number of frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of pages currently in the buffer pool
    pub fn buffer_pool_size(&self) -> usize {
        self.frames.len() - self.free_frames.len()
    }

    /// Check if a page is in the buffer pool
    pub fn is_page_cached(&self, file: FileHandle, page_id: PageId) -> bool {
        self.resident_frame(file, page_id).is_some()
    }

    /// Check if a file currently has its header pinned
    pub fn is_file_open(&self, file: FileHandle) -> bool {
        self.open_files.contains_key(&file)
    }

    /// Number of pages on the LRU list (resident, unpinned)
    pub fn evictable_count(&self) -> usize {
        self.lru.len()
    }

    /// Get the number of dirty pages in the buffer pool
    pub fn dirty_page_count(&self) -> usize {
        self.frames
            .iter()
            .filter(|p| p.owner().is_some() && p.is_dirty())
            .count()
    }
}

fn check_range(offset: usize, len: usize) -> FileResult<()> {
    if offset + len > PAGE_SIZE {
        return Err(FileError::InvalidPageSize {
            expected: PAGE_SIZE,
            actual: offset + len,
        });
    }
    Ok(())
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // Flush all dirty pages when the buffer pool is dropped
        let _ = self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_env(capacity: usize) -> (TempDir, BufferPool, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut pool = BufferPool::with_capacity(PagedFileManager::new(), capacity);
        let handle = pool.create_file(&test_file).unwrap();

        (temp_dir, pool, handle)
    }

    fn write_byte(pool: &mut BufferPool, file: FileHandle, page_id: PageId, value: u8) {
        let handle = pool.get_page(file, page_id).unwrap();
        pool.page_mut(handle).unwrap()[FileHeader::SIZE] = value;
    }

    fn read_byte(pool: &mut BufferPool, file: FileHandle, page_id: PageId) -> u8 {
        let handle = pool.get_page(file, page_id).unwrap();
        pool.page(handle).unwrap()[FileHeader::SIZE]
    }

    #[test]
    fn test_create_pins_header() {
        let (_temp_dir, pool, handle) = setup_test_env(8);

        assert!(pool.is_file_open(handle));
        assert!(pool.is_page_cached(handle, 0));
        assert_eq!(pool.buffer_pool_size(), 1);
        assert_eq!(pool.evictable_count(), 0);
    }

    #[test]
    fn test_get_page_cached() {
        let (_temp_dir, mut pool, handle) = setup_test_env(8);

        assert!(!pool.is_page_cached(handle, 1));
        pool.get_page(handle, 1).unwrap();
        assert!(pool.is_page_cached(handle, 1));

        pool.get_page(handle, 1).unwrap();
        assert_eq!(pool.buffer_pool_size(), 2);
        assert_eq!(pool.evictable_count(), 1);
    }

    #[test]
    fn test_page_mut_marks_dirty() {
        let (_temp_dir, mut pool, handle) = setup_test_env(8);

        write_byte(&mut pool, handle, 1, 99);
        assert_eq!(read_byte(&mut pool, handle, 1), 99);
        assert_eq!(pool.dirty_page_count(), 1);

        pool.flush_page(handle, 1).unwrap();
        assert_eq!(pool.dirty_page_count(), 0);
    }

    #[test]
    fn test_lru_eviction_skips_header() {
        // Header + 2 data frames
        let (_temp_dir, mut pool, handle) = setup_test_env(3);

        pool.get_page(handle, 1).unwrap();
        pool.get_page(handle, 2).unwrap();
        pool.get_page(handle, 3).unwrap();

        assert_eq!(pool.buffer_pool_size(), 3);
        assert!(pool.is_page_cached(handle, 0));
        assert!(!pool.is_page_cached(handle, 1));
        assert!(pool.is_page_cached(handle, 2));
        assert!(pool.is_page_cached(handle, 3));
    }

    #[test]
    fn test_lru_update_on_access() {
        let (_temp_dir, mut pool, handle) = setup_test_env(3);

        pool.get_page(handle, 1).unwrap();
        pool.get_page(handle, 2).unwrap();

        // Access page 1 again to make it recently used
        pool.get_page(handle, 1).unwrap();

        // Load a 3rd data page - should evict page 2 (now LRU)
        pool.get_page(handle, 3).unwrap();
        assert!(pool.is_page_cached(handle, 1));
        assert!(!pool.is_page_cached(handle, 2));
        assert!(pool.is_page_cached(handle, 3));
    }

    #[test]
    fn test_dirty_page_flushed_on_eviction() {
        let (_temp_dir, mut pool, handle) = setup_test_env(2);

        write_byte(&mut pool, handle, 1, 77);

        // Only one data frame: loading page 2 evicts page 1
        pool.get_page(handle, 2).unwrap();
        assert!(!pool.is_page_cached(handle, 1));

        assert_eq!(read_byte(&mut pool, handle, 1), 77);
    }

    #[test]
    fn test_stale_handle_detected() {
        let (_temp_dir, mut pool, handle) = setup_test_env(2);

        let first = pool.get_page(handle, 1).unwrap();
        pool.get_page(handle, 2).unwrap();

        assert!(matches!(
            pool.page(first),
            Err(FileError::StalePage { page_id: 1, .. })
        ));
    }

    #[test]
    fn test_header_only_pool_closes_eldest_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::with_capacity(PagedFileManager::new(), 2);

        let first = pool.create_file(temp_dir.path().join("a.db")).unwrap();
        let second = pool.create_file(temp_dir.path().join("b.db")).unwrap();
        write_byte(&mut pool, first, 0, 11);

        // Both frames hold pinned headers; a data page of `second` forces `first` out
        pool.get_page(second, 1).unwrap();
        assert!(!pool.is_file_open(first));
        assert!(pool.is_file_open(second));

        // Reopening is transparent and the header change survived
        assert_eq!(read_byte(&mut pool, first, 0), 11);
        assert!(pool.is_file_open(first));
    }

    #[test]
    fn test_single_header_pool_is_full() {
        let (_temp_dir, mut pool, handle) = setup_test_env(1);

        assert!(matches!(
            pool.get_page(handle, 1),
            Err(FileError::BufferPoolFull)
        ));
        // The header is still usable
        assert_eq!(read_byte(&mut pool, handle, 0), 0);
    }

    #[test]
    fn test_close_file_recycles_frames() {
        let (_temp_dir, mut pool, handle) = setup_test_env(8);

        write_byte(&mut pool, handle, 1, 5);
        pool.get_page(handle, 2).unwrap();
        assert_eq!(pool.buffer_pool_size(), 3);

        pool.close_file(handle).unwrap();
        assert_eq!(pool.buffer_pool_size(), 0);
        assert_eq!(pool.evictable_count(), 0);
        assert!(!pool.is_file_open(handle));

        assert_eq!(read_byte(&mut pool, handle, 1), 5);
    }

    #[test]
    fn test_new_page_is_written_through() {
        let (temp_dir, mut pool, handle) = setup_test_env(8);

        pool.new_page(handle, 1).unwrap();
        let len = std::fs::metadata(temp_dir.path().join("test.db"))
            .unwrap()
            .len();
        assert_eq!(len, 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_reopen_rejects_truncated_file() {
        let (temp_dir, mut pool, handle) = setup_test_env(8);
        let path = temp_dir.path().join("test.db");

        let mut file = pool.file(handle);
        for i in 0..5 {
            file.insert_item(&[i as u8; 4000]).unwrap();
        }
        assert_eq!(file.fetch_info().unwrap().page_count, 2);
        pool.close_file(handle).unwrap();

        // Intact file reopens fine
        pool.open_file(&path).unwrap();
        pool.close_file(handle).unwrap();

        let disk = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        disk.set_len(PAGE_SIZE as u64).unwrap();
        drop(disk);

        assert!(matches!(
            pool.open_file(&path),
            Err(FileError::Truncated {
                expected: 2,
                actual: 1
            })
        ));
        assert!(!pool.is_file_open(handle));
        assert_eq!(pool.buffer_pool_size(), 0);
    }

    #[test]
    fn test_delete_file() {
        let (temp_dir, mut pool, handle) = setup_test_env(8);
        let path = temp_dir.path().join("test.db");

        pool.delete_file(&path).unwrap();
        assert!(!path.exists());
        assert!(!pool.is_file_open(handle));
        assert!(matches!(
            pool.get_page(handle, 0),
            Err(FileError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_drop_flushes_dirty_pages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        {
            let mut pool = BufferPool::new(PagedFileManager::new());
            let handle = pool.create_file(&test_file).unwrap();
            write_byte(&mut pool, handle, 1, 88);
            // pool is dropped here, should flush
        }

        let mut pool = BufferPool::new(PagedFileManager::new());
        let handle = pool.open_file(&test_file).unwrap();
        assert_eq!(read_byte(&mut pool, handle, 1), 88);
    }
}

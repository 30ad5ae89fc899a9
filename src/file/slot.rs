//! Free-list slot allocator over the pages of one file

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use super::buffer_pool::BufferPool;
use super::error::{FileError, FileResult};
use super::file_manager::FileHandle;
use super::{PAGE_SIZE, PageId, RESERVED_SIZE};

/// Logical pointer to a slot: page + byte offset inside the page
///
/// `Addr::NULL` (page 0, offset 0) never names a slot because the file header
/// lives there.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Addr {
    pub page_id: PageId,
    pub offset: u16,
}

impl Addr {
    /// Encoded size: u32 page id + u16 offset
    pub const SIZE: usize = 6;

    pub const NULL: Addr = Addr {
        page_id: 0,
        offset: 0,
    };

    pub fn new(page_id: PageId, offset: u16) -> Self {
        Self { page_id, offset }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.offset.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            page_id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            offset: u16::from_le_bytes([buf[4], buf[5]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        self.encode(&mut buf);
        buf
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id, self.offset)
    }
}

/// Header stored at offset 0 of page 0 of every file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Head of the LIFO free list (NULL when empty)
    pub free_head: Addr,
    /// First unused byte of the highest-numbered page
    pub tail: Addr,
    /// Number of pages in the file
    pub page_count: u32,
    /// Area owned by the layer above
    pub reserved: [u8; RESERVED_SIZE],
}

impl FileHeader {
    pub const SIZE: usize = Addr::SIZE * 2 + 4 + RESERVED_SIZE;

    /// Header of a freshly created file: one page, slots start right after the header
    pub fn new() -> Self {
        Self {
            free_head: Addr::NULL,
            tail: Addr::new(0, Self::SIZE as u16),
            page_count: 1,
            reserved: [0u8; RESERVED_SIZE],
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        self.free_head.encode(&mut buf[0..6]);
        self.tail.encode(&mut buf[6..12]);
        buf[12..16].copy_from_slice(&self.page_count.to_le_bytes());
        buf[16..Self::SIZE].copy_from_slice(&self.reserved);
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut reserved = [0u8; RESERVED_SIZE];
        reserved.copy_from_slice(&buf[16..Self::SIZE]);
        Self {
            free_head: Addr::decode(&buf[0..6]),
            tail: Addr::decode(&buf[6..12]),
            page_count: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            reserved,
        }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot-level view of one file in the pool
///
/// Every slot is an `Addr`-sized header followed by the payload. A live slot's
/// header repeats its own address; a freed slot's header links to the next
/// free slot. All slots of a file are expected to have the same payload size,
/// since freed slots are handed out again regardless of the requested size.
pub struct PagedFile<'a> {
    pool: &'a mut BufferPool,
    handle: FileHandle,
}

impl<'a> PagedFile<'a> {
    pub(crate) fn new(pool: &'a mut BufferPool, handle: FileHandle) -> Self {
        Self { pool, handle }
    }

    /// Read the file header
    pub fn fetch_info(&mut self) -> FileResult<FileHeader> {
        let mut buf = [0u8; FileHeader::SIZE];
        self.pool.read_at(self.handle, 0, 0, &mut buf)?;
        Ok(FileHeader::decode(&buf))
    }

    /// Overwrite the file header
    pub fn store_info(&mut self, info: &FileHeader) -> FileResult<()> {
        let mut buf = [0u8; FileHeader::SIZE];
        info.encode(&mut buf);
        self.pool.write_at(self.handle, 0, 0, &buf)
    }

    /// Overwrite the reserved area of the header
    pub fn store_reserved(&mut self, bytes: &[u8]) -> FileResult<()> {
        if bytes.len() > RESERVED_SIZE {
            return Err(FileError::SlotTooLarge(bytes.len()));
        }
        let mut info = self.fetch_info()?;
        info.reserved.fill(0);
        info.reserved[..bytes.len()].copy_from_slice(bytes);
        self.store_info(&info)
    }

    /// Allocate a slot holding `src` and return its address
    pub fn insert_item(&mut self, src: &[u8]) -> FileResult<Addr> {
        let size = src.len();
        if Addr::SIZE + size > PAGE_SIZE {
            return Err(FileError::SlotTooLarge(size));
        }

        let mut info = self.fetch_info()?;

        let addr = if !info.free_head.is_null() {
            let addr = info.free_head;
            let mut link = [0u8; Addr::SIZE];
            self.pool
                .read_at(self.handle, addr.page_id, addr.offset as usize, &mut link)?;
            info.free_head = Addr::decode(&link);
            addr
        } else {
            let used = info.tail.offset as usize + Addr::SIZE;
            if used > PAGE_SIZE || PAGE_SIZE - used < size {
                self.add_page(&mut info)?;
            }
            let addr = info.tail;
            info.tail.offset += (Addr::SIZE + size) as u16;
            addr
        };

        let mut slot = Vec::with_capacity(Addr::SIZE + size);
        slot.extend_from_slice(&addr.to_bytes());
        slot.extend_from_slice(src);
        self.pool
            .write_at(self.handle, addr.page_id, addr.offset as usize, &slot)?;

        self.store_info(&info)?;
        Ok(addr)
    }

    /// Return a slot to the free list
    pub fn remove_item(&mut self, addr: Addr) -> FileResult<()> {
        let mut info = self.fetch_info()?;
        self.check_addr(&info, addr)?;

        self.pool.write_at(
            self.handle,
            addr.page_id,
            addr.offset as usize,
            &info.free_head.to_bytes(),
        )?;

        info.free_head = addr;
        self.store_info(&info)
    }

    /// Overwrite the payload of a slot in place
    pub fn update_item(&mut self, addr: Addr, src: &[u8]) -> FileResult<()> {
        let info = self.fetch_info()?;
        self.check_addr(&info, addr)?;
        self.pool.write_at(
            self.handle,
            addr.page_id,
            addr.offset as usize + Addr::SIZE,
            src,
        )
    }

    /// Copy the payload of a slot into `tar`
    pub fn search_item(&mut self, addr: Addr, tar: &mut [u8]) -> FileResult<()> {
        let info = self.fetch_info()?;
        self.check_addr(&info, addr)?;
        self.pool.read_at(
            self.handle,
            addr.page_id,
            addr.offset as usize + Addr::SIZE,
            tar,
        )
    }

    /// Append a zeroed page and move the tail to its start
    fn add_page(&mut self, info: &mut FileHeader) -> FileResult<()> {
        let page_id = info.page_count;
        self.pool.new_page(self.handle, page_id)?;
        info.page_count += 1;
        info.tail = Addr::new(page_id, 0);
        debug!("file {} grew to {} pages", self.handle, info.page_count);
        Ok(())
    }

    fn check_addr(&self, info: &FileHeader, addr: Addr) -> FileResult<()> {
        if addr.is_null()
            || addr.page_id >= info.page_count
            || addr.offset as usize + Addr::SIZE > PAGE_SIZE
        {
            return Err(FileError::InvalidAddr(addr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;
    use tempfile::TempDir;

    fn setup() -> (TempDir, BufferPool, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut pool = BufferPool::new(PagedFileManager::new());
        let handle = pool.create_file(temp_dir.path().join("slots.db")).unwrap();
        (temp_dir, pool, handle)
    }

    #[test]
    fn test_addr_encoding() {
        let addr = Addr::new(70000, 513);
        assert_eq!(Addr::decode(&addr.to_bytes()), addr);
        assert!(Addr::NULL.is_null());
        assert!(!addr.is_null());
        assert_eq!(addr.to_string(), "70000:513");
    }

    #[test]
    fn test_new_file_header() {
        let (_temp_dir, mut pool, handle) = setup();

        let info = pool.file(handle).fetch_info().unwrap();
        assert!(info.free_head.is_null());
        assert_eq!(info.tail, Addr::new(0, FileHeader::SIZE as u16));
        assert_eq!(info.page_count, 1);
    }

    #[test]
    fn test_insert_and_search_item() {
        let (_temp_dir, mut pool, handle) = setup();
        let mut file = pool.file(handle);

        let first = file.insert_item(b"hello").unwrap();
        let second = file.insert_item(b"world").unwrap();

        assert_eq!(first, Addr::new(0, FileHeader::SIZE as u16));
        assert_eq!(
            second,
            Addr::new(0, (FileHeader::SIZE + Addr::SIZE + 5) as u16)
        );

        let mut buf = [0u8; 5];
        file.search_item(first, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        file.search_item(second, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_update_item_keeps_header() {
        let (_temp_dir, mut pool, handle) = setup();
        let mut file = pool.file(handle);

        let addr = file.insert_item(&[1u8; 16]).unwrap();
        file.update_item(addr, &[2u8; 16]).unwrap();

        let mut buf = [0u8; 16];
        file.search_item(addr, &mut buf).unwrap();
        assert_eq!(buf, [2u8; 16]);

        let info_before = file.fetch_info().unwrap();
        file.update_item(addr, &[3u8; 16]).unwrap();
        assert_eq!(file.fetch_info().unwrap(), info_before);
    }

    #[test]
    fn test_remove_item_is_lifo() {
        let (_temp_dir, mut pool, handle) = setup();
        let mut file = pool.file(handle);

        let a = file.insert_item(&[0xAA; 32]).unwrap();
        let b = file.insert_item(&[0xBB; 32]).unwrap();
        let c = file.insert_item(&[0xCC; 32]).unwrap();

        file.remove_item(a).unwrap();
        file.remove_item(c).unwrap();
        assert_eq!(file.fetch_info().unwrap().free_head, c);

        // Most recently freed slot comes back first
        assert_eq!(file.insert_item(&[1; 32]).unwrap(), c);
        assert_eq!(file.insert_item(&[2; 32]).unwrap(), a);
        assert!(file.fetch_info().unwrap().free_head.is_null());

        let mut buf = [0u8; 32];
        file.search_item(b, &mut buf).unwrap();
        assert_eq!(buf, [0xBB; 32]);
    }

    #[test]
    fn test_insert_spills_to_new_page() {
        let (_temp_dir, mut pool, handle) = setup();
        let mut file = pool.file(handle);

        let size = 4000;
        let per_page_zero = (PAGE_SIZE - FileHeader::SIZE) / (Addr::SIZE + size);
        let mut addrs = Vec::new();
        for i in 0..per_page_zero + 1 {
            addrs.push(file.insert_item(&vec![i as u8; size]).unwrap());
        }

        assert!(addrs[..per_page_zero].iter().all(|a| a.page_id == 0));
        assert_eq!(addrs[per_page_zero], Addr::new(1, 0));
        assert_eq!(file.fetch_info().unwrap().page_count, 2);

        let mut buf = vec![0u8; size];
        file.search_item(addrs[per_page_zero], &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == per_page_zero as u8));
    }

    #[test]
    fn test_free_list_prevents_growth() {
        let (_temp_dir, mut pool, handle) = setup();
        let mut file = pool.file(handle);

        let addrs: Vec<Addr> = (0..50)
            .map(|i| file.insert_item(&[i as u8; 1000]).unwrap())
            .collect();
        let pages = file.fetch_info().unwrap().page_count;

        for addr in &addrs[10..40] {
            file.remove_item(*addr).unwrap();
        }
        for i in 0..30 {
            file.insert_item(&[i as u8; 1000]).unwrap();
        }

        assert_eq!(file.fetch_info().unwrap().page_count, pages);
    }

    #[test]
    fn test_invalid_addresses() {
        let (_temp_dir, mut pool, handle) = setup();
        let mut file = pool.file(handle);

        assert!(matches!(
            file.remove_item(Addr::NULL),
            Err(FileError::InvalidAddr(_))
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            file.search_item(Addr::new(9, 0), &mut buf),
            Err(FileError::InvalidAddr(_))
        ));
        assert!(matches!(
            file.insert_item(&vec![0u8; PAGE_SIZE]),
            Err(FileError::SlotTooLarge(_))
        ));
    }

    #[test]
    fn test_store_reserved() {
        let (_temp_dir, mut pool, handle) = setup();
        let mut file = pool.file(handle);

        file.insert_item(b"payload").unwrap();
        let before = file.fetch_info().unwrap();

        file.store_reserved(b"schema bytes").unwrap();
        let after = file.fetch_info().unwrap();

        assert_eq!(&after.reserved[..12], b"schema bytes");
        assert!(after.reserved[12..].iter().all(|&b| b == 0));
        assert_eq!(after.tail, before.tail);
        assert_eq!(after.free_head, before.free_head);
    }
}

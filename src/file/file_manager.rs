use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use log::debug;

use super::error::{FileError, FileResult};
use super::{PAGE_SIZE, PageId};

/// Handle to a registered file
///
/// A handle stays valid across close/reopen cycles of the underlying OS file;
/// only removing the file invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(pub(crate) usize);

impl FileHandle {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Manages paged file operations
pub struct PagedFileManager {
    /// Registered files, indexed by handle
    entries: Vec<FileEntry>,
    /// Map from file paths to handles (for checking if already registered)
    path_to_handle: AHashMap<PathBuf, FileHandle>,
}

struct FileEntry {
    path: PathBuf,
    /// OS file, present while the file is open
    file: Option<File>,
    /// Set once the file has been deleted; the handle is dead from then on
    removed: bool,
}

impl PagedFileManager {
    /// Create a new paged file manager
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            path_to_handle: AHashMap::new(),
        }
    }

    /// Create a new, empty file
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        File::create(path)?;
        Ok(())
    }

    /// Register an existing file and return its handle
    ///
    /// Registering the same path twice yields the same handle. The OS file is
    /// not opened until [`PagedFileManager::open`] is called.
    pub fn register<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        if let Some(&handle) = self.path_to_handle.get(&path) {
            return Ok(handle);
        }

        let handle = FileHandle(self.entries.len());
        self.entries.push(FileEntry {
            path: path.clone(),
            file: None,
            removed: false,
        });
        self.path_to_handle.insert(path, handle);

        Ok(handle)
    }

    /// Look up the handle of a registered path without registering it
    pub fn handle_of<P: AsRef<Path>>(&self, path: P) -> Option<FileHandle> {
        let path = path.as_ref().canonicalize().ok()?;
        self.path_to_handle.get(&path).copied()
    }

    /// Open the OS file behind a handle (no-op when already open)
    pub fn open(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self.entry_mut(handle)?;
        if entry.file.is_some() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&entry.path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    FileError::FileNotFound(entry.path.display().to_string())
                }
                _ => FileError::Io(e),
            })?;
        debug!("opened {} as {}", entry.path.display(), handle);
        entry.file = Some(file);

        Ok(())
    }

    /// Close the OS file behind a handle, syncing it first
    pub fn close(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self.entry_mut(handle)?;

        if let Some(file) = entry.file.take() {
            file.sync_data()?;
            debug!("closed {}", entry.path.display());
        }
        Ok(())
    }

    /// Remove (delete) a file, invalidating its handle if it was registered
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if let Ok(canonical_path) = path.canonicalize()
            && let Some(handle) = self.path_to_handle.remove(&canonical_path)
        {
            let entry = &mut self.entries[handle.0];
            entry.file = None;
            entry.removed = true;
        }

        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Read a page from a file
    pub fn read_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &mut [u8],
    ) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let file = self.open_file_mut(handle)?;

        let offset = page_id as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;

        // Short reads past the end of file leave zeros behind
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer[filled..].fill(0);

        Ok(())
    }

    /// Write a page to a file
    pub fn write_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &[u8],
    ) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let file = self.open_file_mut(handle)?;

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let required_size = offset + PAGE_SIZE as u64;

        // Extend file if necessary to ensure we can write at this offset
        let current_size = file.metadata()?.len();
        if current_size < required_size {
            file.set_len(required_size)?;
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buffer)?;

        Ok(())
    }

    /// Get the number of pages in a file
    pub fn get_page_count(&mut self, handle: FileHandle) -> FileResult<usize> {
        let file = self.open_file_mut(handle)?;
        let file_size = file.metadata()?.len();
        Ok(file_size.div_ceil(PAGE_SIZE as u64) as usize)
    }

    /// Sync all open files to disk
    pub fn sync_all(&mut self) -> FileResult<()> {
        for file in self.entries.iter_mut().filter_map(|e| e.file.as_mut()) {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Check if a file is open
    pub fn is_file_open(&self, handle: FileHandle) -> bool {
        self.entries
            .get(handle.0)
            .is_some_and(|e| !e.removed && e.file.is_some())
    }

    fn entry_mut(&mut self, handle: FileHandle) -> FileResult<&mut FileEntry> {
        self.entries
            .get_mut(handle.0)
            .filter(|e| !e.removed)
            .ok_or(FileError::InvalidHandle(handle.0))
    }

    fn open_file_mut(&mut self, handle: FileHandle) -> FileResult<&mut File> {
        self.entry_mut(handle)?
            .file
            .as_mut()
            .ok_or(FileError::InvalidHandle(handle.0))
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn open_new(manager: &mut PagedFileManager, path: &Path) -> FileHandle {
        manager.create_file(path).unwrap();
        let handle = manager.register(path).unwrap();
        manager.open(handle).unwrap();
        handle
    }

    #[test]
    fn test_create_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("nested").join("test.db");
        let mut manager = PagedFileManager::new();

        assert!(manager.create_file(&test_file).is_ok());
        assert!(test_file.exists());
    }

    #[test]
    fn test_create_file_already_exists() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let result = manager.create_file(&test_file);
        assert!(matches!(result, Err(FileError::FileAlreadyExists(_))));
    }

    #[test]
    fn test_open_close_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        let handle = open_new(&mut manager, &test_file);
        assert!(manager.is_file_open(handle));

        manager.close(handle).unwrap();
        assert!(!manager.is_file_open(handle));

        // Handles survive a close and can be reopened
        manager.open(handle).unwrap();
        assert!(manager.is_file_open(handle));
    }

    #[test]
    fn test_register_nonexistent_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("nonexistent.db");
        let mut manager = PagedFileManager::new();

        let result = manager.register(&test_file);
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }

    #[test]
    fn test_register_same_file_twice() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let handle1 = manager.register(&test_file).unwrap();
        let handle2 = manager.register(&test_file).unwrap();

        assert_eq!(handle1, handle2);
        assert_eq!(manager.handle_of(&test_file), Some(handle1));
    }

    #[test]
    fn test_read_write_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();
        let handle = open_new(&mut manager, &test_file);

        let mut write_buffer = vec![0u8; PAGE_SIZE];
        write_buffer[0] = 42;
        write_buffer[100] = 99;
        write_buffer[PAGE_SIZE - 1] = 255;

        manager.write_page(handle, 0, &write_buffer).unwrap();

        let mut read_buffer = vec![0u8; PAGE_SIZE];
        manager.read_page(handle, 0, &mut read_buffer).unwrap();

        assert_eq!(read_buffer, write_buffer);
    }

    #[test]
    fn test_read_nonexistent_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();
        let handle = open_new(&mut manager, &test_file);

        let mut buffer = vec![7u8; PAGE_SIZE];
        manager.read_page(handle, 100, &mut buffer).unwrap();
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_get_page_count() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();
        let handle = open_new(&mut manager, &test_file);

        assert_eq!(manager.get_page_count(handle).unwrap(), 0);

        let buffer = vec![0u8; PAGE_SIZE];
        manager.write_page(handle, 0, &buffer).unwrap();
        assert_eq!(manager.get_page_count(handle).unwrap(), 1);

        manager.write_page(handle, 5, &buffer).unwrap();
        assert_eq!(manager.get_page_count(handle).unwrap(), 6);
    }

    #[test]
    fn test_remove_open_file_invalidates_handle() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();
        let handle = open_new(&mut manager, &test_file);

        manager.remove_file(&test_file).unwrap();
        assert!(!test_file.exists());
        assert!(!manager.is_file_open(handle));
        assert!(matches!(
            manager.open(handle),
            Err(FileError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_invalid_buffer_size() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let mut manager = PagedFileManager::new();
        let handle = open_new(&mut manager, &test_file);

        let mut small_buffer = vec![0u8; PAGE_SIZE - 1];
        let result = manager.read_page(handle, 0, &mut small_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));

        let large_buffer = vec![0u8; PAGE_SIZE + 1];
        let result = manager.write_page(handle, 0, &large_buffer);
        assert!(matches!(result, Err(FileError::InvalidPageSize { .. })));
    }
}

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::error::{BufferError, BufferResult};
use super::{PAGE_SIZE, PageId};

/// Page-granular I/O over a single backing file.
///
/// Pages live at `page_id * PAGE_SIZE`. Ids are handed out by
/// `allocate_page` and recycled through a free list; the file is extended
/// lazily on first write of a new page.
pub struct DiskManager {
    file: File,
    /// High-water mark: ids below this have been allocated at some point
    page_count: PageId,
    /// Deallocated ids available for reuse
    free_pages: Vec<PageId>,
}

impl DiskManager {
    /// Open a page file, creating it if it does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> BufferResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let page_count = file_size.div_ceil(PAGE_SIZE as u64) as PageId;

        Ok(Self {
            file,
            page_count,
            free_pages: Vec::new(),
        })
    }

    /// Hand out a page id, reusing a deallocated one if available
    pub fn allocate_page(&mut self) -> PageId {
        if let Some(page_id) = self.free_pages.pop() {
            return page_id;
        }
        let page_id = self.page_count;
        self.page_count += 1;
        page_id
    }

    /// Return a page id to the free list
    pub fn deallocate_page(&mut self, page_id: PageId) -> BufferResult<()> {
        if page_id >= self.page_count {
            return Err(BufferError::PageNotFound(page_id));
        }
        if !self.free_pages.contains(&page_id) {
            self.free_pages.push(page_id);
        }
        Ok(())
    }

    /// Read a page into the provided buffer
    pub fn read_page(&mut self, page_id: PageId, buffer: &mut [u8]) -> BufferResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(BufferError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        if page_id >= self.page_count {
            return Err(BufferError::PageNotFound(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let bytes_read = self.file.read(&mut buffer[..])?;

        // An allocated but never-written page reads short; the rest is zeros
        if bytes_read < PAGE_SIZE {
            buffer[bytes_read..].fill(0);
        }

        Ok(())
    }

    /// Write a page, extending the file if necessary
    pub fn write_page(&mut self, page_id: PageId, buffer: &[u8]) -> BufferResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(BufferError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let required_size = offset + PAGE_SIZE as u64;

        let current_size = self.file.metadata()?.len();
        if current_size < required_size {
            self.file.set_len(required_size)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buffer)?;
        // No sync per write - the OS batches; sync() is called by flush paths

        Ok(())
    }

    /// Number of page ids handed out so far (including freed ones)
    pub fn page_count(&self) -> PageId {
        self.page_count
    }

    /// Flush all OS buffers for the backing file
    pub fn sync(&mut self) -> BufferResult<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DiskManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let disk = DiskManager::open(temp_dir.path().join("test.db")).unwrap();
        (temp_dir, disk)
    }

    #[test]
    fn test_allocate_sequential() {
        let (_dir, mut disk) = setup();
        assert_eq!(disk.allocate_page(), 0);
        assert_eq!(disk.allocate_page(), 1);
        assert_eq!(disk.allocate_page(), 2);
        assert_eq!(disk.page_count(), 3);
    }

    #[test]
    fn test_read_write_page() {
        let (_dir, mut disk) = setup();
        let page_id = disk.allocate_page();

        let mut write_buffer = vec![0u8; PAGE_SIZE];
        write_buffer[0] = 42;
        write_buffer[PAGE_SIZE - 1] = 255;
        disk.write_page(page_id, &write_buffer).unwrap();

        let mut read_buffer = vec![0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut read_buffer).unwrap();
        assert_eq!(read_buffer, write_buffer);
    }

    #[test]
    fn test_read_unallocated_page() {
        let (_dir, mut disk) = setup();
        let mut buffer = vec![0u8; PAGE_SIZE];
        let result = disk.read_page(7, &mut buffer);
        assert!(matches!(result, Err(BufferError::PageNotFound(7))));
    }

    #[test]
    fn test_read_allocated_but_unwritten() {
        let (_dir, mut disk) = setup();
        let p0 = disk.allocate_page();
        let p1 = disk.allocate_page();

        // Writing p1 extends the file past p0 without touching it
        let buffer = vec![7u8; PAGE_SIZE];
        disk.write_page(p1, &buffer).unwrap();

        let mut read_buffer = vec![1u8; PAGE_SIZE];
        disk.read_page(p0, &mut read_buffer).unwrap();
        assert!(read_buffer.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_deallocate_and_reuse() {
        let (_dir, mut disk) = setup();
        let p0 = disk.allocate_page();
        let p1 = disk.allocate_page();

        disk.deallocate_page(p0).unwrap();
        assert_eq!(disk.allocate_page(), p0);
        assert_eq!(disk.allocate_page(), p1 + 1);
    }

    #[test]
    fn test_deallocate_out_of_range() {
        let (_dir, mut disk) = setup();
        assert!(matches!(
            disk.deallocate_page(3),
            Err(BufferError::PageNotFound(3))
        ));
    }

    #[test]
    fn test_invalid_buffer_size() {
        let (_dir, mut disk) = setup();
        disk.allocate_page();

        let mut small = vec![0u8; PAGE_SIZE - 1];
        assert!(matches!(
            disk.read_page(0, &mut small),
            Err(BufferError::InvalidPageSize { .. })
        ));

        let large = vec![0u8; PAGE_SIZE + 1];
        assert!(matches!(
            disk.write_page(0, &large),
            Err(BufferError::InvalidPageSize { .. })
        ));
    }

    #[test]
    fn test_reopen_preserves_page_count() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("test.db");

        {
            let mut disk = DiskManager::open(&path).unwrap();
            for _ in 0..4 {
                disk.allocate_page();
            }
            disk.write_page(3, &vec![9u8; PAGE_SIZE]).unwrap();
            disk.sync().unwrap();
        }

        let disk = DiskManager::open(&path).unwrap();
        assert_eq!(disk.page_count(), 4);
    }
}

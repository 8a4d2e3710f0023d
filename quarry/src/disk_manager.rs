use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{PageBuf, PageId, PAGE_SIZE};

thread_local! {
    static FORCED_IO_FAILURES: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Test hook: make the named operation (`read_page` or `write_page`) fail
/// on this thread until cleared. The `QUARRY_FAILPOINTS` environment
/// variable (comma separated) forces failures process-wide.
pub fn force_io_failure(op: &str) {
    FORCED_IO_FAILURES.with(|set| {
        set.borrow_mut().insert(op.to_string());
    });
}

pub fn clear_io_failures() {
    FORCED_IO_FAILURES.with(|set| set.borrow_mut().clear());
}

fn maybe_fail(op: &str) -> io::Result<()> {
    let forced = FORCED_IO_FAILURES.with(|set| set.borrow().contains(op))
        || std::env::var("QUARRY_FAILPOINTS")
            .is_ok_and(|raw| raw.split(',').any(|v| v.trim() == op));
    if forced {
        return Err(io::Error::other(format!("forced {op} failure")));
    }
    Ok(())
}

/// The file-backed page store. One file, addressed in page-sized units.
pub struct DiskManager {
    file: File,
    pub num_pages: u32,
}

impl DiskManager {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path_ref = path.as_ref();
        crate::quarry_debug_log!("[DiskManager::open] Opening database file at: {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;
        crate::quarry_debug_log!(
            "[DiskManager::open] File size: {file_size}, initial num_pages: {num_pages}"
        );

        Ok(Self { file, num_pages })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut PageBuf) -> io::Result<()> {
        maybe_fail("read_page")?;
        if page_id < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("read of invalid page id {page_id}"),
            ));
        }
        crate::quarry_debug_log!("[DiskManager::read_page] Reading page_id: {page_id}");
        if page_id as u32 >= self.num_pages {
            // Reading past the end of the file yields a fresh zeroed page.
            buf.fill(0);
            return Ok(());
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let bytes_read = self.file.read(buf)?;
        if bytes_read < PAGE_SIZE {
            crate::quarry_debug_log!(
                "[DiskManager::read_page] Read {bytes_read} bytes (less than page size), zeroing rest."
            );
            buf[bytes_read..].fill(0);
        }

        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, buf: &PageBuf) -> io::Result<()> {
        maybe_fail("write_page")?;
        if page_id < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of invalid page id {page_id}"),
            ));
        }
        crate::quarry_debug_log!("[DiskManager::write_page] Writing page_id: {page_id}");
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        self.file.sync_all()?;
        if page_id as u32 >= self.num_pages {
            self.num_pages = page_id as u32 + 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_a_page_through_the_file() {
        let temp_dir = tempdir().unwrap();
        let temp_path = temp_dir.path().join("test.db");

        let mut disk = DiskManager::open(&temp_path).unwrap();
        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xab;
        page[PAGE_SIZE - 1] = 0xcd;
        disk.write_page(3, &page).unwrap();
        assert_eq!(disk.num_pages, 4);

        drop(disk);
        let mut disk = DiskManager::open(&temp_path).unwrap();
        let mut out = [0xffu8; PAGE_SIZE];
        disk.read_page(3, &mut out).unwrap();
        assert_eq!(out[0], 0xab);
        assert_eq!(out[PAGE_SIZE - 1], 0xcd);
        assert_eq!(out[1], 0);
    }

    #[test]
    fn read_past_end_of_file_returns_zeroed_page() {
        let temp_dir = tempdir().unwrap();
        let mut disk = DiskManager::open(temp_dir.path().join("test.db")).unwrap();

        let mut out = [0x77u8; PAGE_SIZE];
        disk.read_page(12, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn rejects_negative_page_ids() {
        let temp_dir = tempdir().unwrap();
        let mut disk = DiskManager::open(temp_dir.path().join("test.db")).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        assert!(disk.read_page(-1, &mut buf).is_err());
        assert!(disk.write_page(-1, &buf).is_err());
    }

    #[test]
    fn forced_failures_surface_as_io_errors() {
        let temp_dir = tempdir().unwrap();
        let mut disk = DiskManager::open(temp_dir.path().join("test.db")).unwrap();
        let buf = [0u8; PAGE_SIZE];

        clear_io_failures();
        force_io_failure("write_page");
        assert!(disk.write_page(0, &buf).is_err());
        clear_io_failures();
        assert!(disk.write_page(0, &buf).is_ok());

        force_io_failure("read_page");
        let mut out = [0u8; PAGE_SIZE];
        assert!(disk.read_page(0, &mut out).is_err());
        clear_io_failures();
        assert!(disk.read_page(0, &mut out).is_ok());
    }
}

//! RAII guards over pinned buffer pool frames.
//!
//! A `BasicPageGuard` holds only a pin. `ReadPageGuard` and `WritePageGuard`
//! additionally hold the page's shared or exclusive latch for their whole
//! lifetime. Dropping any guard releases the latch (if held) before the pin.
//! Guards are move-only; a moved-from guard is gone, not dangling.

use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer_pool::BufferPoolManager;
use crate::{FrameId, PageBuf, PageId};

type FrameLatchRead = ArcRwLockReadGuard<RawRwLock, PageBuf>;
type FrameLatchWrite = ArcRwLockWriteGuard<RawRwLock, PageBuf>;

/// A pinned page with no latch held. Short-term access goes through
/// [`read`](BasicPageGuard::read) / [`write`](BasicPageGuard::write);
/// upgrading consumes the guard and keeps the pin.
pub struct BasicPageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    frame_id: FrameId,
    data: Arc<RwLock<PageBuf>>,
}

impl BasicPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, frame_id: FrameId) -> Self {
        let data = bpm.frame_data(frame_id);
        Self {
            bpm,
            page_id,
            frame_id,
            data,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Latches the page shared for the duration of the returned borrow.
    pub fn read(&self) -> RwLockReadGuard<'_, PageBuf> {
        self.data.read()
    }

    /// Latches the page exclusive for the duration of the returned borrow
    /// and marks the frame dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, PageBuf> {
        self.bpm.mark_dirty(self.frame_id);
        self.data.write()
    }

    /// Trades the bare pin for a pin plus a held shared latch.
    pub fn upgrade_read(self) -> ReadPageGuard {
        let latch = self.data.read_arc();
        ReadPageGuard {
            latch: Some(latch),
            base: self,
        }
    }

    /// Trades the bare pin for a pin plus a held exclusive latch.
    pub fn upgrade_write(self) -> WritePageGuard {
        self.bpm.mark_dirty(self.frame_id);
        let latch = self.data.write_arc();
        WritePageGuard {
            latch: Some(latch),
            base: self,
        }
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, false);
    }
}

/// A pinned page whose shared latch is held until the guard drops.
pub struct ReadPageGuard {
    // Declared before `base`: the latch must release before the pin does.
    latch: Option<FrameLatchRead>,
    base: BasicPageGuard,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &PageBuf {
        self.latch.as_ref().expect("read guard holds its latch")
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.latch.take();
    }
}

/// A pinned page whose exclusive latch is held until the guard drops.
pub struct WritePageGuard {
    latch: Option<FrameLatchWrite>,
    base: BasicPageGuard,
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.base.page_id
    }

    pub fn data(&self) -> &PageBuf {
        self.latch.as_ref().expect("write guard holds its latch")
    }

    pub fn data_mut(&mut self) -> &mut PageBuf {
        self.base.bpm.mark_dirty(self.base.frame_id);
        self.latch.as_mut().expect("write guard holds its latch")
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.latch.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_manager::DiskManager;
    use crate::AccessType;
    use tempfile::tempdir;

    fn test_bpm() -> (tempfile::TempDir, Arc<BufferPoolManager>) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
        (dir, Arc::new(BufferPoolManager::new(4, disk, 2)))
    }

    #[test]
    fn dropping_a_guard_unpins_the_page() {
        let (_dir, bpm) = test_bpm();
        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        drop(guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn upgrading_keeps_exactly_one_pin() {
        let (_dir, bpm) = test_bpm();
        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();

        let read_guard = guard.upgrade_read();
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        drop(read_guard);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }

    #[test]
    fn multiple_readers_share_the_latch() {
        let (_dir, bpm) = test_bpm();
        let page_id = bpm.new_page().unwrap().page_id();

        let r1 = bpm.fetch_page_read(page_id, AccessType::Unknown).unwrap();
        let r2 = bpm.fetch_page_read(page_id, AccessType::Unknown).unwrap();
        assert_eq!(r1.data()[0], r2.data()[0]);
        assert_eq!(bpm.get_pin_count(page_id), Some(2));
    }

    #[test]
    fn writes_through_a_guard_are_visible_to_later_reads() {
        let (_dir, bpm) = test_bpm();
        let page_id = {
            let mut guard = bpm
                .new_page()
                .unwrap()
                .upgrade_write();
            guard.data_mut()[7] = 0x31;
            guard.page_id()
        };
        let guard = bpm.fetch_page_read(page_id, AccessType::Unknown).unwrap();
        assert_eq!(guard.data()[7], 0x31);
    }

    #[test]
    fn moving_a_guard_transfers_ownership() {
        let (_dir, bpm) = test_bpm();
        let guard = bpm.new_page().unwrap();
        let page_id = guard.page_id();

        let moved = guard;
        assert_eq!(bpm.get_pin_count(page_id), Some(1));
        drop(moved);
        assert_eq!(bpm.get_pin_count(page_id), Some(0));
    }
}

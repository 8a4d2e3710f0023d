//! Manages the buffer pool, a fixed set of in-memory frames caching disk pages.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

use parking_lot::RwLock;

use crate::disk_manager::DiskManager;
use crate::disk_scheduler::{DiskRequest, DiskScheduler};
use crate::page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use crate::replacer::LruKReplacer;
use crate::{AccessType, FrameId, PageBuf, PageId, StorageError, INVALID_PAGE_ID, PAGE_SIZE};

/// A single frame in the buffer pool. The page contents sit behind their own
/// reader/writer latch; bookkeeping sits behind a separate mutex so latching
/// a page never contends with pin accounting.
pub(crate) struct Frame {
    pub(crate) data: Arc<RwLock<PageBuf>>,
    meta: Mutex<FrameMeta>,
}

struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

/// The frame mapping state, all behind one latch.
struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

pub struct BufferPoolManager {
    frames: Vec<Frame>,
    inner: Mutex<PoolInner>,
    replacer: LruKReplacer,
    scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk: DiskManager, replacer_k: usize) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Frame {
                data: Arc::new(RwLock::new([0; PAGE_SIZE])),
                meta: Mutex::new(FrameMeta {
                    page_id: INVALID_PAGE_ID,
                    pin_count: 0,
                    is_dirty: false,
                }),
            });
            free_list.push_back(i);
        }
        Self {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                next_page_id: 0,
            }),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            scheduler: DiskScheduler::new(disk),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Allocates a fresh page id and pins it into a frame. The new page
    /// starts zeroed and dirty.
    pub fn new_page(self: &Arc<Self>) -> Result<BasicPageGuard, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let frame_id = self.acquire_frame(&mut inner)?;
        let page_id = inner.next_page_id;
        inner.next_page_id += 1;
        inner.page_table.insert(page_id, frame_id);

        self.frames[frame_id].data.write().fill(0);
        {
            let mut meta = self.frames[frame_id].meta.lock().unwrap();
            meta.page_id = page_id;
            meta.pin_count = 1;
            meta.is_dirty = true;
        }
        self.replacer.record_access(frame_id, AccessType::Unknown);
        self.replacer.set_evictable(frame_id, false);
        crate::quarry_debug_log!("[BPM::new_page] page {page_id} in frame {frame_id}");
        Ok(BasicPageGuard::new(self.clone(), page_id, frame_id))
    }

    /// Pins the page into a frame, reading it from disk on a miss.
    pub fn fetch_page_basic(
        self: &Arc<Self>,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<BasicPageGuard, StorageError> {
        if page_id == INVALID_PAGE_ID || page_id < 0 {
            return Err(StorageError::PageInvalid(page_id));
        }
        let mut inner = self.inner.lock().unwrap();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let mut meta = self.frames[frame_id].meta.lock().unwrap();
            meta.pin_count += 1;
            drop(meta);
            self.replacer.record_access(frame_id, access_type);
            self.replacer.set_evictable(frame_id, false);
            return Ok(BasicPageGuard::new(self.clone(), page_id, frame_id));
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let (done_tx, done_rx) = DiskScheduler::create_promise();
        self.scheduler.schedule(DiskRequest {
            is_write: false,
            data: self.frames[frame_id].data.clone(),
            page_id,
            done: done_tx,
        });
        if !done_rx.recv().unwrap_or(false) {
            // Put the frame back; nothing references it yet.
            inner.free_list.push_back(frame_id);
            return Err(StorageError::DiskIo(io::Error::other(format!(
                "read of page {page_id} failed"
            ))));
        }

        inner.page_table.insert(page_id, frame_id);
        {
            let mut meta = self.frames[frame_id].meta.lock().unwrap();
            meta.page_id = page_id;
            meta.pin_count = 1;
            meta.is_dirty = false;
        }
        self.replacer.record_access(frame_id, access_type);
        self.replacer.set_evictable(frame_id, false);
        crate::quarry_debug_log!("[BPM::fetch_page] miss: page {page_id} into frame {frame_id}");
        Ok(BasicPageGuard::new(self.clone(), page_id, frame_id))
    }

    pub fn fetch_page_read(
        self: &Arc<Self>,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<ReadPageGuard, StorageError> {
        Ok(self.fetch_page_basic(page_id, access_type)?.upgrade_read())
    }

    pub fn fetch_page_write(
        self: &Arc<Self>,
        page_id: PageId,
        access_type: AccessType,
    ) -> Result<WritePageGuard, StorageError> {
        Ok(self.fetch_page_basic(page_id, access_type)?.upgrade_write())
    }

    /// Drops one pin. The dirty flag only ever accumulates here. Returns
    /// false on a page that is unknown or already unpinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let mut meta = self.frames[frame_id].meta.lock().unwrap();
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes the page out regardless of its dirty flag, then clears it.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), StorageError> {
        let inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Err(StorageError::PageInvalid(page_id));
        };
        self.write_frame(frame_id, page_id)?;
        self.frames[frame_id].meta.lock().unwrap().is_dirty = false;
        Ok(())
    }

    /// Issues writes for every resident page concurrently, then waits for
    /// all of them.
    pub fn flush_all_pages(&self) -> Result<(), StorageError> {
        let inner = self.inner.lock().unwrap();
        let mut pending = Vec::new();
        for (&page_id, &frame_id) in inner.page_table.iter() {
            let (done_tx, done_rx) = DiskScheduler::create_promise();
            self.scheduler.schedule(DiskRequest {
                is_write: true,
                data: self.frames[frame_id].data.clone(),
                page_id,
                done: done_tx,
            });
            pending.push((page_id, frame_id, done_rx));
        }
        for (page_id, frame_id, done_rx) in pending {
            if !done_rx.recv().unwrap_or(false) {
                return Err(StorageError::DiskIo(io::Error::other(format!(
                    "flush of page {page_id} failed"
                ))));
            }
            self.frames[frame_id].meta.lock().unwrap().is_dirty = false;
        }
        Ok(())
    }

    /// Frees the frame holding `page_id`. Only legal while nothing pins the
    /// page; returns false if it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        {
            let meta = self.frames[frame_id].meta.lock().unwrap();
            if meta.pin_count > 0 {
                return Ok(false);
            }
        }
        self.replacer.remove(frame_id);
        inner.page_table.remove(&page_id);
        {
            let mut meta = self.frames[frame_id].meta.lock().unwrap();
            meta.page_id = INVALID_PAGE_ID;
            meta.pin_count = 0;
            meta.is_dirty = false;
        }
        inner.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Pin count of a resident page; None when not resident. Test hook.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock().unwrap();
        let &frame_id = inner.page_table.get(&page_id)?;
        Some(self.frames[frame_id].meta.lock().unwrap().pin_count)
    }

    pub(crate) fn frame_data(&self, frame_id: FrameId) -> Arc<RwLock<PageBuf>> {
        self.frames[frame_id].data.clone()
    }

    pub(crate) fn mark_dirty(&self, frame_id: FrameId) {
        self.frames[frame_id].meta.lock().unwrap().is_dirty = true;
    }

    /// Finds a frame to hold a page: free list first, then eviction. A dirty
    /// victim is written back before the frame is reused.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, StorageError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Err(StorageError::BufferExhausted);
        };
        let (old_page_id, was_dirty) = {
            let meta = self.frames[frame_id].meta.lock().unwrap();
            (meta.page_id, meta.is_dirty)
        };
        if was_dirty {
            crate::quarry_debug_log!(
                "[BPM::acquire_frame] writing back dirty page {old_page_id} from frame {frame_id}"
            );
            self.write_frame(frame_id, old_page_id)?;
        }
        inner.page_table.remove(&old_page_id);
        {
            let mut meta = self.frames[frame_id].meta.lock().unwrap();
            meta.page_id = INVALID_PAGE_ID;
            meta.pin_count = 0;
            meta.is_dirty = false;
        }
        Ok(frame_id)
    }

    fn write_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<(), StorageError> {
        let (done_tx, done_rx) = DiskScheduler::create_promise();
        self.scheduler.schedule(DiskRequest {
            is_write: true,
            data: self.frames[frame_id].data.clone(),
            page_id,
            done: done_tx,
        });
        if !done_rx.recv().unwrap_or(false) {
            return Err(StorageError::DiskIo(io::Error::other(format!(
                "write of page {page_id} failed"
            ))));
        }
        Ok(())
    }
}

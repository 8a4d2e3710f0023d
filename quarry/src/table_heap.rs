//! The row store: a chain of slotted heap pages over the buffer pool.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::buffer_pool::BufferPoolManager;
use crate::heap_page::{
    HeapPage, HeapPageMut, TupleMeta, HEAP_PAGE_HEADER_SIZE, SLOT_SIZE, TUPLE_META_SIZE,
};
use crate::{AccessType, PageId, Rid, StorageError, INVALID_PAGE_ID, PAGE_SIZE};

pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Result<Self, StorageError> {
        let guard = bpm.new_page()?;
        let first_page_id = guard.page_id();
        HeapPageMut::new(&mut guard.write()).init(INVALID_PAGE_ID);
        drop(guard);
        Ok(Self {
            bpm,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Appends a tuple to the last page, chaining a fresh page when full.
    pub fn insert_tuple(&self, meta: TupleMeta, data: &[u8]) -> Result<Rid, StorageError> {
        let limit = PAGE_SIZE - HEAP_PAGE_HEADER_SIZE - SLOT_SIZE - TUPLE_META_SIZE;
        if data.len() > limit {
            return Err(StorageError::TupleTooLarge {
                size: data.len(),
                limit,
            });
        }

        let mut last_page_id = self.last_page_id.lock().unwrap();
        loop {
            let mut guard = self
                .bpm
                .fetch_page_write(*last_page_id, AccessType::Unknown)?;
            let mut page = HeapPageMut::new(guard.data_mut());
            if let Some(slot) = page.insert_tuple(meta, data) {
                return Ok(Rid::new(*last_page_id, slot));
            }

            // Current last page is full: allocate the next link in the chain.
            let new_guard = self.bpm.new_page()?;
            let new_page_id = new_guard.page_id();
            HeapPageMut::new(&mut new_guard.write()).init(INVALID_PAGE_ID);
            page.set_next_page_id(new_page_id);
            crate::quarry_debug_log!(
                "[TableHeap::insert_tuple] chained page {new_page_id} after {}",
                *last_page_id
            );
            *last_page_id = new_page_id;
        }
    }

    pub fn get_tuple(&self, rid: Rid) -> Result<(TupleMeta, Bytes), StorageError> {
        let guard = self.bpm.fetch_page_read(rid.page_id, AccessType::Unknown)?;
        let page = HeapPage::new(guard.data());
        let (meta, payload) = page
            .get_tuple(rid.slot)
            .ok_or(StorageError::PageInvalid(rid.page_id))?;
        Ok((meta, Bytes::copy_from_slice(payload)))
    }

    pub fn get_tuple_meta(&self, rid: Rid) -> Result<TupleMeta, StorageError> {
        let guard = self.bpm.fetch_page_read(rid.page_id, AccessType::Unknown)?;
        let page = HeapPage::new(guard.data());
        page.get_tuple_meta(rid.slot)
            .ok_or(StorageError::PageInvalid(rid.page_id))
    }

    pub fn update_tuple_meta(&self, meta: TupleMeta, rid: Rid) -> Result<(), StorageError> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id, AccessType::Unknown)?;
        let mut page = HeapPageMut::new(guard.data_mut());
        if !page.update_tuple_meta(rid.slot, meta) {
            return Err(StorageError::PageInvalid(rid.page_id));
        }
        Ok(())
    }

    /// Rewrites a tuple's bytes in its existing slot; the payload may not
    /// outgrow the slot's reserved extent.
    pub fn update_tuple_in_place(
        &self,
        meta: TupleMeta,
        data: &[u8],
        rid: Rid,
    ) -> Result<(), StorageError> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id, AccessType::Unknown)?;
        let mut page = HeapPageMut::new(guard.data_mut());
        if !page.update_tuple_in_place(rid.slot, meta, data) {
            return Err(StorageError::TupleTooLarge {
                size: data.len(),
                limit: 0,
            });
        }
        Ok(())
    }

    /// An iterator pinned to the table's extent at creation time: tuples
    /// appended to the last page afterwards are not yielded.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        let stop_page_id = *self.last_page_id.lock().unwrap();
        let stop_slot = {
            match self.bpm.fetch_page_read(stop_page_id, AccessType::Scan) {
                Ok(guard) => HeapPage::new(guard.data()).tuple_count(),
                Err(_) => 0,
            }
        };
        TableIterator {
            heap: self.clone(),
            page_id: self.first_page_id,
            slot: 0,
            stop_page_id,
            stop_slot,
        }
    }
}

/// Yields `(meta, tuple bytes, rid)` in page-then-slot order, including
/// deleted tuples; visibility is the caller's concern.
pub struct TableIterator {
    heap: Arc<TableHeap>,
    page_id: PageId,
    slot: u16,
    stop_page_id: PageId,
    stop_slot: u16,
}

impl Iterator for TableIterator {
    type Item = (TupleMeta, Bytes, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }
            if self.page_id == self.stop_page_id && self.slot >= self.stop_slot {
                return None;
            }

            let guard = self
                .heap
                .bpm
                .fetch_page_read(self.page_id, AccessType::Scan)
                .ok()?;
            let page = HeapPage::new(guard.data());

            if self.slot >= page.tuple_count() {
                self.page_id = page.next_page_id();
                self.slot = 0;
                continue;
            }

            let slot = self.slot;
            self.slot += 1;
            if let Some((meta, payload)) = page.get_tuple(slot) {
                let rid = Rid::new(self.page_id, slot);
                return Some((meta, Bytes::copy_from_slice(payload), rid));
            }
        }
    }
}

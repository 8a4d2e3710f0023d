//! Slotted heap page layout.
//!
//! Layout: an 8-byte header, a slot array growing down from the header, and
//! tuple payloads growing up from the end of the page. Each payload starts
//! with the tuple's metadata followed by its raw bytes.

use crate::{PageBuf, PageId, PAGE_SIZE};

pub const HEAP_PAGE_HEADER_SIZE: usize = 8;
pub const SLOT_SIZE: usize = 6;
/// Serialized `TupleMeta`: ts (8 bytes) + flags (2 bytes).
pub const TUPLE_META_SIZE: usize = 10;

const FLAG_DELETED: u16 = 1;

/// Per-tuple metadata stored in front of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    /// Commit timestamp, or the writing transaction's id while in flight.
    pub ts: u64,
    pub is_deleted: bool,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct HeapPageHeader {
    next_page_id: PageId,
    lower_offset: u16,
    upper_offset: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct SlotData {
    offset: u16,
    len: u16,
    /// Bytes reserved at `offset`. In-place updates may shrink `len` and
    /// grow it back, but never past the reserved extent.
    capacity: u16,
}

fn read_header(data: &PageBuf) -> HeapPageHeader {
    unsafe { std::ptr::read_unaligned(data.as_ptr() as *const HeapPageHeader) }
}

fn write_header(data: &mut PageBuf, header: &HeapPageHeader) {
    unsafe {
        std::ptr::write_unaligned(data.as_mut_ptr() as *mut HeapPageHeader, *header);
    }
}

fn read_slot(data: &PageBuf, slot: u16) -> SlotData {
    let offset = HEAP_PAGE_HEADER_SIZE + slot as usize * SLOT_SIZE;
    unsafe { std::ptr::read_unaligned(data.as_ptr().add(offset) as *const SlotData) }
}

fn write_slot(data: &mut PageBuf, slot: u16, slot_data: &SlotData) {
    let offset = HEAP_PAGE_HEADER_SIZE + slot as usize * SLOT_SIZE;
    unsafe {
        std::ptr::write_unaligned(data.as_mut_ptr().add(offset) as *mut SlotData, *slot_data);
    }
}

fn tuple_count(data: &PageBuf) -> u16 {
    let lower = read_header(data).lower_offset as usize;
    if lower < HEAP_PAGE_HEADER_SIZE {
        return 0;
    }
    ((lower - HEAP_PAGE_HEADER_SIZE) / SLOT_SIZE) as u16
}

fn slot_data_checked(data: &PageBuf, slot: u16) -> Option<SlotData> {
    if slot >= tuple_count(data) {
        return None;
    }
    let slot_data = read_slot(data, slot);
    if (slot_data.len as usize) < TUPLE_META_SIZE
        || slot_data.offset as usize + slot_data.len as usize > PAGE_SIZE
    {
        return None;
    }
    Some(slot_data)
}

fn read_meta(data: &PageBuf, offset: usize) -> TupleMeta {
    let ts = u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap());
    let flags = u16::from_le_bytes(data[offset + 8..offset + 10].try_into().unwrap());
    TupleMeta {
        ts,
        is_deleted: flags & FLAG_DELETED != 0,
    }
}

fn write_meta(data: &mut PageBuf, offset: usize, meta: TupleMeta) {
    data[offset..offset + 8].copy_from_slice(&meta.ts.to_le_bytes());
    let flags: u16 = if meta.is_deleted { FLAG_DELETED } else { 0 };
    data[offset + 8..offset + 10].copy_from_slice(&flags.to_le_bytes());
}

/// Read-only view over a heap page buffer.
pub struct HeapPage<'a> {
    data: &'a PageBuf,
}

impl<'a> HeapPage<'a> {
    pub fn new(data: &'a PageBuf) -> Self {
        Self { data }
    }

    pub fn next_page_id(&self) -> PageId {
        read_header(self.data).next_page_id
    }

    pub fn tuple_count(&self) -> u16 {
        tuple_count(self.data)
    }

    pub fn get_tuple_meta(&self, slot: u16) -> Option<TupleMeta> {
        let slot_data = slot_data_checked(self.data, slot)?;
        Some(read_meta(self.data, slot_data.offset as usize))
    }

    pub fn get_tuple(&self, slot: u16) -> Option<(TupleMeta, &'a [u8])> {
        let slot_data = slot_data_checked(self.data, slot)?;
        let offset = slot_data.offset as usize;
        let meta = read_meta(self.data, offset);
        let payload = &self.data[offset + TUPLE_META_SIZE..offset + slot_data.len as usize];
        Some((meta, payload))
    }
}

/// Mutable view over a heap page buffer.
pub struct HeapPageMut<'a> {
    data: &'a mut PageBuf,
}

impl<'a> HeapPageMut<'a> {
    pub fn new(data: &'a mut PageBuf) -> Self {
        Self { data }
    }

    pub fn init(&mut self, next_page_id: PageId) {
        write_header(
            self.data,
            &HeapPageHeader {
                next_page_id,
                lower_offset: HEAP_PAGE_HEADER_SIZE as u16,
                upper_offset: PAGE_SIZE as u16,
            },
        );
    }

    pub fn next_page_id(&self) -> PageId {
        read_header(self.data).next_page_id
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        let mut header = read_header(self.data);
        header.next_page_id = next_page_id;
        write_header(self.data, &header);
    }

    pub fn tuple_count(&self) -> u16 {
        tuple_count(self.data)
    }

    pub fn get_tuple_meta(&self, slot: u16) -> Option<TupleMeta> {
        let slot_data = slot_data_checked(self.data, slot)?;
        Some(read_meta(self.data, slot_data.offset as usize))
    }

    pub fn get_tuple(&self, slot: u16) -> Option<(TupleMeta, &[u8])> {
        let slot_data = slot_data_checked(self.data, slot)?;
        let offset = slot_data.offset as usize;
        let meta = read_meta(self.data, offset);
        let payload = &self.data[offset + TUPLE_META_SIZE..offset + slot_data.len as usize];
        Some((meta, payload))
    }

    /// Appends a tuple, returning its slot index, or None when the page
    /// lacks room for payload plus slot entry.
    pub fn insert_tuple(&mut self, meta: TupleMeta, tuple: &[u8]) -> Option<u16> {
        let total = TUPLE_META_SIZE + tuple.len();
        let needed = total + SLOT_SIZE;

        let header = read_header(self.data);
        let free = (header.upper_offset as usize).saturating_sub(header.lower_offset as usize);
        if free < needed {
            crate::quarry_debug_log!(
                "[HeapPage::insert_tuple] Not enough space: need {needed}, free {free}"
            );
            return None;
        }

        let slot = self.tuple_count();
        let tuple_offset = header.upper_offset as usize - total;
        write_slot(
            self.data,
            slot,
            &SlotData {
                offset: tuple_offset as u16,
                len: total as u16,
                capacity: total as u16,
            },
        );
        write_meta(self.data, tuple_offset, meta);
        self.data[tuple_offset + TUPLE_META_SIZE..tuple_offset + total].copy_from_slice(tuple);

        let mut header = read_header(self.data);
        header.lower_offset += SLOT_SIZE as u16;
        header.upper_offset = tuple_offset as u16;
        write_header(self.data, &header);

        Some(slot)
    }

    pub fn update_tuple_meta(&mut self, slot: u16, meta: TupleMeta) -> bool {
        let Some(slot_data) = slot_data_checked(self.data, slot) else {
            return false;
        };
        write_meta(self.data, slot_data.offset as usize, meta);
        true
    }

    /// Rewrites a tuple's payload in its existing slot. The new payload may
    /// be shorter or longer than the current one, but never larger than the
    /// slot's reserved extent.
    pub fn update_tuple_in_place(&mut self, slot: u16, meta: TupleMeta, tuple: &[u8]) -> bool {
        let Some(slot_data) = slot_data_checked(self.data, slot) else {
            return false;
        };
        let capacity = slot_data.capacity as usize - TUPLE_META_SIZE;
        if tuple.len() > capacity {
            return false;
        }
        let offset = slot_data.offset as usize;
        write_meta(self.data, offset, meta);
        self.data[offset + TUPLE_META_SIZE..offset + TUPLE_META_SIZE + tuple.len()]
            .copy_from_slice(tuple);
        write_slot(
            self.data,
            slot,
            &SlotData {
                offset: slot_data.offset,
                len: (TUPLE_META_SIZE + tuple.len()) as u16,
                capacity: slot_data.capacity,
            },
        );
        true
    }
}

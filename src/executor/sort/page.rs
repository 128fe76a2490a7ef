// Append only page
//
// Page layout:
// 4 byte: total bytes used (PAGE_HEADER_SIZE + slots + records)
// 4 byte: slot count
// 4 byte: record start offset
// Slots grow up from the header, records grow down from the end.

use std::ops::{Deref, DerefMut};

pub const PAGE_SIZE: usize = 16 * 1024;
pub const PAGE_HEADER_SIZE: usize = 12;

pub mod slot {
    pub const SLOT_SIZE: usize = 12;

    pub struct Slot {
        offset: u32,
        key_size: u32,
        val_size: u32,
    }

    impl Slot {
        pub fn from_bytes(bytes: &[u8; SLOT_SIZE]) -> Self {
            let offset = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let key_size = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            let val_size = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            Slot {
                offset,
                key_size,
                val_size,
            }
        }

        pub fn to_bytes(&self) -> [u8; SLOT_SIZE] {
            let mut bytes = [0; SLOT_SIZE];
            bytes[0..4].copy_from_slice(&self.offset.to_be_bytes());
            bytes[4..8].copy_from_slice(&self.key_size.to_be_bytes());
            bytes[8..12].copy_from_slice(&self.val_size.to_be_bytes());
            bytes
        }

        pub fn new(offset: u32, key_size: u32, val_size: u32) -> Self {
            Slot {
                offset,
                key_size,
                val_size,
            }
        }

        pub fn offset(&self) -> u32 {
            self.offset
        }

        pub fn key_size(&self) -> u32 {
            self.key_size
        }

        pub fn val_size(&self) -> u32 {
            self.val_size
        }
    }
}

use slot::*;

/// Space a single record needs on an otherwise empty page.
pub fn page_size_for(key_len: usize, val_len: usize) -> usize {
    (PAGE_HEADER_SIZE + SLOT_SIZE + key_len + val_len).max(PAGE_SIZE)
}

/// A fixed-capacity block of bytes. Ordinary pages are `PAGE_SIZE` long;
/// a record too large for that gets a page sized to fit it.
pub struct Page {
    bytes: Box<[u8]>,
}

impl Page {
    pub fn new_empty(size: usize) -> Self {
        let mut page = Page {
            bytes: vec![0; size].into_boxed_slice(),
        };
        page.init();
        page
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Deref for Page {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

pub trait AppendOnlyKVPage {
    fn init(&mut self);

    // Header operations
    fn total_bytes_used(&self) -> u32;
    fn set_total_bytes_used(&mut self, total_bytes_used: u32);
    fn total_free_space(&self) -> u32;
    fn slot_count(&self) -> u32;
    fn set_slot_count(&mut self, slot_count: u32);
    fn increment_slot_count(&mut self) {
        let slot_count = self.slot_count();
        self.set_slot_count(slot_count + 1);
    }
    fn rec_start_offset(&self) -> u32;
    fn set_rec_start_offset(&mut self, rec_start_offset: u32);

    // Helpers
    fn slot_offset(&self, slot_id: u32) -> usize {
        PAGE_HEADER_SIZE + slot_id as usize * SLOT_SIZE
    }
    fn slot(&self, slot_id: u32) -> Option<Slot>;

    // Append a slot at the end of the slots and move the record start
    // offset down to it. Only call this when the record already fits.
    fn append_slot(&mut self, slot: &Slot);

    /// Try to append a key-value to the page.
    /// If the record does not fit, return false and leave the page untouched.
    fn append(&mut self, key: &[u8], val: &[u8]) -> bool;

    /// Panics if `slot_id` is not below the slot count.
    fn get_key(&self, slot_id: u32) -> &[u8];

    /// Panics if `slot_id` is not below the slot count.
    fn get_val(&self, slot_id: u32) -> &[u8];
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl AppendOnlyKVPage for Page {
    fn init(&mut self) {
        let capacity = self.capacity() as u32;
        self.set_total_bytes_used(PAGE_HEADER_SIZE as u32);
        self.set_slot_count(0);
        self.set_rec_start_offset(capacity);
    }

    fn total_bytes_used(&self) -> u32 {
        read_u32(self, 0)
    }

    fn set_total_bytes_used(&mut self, total_bytes_used: u32) {
        self[0..4].copy_from_slice(&total_bytes_used.to_be_bytes());
    }

    fn total_free_space(&self) -> u32 {
        self.capacity() as u32 - self.total_bytes_used()
    }

    fn slot_count(&self) -> u32 {
        read_u32(self, 4)
    }

    fn set_slot_count(&mut self, slot_count: u32) {
        self[4..8].copy_from_slice(&slot_count.to_be_bytes());
    }

    fn rec_start_offset(&self) -> u32 {
        read_u32(self, 8)
    }

    fn set_rec_start_offset(&mut self, rec_start_offset: u32) {
        self[8..12].copy_from_slice(&rec_start_offset.to_be_bytes());
    }

    fn slot(&self, slot_id: u32) -> Option<Slot> {
        if slot_id < self.slot_count() {
            let offset = self.slot_offset(slot_id);
            let mut slot_bytes = [0; SLOT_SIZE];
            slot_bytes.copy_from_slice(&self[offset..offset + SLOT_SIZE]);
            Some(Slot::from_bytes(&slot_bytes))
        } else {
            None
        }
    }

    fn append_slot(&mut self, slot: &Slot) {
        let slot_id = self.slot_count();
        self.increment_slot_count();

        let slot_offset = self.slot_offset(slot_id);
        self[slot_offset..slot_offset + SLOT_SIZE].copy_from_slice(&slot.to_bytes());

        let offset = self.rec_start_offset().min(slot.offset());
        self.set_rec_start_offset(offset);
    }

    fn append(&mut self, key: &[u8], value: &[u8]) -> bool {
        let record_size = (key.len() + value.len()) as u32;
        if self.total_free_space() < SLOT_SIZE as u32 + record_size {
            return false;
        }
        let rec_start = (self.rec_start_offset() - record_size) as usize;
        self[rec_start..rec_start + key.len()].copy_from_slice(key);
        self[rec_start + key.len()..rec_start + key.len() + value.len()].copy_from_slice(value);
        let slot = Slot::new(rec_start as u32, key.len() as u32, value.len() as u32);
        self.append_slot(&slot);

        self.set_total_bytes_used(self.total_bytes_used() + SLOT_SIZE as u32 + record_size);
        true
    }

    fn get_key(&self, slot_id: u32) -> &[u8] {
        let Some(slot) = self.slot(slot_id) else {
            panic!("slot {slot_id} out of range");
        };
        let offset = slot.offset() as usize;
        &self[offset..offset + slot.key_size() as usize]
    }

    fn get_val(&self, slot_id: u32) -> &[u8] {
        let Some(slot) = self.slot(slot_id) else {
            panic!("slot {slot_id} out of range");
        };
        let offset = slot.offset() as usize + slot.key_size() as usize;
        &self[offset..offset + slot.val_size() as usize]
    }
}

/// Partition-phase buffer: an arena of pages holding encoded records, plus
/// a pointer array that gets sorted instead of the records themselves.
/// Pages survive `reset` and are reused by the next run.
pub struct SortBuffer {
    max_cases: usize,
    ptrs: Vec<(usize, u32)>, // (page index, slot id)
    data_buffer: Vec<Page>,
    current_page_idx: usize,
}

impl SortBuffer {
    pub fn new(max_cases: usize) -> Self {
        Self {
            max_cases: max_cases.max(1),
            ptrs: Vec::new(),
            data_buffer: Vec::new(),
            current_page_idx: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ptrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ptrs.is_empty()
    }

    pub fn num_pages(&self) -> usize {
        self.data_buffer.len()
    }

    pub fn reset(&mut self) {
        self.ptrs.clear();
        self.current_page_idx = 0;
        for page in &mut self.data_buffer {
            page.init();
        }
    }

    /// Appends one record. Returns false, without appending, once the
    /// buffer already holds its maximum number of cases.
    pub fn append(&mut self, key: &[u8], val: &[u8]) -> bool {
        if self.ptrs.len() >= self.max_cases {
            return false;
        }
        loop {
            if self.current_page_idx >= self.data_buffer.len() {
                self.data_buffer
                    .push(Page::new_empty(page_size_for(key.len(), val.len())));
            }
            let page = &mut self.data_buffer[self.current_page_idx];
            if page.append(key, val) {
                self.ptrs.push((self.current_page_idx, page.slot_count() - 1));
                return true;
            }
            if page.slot_count() == 0 {
                // Empty yet too small: the record needs a page of its own size.
                *page = Page::new_empty(page_size_for(key.len(), val.len()));
                continue;
            }
            self.current_page_idx += 1;
        }
    }

    pub fn sort(&mut self) {
        let pages = &self.data_buffer;
        self.ptrs.sort_by(|a, b| {
            let key_a = pages[a.0].get_key(a.1);
            let key_b = pages[b.0].get_key(b.1);
            key_a.cmp(key_b)
        });
    }

    pub fn iter(&self) -> SortBufferIter<'_> {
        SortBufferIter {
            sort_buffer: self,
            idx: 0,
        }
    }

    fn record(&self, idx: usize) -> (&[u8], &[u8]) {
        let (page_idx, slot_id) = self.ptrs[idx];
        let page = &self.data_buffer[page_idx];
        (page.get_key(slot_id), page.get_val(slot_id))
    }
}

/// Iterator for sort buffer. Output key, value by sorting order.
pub struct SortBufferIter<'a> {
    sort_buffer: &'a SortBuffer,
    idx: usize,
}

impl<'a> Iterator for SortBufferIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx < self.sort_buffer.ptrs.len() {
            let record = self.sort_buffer.record(self.idx);
            self.idx += 1;
            Some(record)
        } else {
            None
        }
    }
}

/// Owning cursor over a sorted buffer that was kept in memory. Records are
/// read in place from the pages.
pub struct SortBufferCursor {
    sort_buffer: SortBuffer,
    next: usize,
}

impl SortBufferCursor {
    pub fn new(sort_buffer: SortBuffer) -> Self {
        Self {
            sort_buffer,
            next: 0,
        }
    }

    /// Moves to the next record in sorted order. Returns false past the end.
    pub fn advance(&mut self) -> bool {
        if self.next < self.sort_buffer.len() {
            self.next += 1;
            true
        } else {
            false
        }
    }

    /// The record the last successful `advance` moved to.
    pub fn current(&self) -> (&[u8], &[u8]) {
        match self.next.checked_sub(1) {
            Some(idx) if idx < self.sort_buffer.len() => self.sort_buffer.record(idx),
            _ => (&[] as &[u8], &[] as &[u8]),
        }
    }
}

use std::{
    cmp::Ordering,
    io::Cursor,
    sync::atomic::{self, AtomicUsize},
};

use bit_vec::BitVec;

use super::{HashPage, PageCategory, PageId};
use crate::{
    hash::buffer_pool::BufferPool,
    io::{read_into, DbWriter},
    storage::{Cell, KeyComparator, RecordId},
};

/// Bytes of a single (key, value) slot.
pub const ENTRY_BYTES: usize = Cell::BYTES + RecordId::BYTES;

// category marker + the two bitmap length prefixes, with slack for the
// bitmaps rounding up to whole bytes
const BUCKET_HEADER_BYTES: usize = 10;

// 0 means "derive the slot count from the page size"
static SLOT_COUNT_OVERRIDE: AtomicUsize = AtomicUsize::new(0);

/// A fixed-capacity array of (key, value) slots.
///
/// Two bitmaps track the slot states: `occupied` is set once a slot has
/// ever held an entry and is never cleared, `readable` is the
/// authoritative membership. A slot with `occupied` set and `readable`
/// cleared is a tombstone and may be reused by later inserts.
///
/// All operations are unsynchronized; the table holds the page latch.
pub struct HashBucketPage {
    pid: PageId,

    slot_count: usize,

    occupied: BitVec,
    readable: BitVec,

    // all slots, including the ones not currently readable
    entries: Vec<(Cell, RecordId)>,
}

impl HashBucketPage {
    pub fn new(pid: PageId, bytes: &[u8]) -> Self {
        let mut reader = Cursor::new(bytes);

        let page_category: PageCategory = read_into(&mut reader);
        if page_category != PageCategory::Bucket {
            panic!("invalid page category: {:?}", page_category);
        }

        let occupied: BitVec = read_into(&mut reader);
        let readable: BitVec = read_into(&mut reader);

        let slot_count = Self::get_slot_count();
        let mut entries = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let key: Cell = read_into(&mut reader);
            let value: RecordId = read_into(&mut reader);
            entries.push((key, value));
        }

        Self {
            pid,
            slot_count,
            occupied,
            readable,
            entries,
        }
    }

    pub fn new_empty_page(pid: PageId) -> Self {
        let slot_count = Self::get_slot_count();

        Self {
            pid,
            slot_count,
            occupied: BitVec::from_elem(slot_count, false),
            readable: BitVec::from_elem(slot_count, false),
            entries: vec![(Cell::Null, RecordId::default()); slot_count],
        }
    }

    /// Slot count for the configured page size: each slot needs a fixed
    /// entry plus one occupied bit and one readable bit.
    pub fn calculate_slot_count() -> usize {
        let page_size = BufferPool::get_page_size();
        ((page_size - BUCKET_HEADER_BYTES) * 8) / (ENTRY_BYTES * 8 + 2)
    }

    pub fn get_slot_count() -> usize {
        let slot_count = SLOT_COUNT_OVERRIDE.load(atomic::Ordering::Relaxed);
        if slot_count != 0 {
            return slot_count;
        }
        Self::calculate_slot_count()
    }

    /// Override the slot count, 0 restores the page-size derived value.
    /// Small buckets make split scenarios cheap to construct in tests.
    pub fn set_slot_count(slot_count: usize) {
        SLOT_COUNT_OVERRIDE.store(slot_count, atomic::Ordering::Relaxed);
    }

    /// Collect the values of all readable slots matching the key, in
    /// slot order.
    pub fn get(&self, key: &Cell, key_comparator: &KeyComparator) -> Vec<RecordId> {
        let mut result = Vec::new();
        for i in 0..self.slot_count {
            if self.is_readable(i) && key_comparator(key, &self.entries[i].0) == Ordering::Equal {
                result.push(self.entries[i].1);
            }
        }
        result
    }

    /// Place the entry in the lowest slot that is not readable, reusing
    /// tombstones. Rejects an exact (key, value) duplicate and a full
    /// bucket with false.
    pub fn insert(&mut self, key: &Cell, value: &RecordId, key_comparator: &KeyComparator) -> bool {
        let mut insert_slot = None;
        for i in 0..self.slot_count {
            if self.is_readable(i) {
                if key_comparator(key, &self.entries[i].0) == Ordering::Equal
                    && self.entries[i].1 == *value
                {
                    return false;
                }
            } else if insert_slot.is_none() {
                insert_slot = Some(i);
            }
        }

        match insert_slot {
            Some(i) => {
                self.entries[i] = (key.clone(), *value);
                self.occupied.set(i, true);
                self.readable.set(i, true);
                true
            }
            None => false,
        }
    }

    /// Clear the readable bit of the matching slot, leaving `occupied`
    /// set as a tombstone. Returns false when no slot matches.
    pub fn remove(&mut self, key: &Cell, value: &RecordId, key_comparator: &KeyComparator) -> bool {
        for i in 0..self.slot_count {
            if self.is_readable(i)
                && key_comparator(key, &self.entries[i].0) == Ordering::Equal
                && self.entries[i].1 == *value
            {
                self.readable.set(i, false);
                return true;
            }
        }
        false
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        self.readable.get(slot).unwrap_or(false)
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.occupied.get(slot).unwrap_or(false)
    }

    pub fn key_at(&self, slot: usize) -> &Cell {
        &self.entries[slot].0
    }

    pub fn value_at(&self, slot: usize) -> RecordId {
        self.entries[slot].1
    }

    pub fn num_readable(&self) -> usize {
        (0..self.slot_count).filter(|&i| self.is_readable(i)).count()
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == self.slot_count
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    pub fn get_slot_capacity(&self) -> usize {
        self.slot_count
    }
}

impl HashPage for HashBucketPage {
    fn get_pid(&self) -> PageId {
        self.pid
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = DbWriter::new();

        writer.write(&PageCategory::Bucket);
        writer.write(&self.occupied);
        writer.write(&self.readable);
        for (key, value) in &self.entries {
            writer.write(key);
            writer.write(value);
        }

        writer.to_padded_bytes(BufferPool::get_page_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::cell_comparator;

    fn rid(n: u32) -> RecordId {
        RecordId::new(n, 0)
    }

    #[test]
    fn test_insert_and_get() {
        let mut bucket = HashBucketPage::new_empty_page(1);
        let cmp: KeyComparator = cell_comparator;

        assert!(bucket.insert(&Cell::Int64(1), &rid(1), &cmp));
        assert!(bucket.insert(&Cell::Int64(1), &rid(2), &cmp));
        assert!(bucket.insert(&Cell::Int64(2), &rid(3), &cmp));

        // duplicated (key, value) pairs are rejected
        assert!(!bucket.insert(&Cell::Int64(1), &rid(1), &cmp));

        // non-unique keys return all matches in slot order
        assert_eq!(bucket.get(&Cell::Int64(1), &cmp), vec![rid(1), rid(2)]);
        assert_eq!(bucket.get(&Cell::Int64(3), &cmp), Vec::<RecordId>::new());
        assert_eq!(bucket.num_readable(), 3);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut bucket = HashBucketPage::new_empty_page(1);
        let cmp: KeyComparator = cell_comparator;

        assert!(bucket.insert(&Cell::Int64(1), &rid(1), &cmp));
        assert!(bucket.insert(&Cell::Int64(2), &rid(2), &cmp));

        assert!(bucket.remove(&Cell::Int64(1), &rid(1), &cmp));
        assert!(!bucket.remove(&Cell::Int64(1), &rid(1), &cmp));

        // slot 0 is a tombstone now, still occupied but not readable
        assert!(bucket.is_occupied(0));
        assert!(!bucket.is_readable(0));

        // the next insert reuses the tombstoned slot
        assert!(bucket.insert(&Cell::Int64(3), &rid(3), &cmp));
        assert!(bucket.is_readable(0));
        assert_eq!(bucket.get(&Cell::Int64(3), &cmp), vec![rid(3)]);
    }

    #[test]
    fn test_full_bucket_rejects_insert() {
        let mut bucket = HashBucketPage::new_empty_page(1);
        let cmp: KeyComparator = cell_comparator;

        let capacity = bucket.get_slot_capacity();
        for i in 0..capacity {
            assert!(bucket.insert(&Cell::Int64(i as i64), &rid(i as u32), &cmp));
        }

        assert!(bucket.is_full());
        assert!(!bucket.insert(&Cell::Int64(-1), &rid(9999), &cmp));
    }

    #[test]
    fn test_codec_round_trip() {
        let mut bucket = HashBucketPage::new_empty_page(7);
        let cmp: KeyComparator = cell_comparator;

        assert!(bucket.insert(&Cell::Int64(10), &rid(1), &cmp));
        assert!(bucket.insert(&Cell::Int64(20), &rid(2), &cmp));
        assert!(bucket.remove(&Cell::Int64(10), &rid(1), &cmp));

        let bytes = bucket.get_page_data();
        assert_eq!(bytes.len(), BufferPool::get_page_size());

        let decoded = HashBucketPage::new(7, &bytes);
        assert_eq!(decoded.get(&Cell::Int64(20), &cmp), vec![rid(2)]);
        assert!(decoded.get(&Cell::Int64(10), &cmp).is_empty());
        assert!(decoded.is_occupied(0));
        assert!(!decoded.is_readable(0));
    }
}

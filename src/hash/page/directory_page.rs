use std::{collections::HashMap, io::Cursor};

use super::{HashPage, PageCategory, PageId, INVALID_PAGE_ID};
use crate::{
    hash::buffer_pool::BufferPool,
    io::{read_exact, read_into, DbWriter, Decodeable},
};

/// Upper bound on the global depth. The slot arrays are always laid out
/// at this size; only the first `2^global_depth` slots are in use.
pub const DIRECTORY_MAX_DEPTH: u32 = 9;
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << DIRECTORY_MAX_DEPTH;

/// Routes hash prefixes to bucket pages.
///
/// Slot `s` covers the keys whose low `global_depth` hash bits equal `s`.
/// All slots sharing the low `local_depth` bits of `s` point to the same
/// bucket page.
pub struct HashDirectoryPage {
    pid: PageId,

    global_depth: u32,
    local_depths: Vec<u8>,
    bucket_page_ids: Vec<PageId>,
}

impl HashDirectoryPage {
    pub fn new(pid: PageId, bytes: &[u8]) -> Self {
        let mut reader = Cursor::new(bytes);

        let page_category: PageCategory = read_into(&mut reader);
        if page_category != PageCategory::Directory {
            panic!("invalid page category: {:?}", page_category);
        }

        let global_depth = u32::decode(&mut reader);
        let local_depths = read_exact(&mut reader, DIRECTORY_ARRAY_SIZE);

        let mut bucket_page_ids = Vec::with_capacity(DIRECTORY_ARRAY_SIZE);
        for _ in 0..DIRECTORY_ARRAY_SIZE {
            bucket_page_ids.push(PageId::decode(&mut reader));
        }

        Self {
            pid,
            global_depth,
            local_depths,
            bucket_page_ids,
        }
    }

    pub fn new_empty_page(pid: PageId) -> Self {
        Self {
            pid,
            global_depth: 0,
            local_depths: vec![0; DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: vec![INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
        }
    }

    pub fn get_bucket_page_id(&self, slot: usize) -> PageId {
        self.bucket_page_ids[slot]
    }

    pub fn set_bucket_page_id(&mut self, slot: usize, bucket_page_id: PageId) {
        self.bucket_page_ids[slot] = bucket_page_id;
    }

    pub fn get_local_depth(&self, slot: usize) -> u32 {
        self.local_depths[slot] as u32
    }

    pub fn set_local_depth(&mut self, slot: usize, local_depth: u32) {
        self.local_depths[slot] = local_depth as u8;
    }

    pub fn incr_local_depth(&mut self, slot: usize) {
        self.local_depths[slot] += 1;
    }

    pub fn decr_local_depth(&mut self, slot: usize) {
        self.local_depths[slot] -= 1;
    }

    pub fn get_global_depth(&self) -> u32 {
        self.global_depth
    }

    pub fn incr_global_depth(&mut self) {
        self.global_depth += 1;
    }

    pub fn decr_global_depth(&mut self) {
        self.global_depth -= 1;
    }

    /// Count of directory slots currently in use.
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    pub fn get_global_depth_mask(&self) -> u32 {
        (1 << self.global_depth) - 1
    }

    pub fn get_local_depth_mask(&self, slot: usize) -> u32 {
        (1 << self.get_local_depth(slot)) - 1
    }

    /// The slot sharing every bit of this slot's local-depth prefix
    /// except the most significant one, i.e. its twin across the most
    /// recent split.
    pub fn get_split_image_index(&self, slot: usize) -> usize {
        slot ^ (1 << (self.get_local_depth(slot) - 1))
    }

    /// The directory may halve exactly when no in-use slot sits at the
    /// global depth.
    pub fn can_shrink(&self) -> bool {
        if self.global_depth == 0 {
            return false;
        }

        for slot in 0..self.size() {
            if self.get_local_depth(slot) == self.global_depth {
                return false;
            }
        }
        true
    }

    /// Assert the structural invariants:
    /// - every in-use slot points to an allocated bucket page
    /// - no local depth exceeds the global depth
    /// - all slots pointing to one bucket page agree on its local depth
    /// - a bucket of local depth L is referenced exactly 2^(G - L) times
    pub fn verify_integrity(&self) {
        // page id -> (reference count, local depth)
        let mut page_id_stats: HashMap<PageId, (usize, u32)> = HashMap::new();

        for slot in 0..self.size() {
            let bucket_page_id = self.get_bucket_page_id(slot);
            let local_depth = self.get_local_depth(slot);

            assert!(
                bucket_page_id != INVALID_PAGE_ID,
                "slot {} points to an unallocated bucket page",
                slot,
            );
            assert!(
                local_depth <= self.global_depth,
                "slot {} has local depth {} exceeding global depth {}",
                slot,
                local_depth,
                self.global_depth,
            );

            let stats = page_id_stats.entry(bucket_page_id).or_insert((0, local_depth));
            assert!(
                stats.1 == local_depth,
                "slots of bucket page {} disagree on the local depth: {} != {}",
                bucket_page_id,
                stats.1,
                local_depth,
            );
            stats.0 += 1;
        }

        for (bucket_page_id, (count, local_depth)) in page_id_stats {
            assert!(
                count == (1 << (self.global_depth - local_depth)),
                "bucket page {} at local depth {} is referenced {} times, want {}",
                bucket_page_id,
                local_depth,
                count,
                1 << (self.global_depth - local_depth),
            );
        }
    }
}

impl HashPage for HashDirectoryPage {
    fn get_pid(&self) -> PageId {
        self.pid
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = DbWriter::new();

        writer.write(&PageCategory::Directory);
        writer.write(&self.global_depth);
        writer.write_bytes(&self.local_depths);
        for bucket_page_id in &self.bucket_page_ids {
            writer.write(bucket_page_id);
        }

        writer.to_padded_bytes(BufferPool::get_page_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_and_split_image() {
        let mut dir = HashDirectoryPage::new_empty_page(1);
        dir.incr_global_depth();
        dir.incr_global_depth();
        assert_eq!(dir.size(), 4);
        assert_eq!(dir.get_global_depth_mask(), 0b11);

        dir.set_local_depth(2, 2);
        assert_eq!(dir.get_local_depth_mask(2), 0b11);
        // flipping the high bit of the 2-bit prefix of slot 0b10
        assert_eq!(dir.get_split_image_index(2), 0);

        dir.set_local_depth(1, 1);
        assert_eq!(dir.get_split_image_index(1), 0);
    }

    #[test]
    fn test_can_shrink() {
        let mut dir = HashDirectoryPage::new_empty_page(1);
        dir.incr_global_depth();
        dir.set_local_depth(0, 1);
        dir.set_local_depth(1, 1);
        assert!(!dir.can_shrink());

        dir.set_local_depth(0, 0);
        dir.set_local_depth(1, 0);
        assert!(dir.can_shrink());

        dir.decr_global_depth();
        assert!(!dir.can_shrink());
    }

    #[test]
    fn test_verify_integrity() {
        let mut dir = HashDirectoryPage::new_empty_page(1);
        dir.incr_global_depth();
        dir.set_bucket_page_id(0, 2);
        dir.set_local_depth(0, 1);
        dir.set_bucket_page_id(1, 3);
        dir.set_local_depth(1, 1);
        dir.verify_integrity();

        // one bucket shared by both slots at local depth 0
        dir.set_bucket_page_id(1, 2);
        dir.set_local_depth(0, 0);
        dir.set_local_depth(1, 0);
        dir.verify_integrity();
    }
}

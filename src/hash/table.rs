use std::sync::RwLock;

use log::debug;
use xxhash_rust::xxh32::xxh32;

use super::page::{HashDirectoryPage, PageId, DIRECTORY_ARRAY_SIZE};
use crate::{
    common::Database,
    error::DbError,
    io::Encodeable,
    storage::{Cell, KeyComparator, RecordId},
    transaction::Transaction,
    types::DbResult,
    utils::HandyRwLock,
};

/// Deterministic 32-bit hash of a key.
pub type HashFunction = fn(&Cell) -> u32;

pub fn default_hash(key: &Cell) -> u32 {
    xxh32(&key.encode(), 0)
}

/// A persistent extendible hash table mapping cells to record ids.
///
/// The directory page routes the low `global_depth` bits of the key hash
/// to a bucket page. Inserting into a full bucket splits it, growing the
/// directory when the bucket already sits at the global depth. Removing
/// the last entry of a bucket merges it back into its split image and
/// shrinks the directory while possible.
///
/// Latch order: the table latch first (shared for search/remove/fast-path
/// insert, exclusive for split and merge), then the page latches from the
/// buffer pool. The directory latch is dropped before a bucket latch is
/// taken on the shared paths; directory mutations happen only under the
/// exclusive table latch.
pub struct ExtendibleHashTable {
    directory_page_id: PageId,

    table_latch: RwLock<()>,

    key_comparator: KeyComparator,
    hash_fn: HashFunction,
}

impl ExtendibleHashTable {
    /// Set up the initial directory: global depth 1 over two empty
    /// buckets of local depth 1.
    pub fn new(key_comparator: KeyComparator, hash_fn: HashFunction) -> Result<Self, DbError> {
        let buffer_pool = Database::buffer_pool();

        let (directory_page_id, directory_rc) = buffer_pool.new_directory_page()?;
        let (bucket_0_page_id, _bucket_0_rc) = buffer_pool.new_bucket_page()?;
        let (bucket_1_page_id, _bucket_1_rc) = buffer_pool.new_bucket_page()?;

        {
            let mut directory = directory_rc.wl();
            directory.incr_global_depth();
            directory.set_bucket_page_id(0, bucket_0_page_id);
            directory.set_local_depth(0, 1);
            directory.set_bucket_page_id(1, bucket_1_page_id);
            directory.set_local_depth(1, 1);
        }

        buffer_pool.unpin_page(bucket_0_page_id, false);
        buffer_pool.unpin_page(bucket_1_page_id, false);
        buffer_pool.unpin_page(directory_page_id, true);

        Ok(Self {
            directory_page_id,
            table_latch: RwLock::new(()),
            key_comparator,
            hash_fn,
        })
    }

    fn hash(&self, key: &Cell) -> u32 {
        (self.hash_fn)(key)
    }

    fn key_to_directory_index(&self, key: &Cell, directory: &HashDirectoryPage) -> usize {
        (self.hash(key) & directory.get_global_depth_mask()) as usize
    }

    fn key_to_page_id(&self, key: &Cell, directory: &HashDirectoryPage) -> PageId {
        directory.get_bucket_page_id(self.key_to_directory_index(key, directory))
    }

    /// Collect the values stored under the key, in slot order. The key
    /// was found iff the result is non-empty.
    pub fn get_value(&self, _tx: &Transaction, key: &Cell) -> Result<Vec<RecordId>, DbError> {
        let _table_guard = self.table_latch.rl();
        let buffer_pool = Database::buffer_pool();

        let directory_rc = buffer_pool.fetch_directory_page(self.directory_page_id)?;
        let bucket_page_id = self.key_to_page_id(key, &directory_rc.rl());
        buffer_pool.unpin_page(self.directory_page_id, false);

        let bucket_rc = buffer_pool.fetch_bucket_page(bucket_page_id)?;
        let result = bucket_rc.rl().get(key, &self.key_comparator);
        buffer_pool.unpin_page(bucket_page_id, false);

        Ok(result)
    }

    /// Insert the (key, value) pair. Returns false when the exact pair is
    /// already present, or when placing it would require growing the
    /// directory beyond its maximum depth.
    pub fn insert(&self, tx: &Transaction, key: &Cell, value: &RecordId) -> Result<bool, DbError> {
        let buffer_pool = Database::buffer_pool();

        // fast path: the target bucket has a free slot
        {
            let _table_guard = self.table_latch.rl();

            let directory_rc = buffer_pool.fetch_directory_page(self.directory_page_id)?;
            let bucket_page_id = self.key_to_page_id(key, &directory_rc.rl());

            let bucket_rc = buffer_pool.fetch_bucket_page(bucket_page_id)?;
            let mut bucket = bucket_rc.wl();
            if !bucket.is_full() {
                let insert_succeed = bucket.insert(key, value, &self.key_comparator);
                drop(bucket);
                buffer_pool.unpin_page(self.directory_page_id, false);
                buffer_pool.unpin_page(bucket_page_id, insert_succeed);
                return Ok(insert_succeed);
            }
            drop(bucket);
            buffer_pool.unpin_page(self.directory_page_id, false);
            buffer_pool.unpin_page(bucket_page_id, false);
        }

        // the bucket was full, split it under the exclusive table latch
        if !self.split_bucket(key)? {
            return Ok(false);
        }

        // either the owning bucket gained a free slot or the directory
        // grew and the key may route elsewhere now
        self.insert(tx, key, value)
    }

    /// Split the bucket owning the key, growing the directory when the
    /// bucket already sits at the global depth. Returns false when the
    /// required growth would exceed the maximum depth.
    fn split_bucket(&self, key: &Cell) -> Result<bool, DbError> {
        let buffer_pool = Database::buffer_pool();
        let _table_guard = self.table_latch.wl();

        let directory_rc = buffer_pool.fetch_directory_page(self.directory_page_id)?;
        let mut directory = directory_rc.wl();

        let bucket_idx = self.key_to_directory_index(key, &directory);
        let bucket_page_id = directory.get_bucket_page_id(bucket_idx);
        let bucket_rc = buffer_pool.fetch_bucket_page(bucket_page_id)?;

        // another writer may have split or deleted in the window between
        // releasing the shared latch and acquiring the exclusive one
        if !bucket_rc.rl().is_full() {
            drop(directory);
            buffer_pool.unpin_page(self.directory_page_id, false);
            buffer_pool.unpin_page(bucket_page_id, false);
            return Ok(true);
        }

        if directory.get_local_depth(bucket_idx) == directory.get_global_depth() {
            let old_size = directory.size();
            if old_size * 2 > DIRECTORY_ARRAY_SIZE {
                debug!("directory is at the maximum depth, rejecting the insert");
                drop(directory);
                buffer_pool.unpin_page(self.directory_page_id, false);
                buffer_pool.unpin_page(bucket_page_id, false);
                return Ok(false);
            }

            // double the directory, the upper half mirrors the lower half
            directory.incr_global_depth();
            for slot in old_size..old_size * 2 {
                let mirrored_page_id = directory.get_bucket_page_id(slot - old_size);
                let mirrored_local_depth = directory.get_local_depth(slot - old_size);
                directory.set_bucket_page_id(slot, mirrored_page_id);
                directory.set_local_depth(slot, mirrored_local_depth);
            }
        }

        let (new_bucket_page_id, new_bucket_rc) = buffer_pool.new_bucket_page()?;

        directory.incr_local_depth(bucket_idx);
        let local_depth = directory.get_local_depth(bucket_idx);
        let local_depth_mask = directory.get_local_depth_mask(bucket_idx) as usize;

        debug!(
            "splitting bucket page {} to page {}, local depth {}",
            bucket_page_id, new_bucket_page_id, local_depth
        );

        // slots still pointing at the overflowing bucket either keep it
        // or follow the split image, depending on the newly relevant bit
        for slot in 0..directory.size() {
            if directory.get_bucket_page_id(slot) == bucket_page_id {
                if slot & local_depth_mask != bucket_idx & local_depth_mask {
                    directory.set_bucket_page_id(slot, new_bucket_page_id);
                }
                directory.set_local_depth(slot, local_depth);
            }
        }

        // move the entries that route to the new bucket now
        {
            let mut bucket = bucket_rc.wl();
            let mut new_bucket = new_bucket_rc.wl();
            for slot in 0..bucket.get_slot_capacity() {
                if !bucket.is_readable(slot) {
                    continue;
                }
                let entry_key = bucket.key_at(slot).clone();
                let entry_value = bucket.value_at(slot);
                if self.key_to_page_id(&entry_key, &directory) != bucket_page_id {
                    new_bucket.insert(&entry_key, &entry_value, &self.key_comparator);
                    bucket.remove(&entry_key, &entry_value, &self.key_comparator);
                }
            }
        }

        drop(directory);
        buffer_pool.unpin_page(new_bucket_page_id, true);
        buffer_pool.unpin_page(bucket_page_id, true);
        buffer_pool.unpin_page(self.directory_page_id, true);
        Ok(true)
    }

    /// Remove the (key, value) pair, returning whether it was present. A
    /// bucket left empty is merged into its split image.
    pub fn remove(&self, tx: &Transaction, key: &Cell, value: &RecordId) -> Result<bool, DbError> {
        let buffer_pool = Database::buffer_pool();

        let remove_succeed;
        let bucket_emptied;
        {
            let _table_guard = self.table_latch.rl();

            let directory_rc = buffer_pool.fetch_directory_page(self.directory_page_id)?;
            let bucket_page_id = self.key_to_page_id(key, &directory_rc.rl());
            buffer_pool.unpin_page(self.directory_page_id, false);

            let bucket_rc = buffer_pool.fetch_bucket_page(bucket_page_id)?;
            let mut bucket = bucket_rc.wl();
            remove_succeed = bucket.remove(key, value, &self.key_comparator);
            bucket_emptied = bucket.is_empty();
            drop(bucket);
            buffer_pool.unpin_page(bucket_page_id, remove_succeed);
        }

        if bucket_emptied {
            self.merge(tx, key)?;
        }
        Ok(remove_succeed)
    }

    /// Fold the (empty) bucket owning the key into its split image and
    /// shrink the directory while possible. A no-op unless the bucket is
    /// still empty, sits above local depth 1 and matches its split
    /// image's local depth.
    fn merge(&self, _tx: &Transaction, key: &Cell) -> DbResult {
        let buffer_pool = Database::buffer_pool();
        let _table_guard = self.table_latch.wl();

        let directory_rc = buffer_pool.fetch_directory_page(self.directory_page_id)?;
        let mut directory = directory_rc.wl();

        let bucket_idx = self.key_to_directory_index(key, &directory);
        let bucket_page_id = directory.get_bucket_page_id(bucket_idx);
        let bucket_local_depth = directory.get_local_depth(bucket_idx);

        // never collapse the root pair
        if bucket_local_depth <= 1 {
            drop(directory);
            buffer_pool.unpin_page(self.directory_page_id, false);
            return Ok(());
        }

        let split_image_idx = directory.get_split_image_index(bucket_idx);
        let split_image_local_depth = directory.get_local_depth(split_image_idx);

        let bucket_rc = buffer_pool.fetch_bucket_page(bucket_page_id)?;
        let still_empty = bucket_rc.rl().is_empty();
        buffer_pool.unpin_page(bucket_page_id, false);

        // the structure may have changed before the exclusive latch was
        // granted, only an empty bucket matching its image's depth merges
        if !still_empty || bucket_local_depth != split_image_local_depth {
            drop(directory);
            buffer_pool.unpin_page(self.directory_page_id, false);
            return Ok(());
        }

        let split_image_page_id = directory.get_bucket_page_id(split_image_idx);
        directory.decr_local_depth(split_image_idx);
        directory.decr_local_depth(bucket_idx);
        directory.set_bucket_page_id(bucket_idx, split_image_page_id);

        debug!(
            "merging bucket page {} into page {}",
            bucket_page_id, split_image_page_id
        );
        buffer_pool.delete_page(bucket_page_id);

        // every slot still routing through either page of the pair now
        // points at the surviving page with the decremented depth
        let merged_local_depth = directory.get_local_depth(bucket_idx);
        for slot in 0..directory.size() {
            let slot_page_id = directory.get_bucket_page_id(slot);
            if slot_page_id == bucket_page_id || slot_page_id == split_image_page_id {
                directory.set_bucket_page_id(slot, split_image_page_id);
                directory.set_local_depth(slot, merged_local_depth);
            }
        }

        while directory.can_shrink() {
            directory.decr_global_depth();
        }

        drop(directory);
        buffer_pool.unpin_page(self.directory_page_id, true);
        Ok(())
    }

    pub fn get_global_depth(&self) -> Result<u32, DbError> {
        let _table_guard = self.table_latch.rl();
        let buffer_pool = Database::buffer_pool();

        let directory_rc = buffer_pool.fetch_directory_page(self.directory_page_id)?;
        let global_depth = directory_rc.rl().get_global_depth();
        buffer_pool.unpin_page(self.directory_page_id, false);
        Ok(global_depth)
    }

    /// Assert the directory invariants. Programming errors, not user
    /// errors, surface here.
    pub fn verify_integrity(&self) -> DbResult {
        let _table_guard = self.table_latch.rl();
        let buffer_pool = Database::buffer_pool();

        let directory_rc = buffer_pool.fetch_directory_page(self.directory_page_id)?;
        directory_rc.rl().verify_integrity();
        buffer_pool.unpin_page(self.directory_page_id, false);
        Ok(())
    }
}

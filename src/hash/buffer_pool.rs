use std::{
    path::Path,
    sync::{
        atomic::{self, AtomicU32, AtomicUsize},
        Arc, Mutex, RwLock,
    },
};

use log::{debug, error};

use super::page::{HashBucketPage, HashDirectoryPage, HashPage, PageId};
use crate::{
    error::DbError,
    io::DbFile,
    types::{ConcurrentHashMap, Pod, ResultPod},
    utils::HandyRwLock,
};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// Typed page cache over the single database file.
///
/// Every `new_*` / `fetch_*` call pins the page and must be paired with
/// one `unpin_page` on every exit path, passing `dirty = true` exactly
/// when the page was mutated. The per-page latch is the `RwLock` inside
/// the returned pod.
pub struct BufferPool {
    file: DbFile,

    directory_buffer: ConcurrentHashMap<PageId, Pod<HashDirectoryPage>>,
    bucket_buffer: ConcurrentHashMap<PageId, Pod<HashBucketPage>>,

    pin_counts: ConcurrentHashMap<PageId, i64>,
    dirty_pages: ConcurrentHashMap<PageId, bool>,

    // page indexes start at 1, 0 is INVALID_PAGE_ID
    next_page_index: AtomicU32,
    freed_pages: Mutex<Vec<PageId>>,
}

impl BufferPool {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file: DbFile::new(file_path),
            directory_buffer: ConcurrentHashMap::new(),
            bucket_buffer: ConcurrentHashMap::new(),
            pin_counts: ConcurrentHashMap::new(),
            dirty_pages: ConcurrentHashMap::new(),
            next_page_index: AtomicU32::new(1),
            freed_pages: Mutex::new(Vec::new()),
        }
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, atomic::Ordering::Relaxed);
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(atomic::Ordering::Relaxed)
    }

    /// Allocate and pin a fresh directory page.
    pub fn new_directory_page(&self) -> Result<(PageId, Pod<HashDirectoryPage>), DbError> {
        let pid = self.allocate_page_id();
        let page = Arc::new(RwLock::new(HashDirectoryPage::new_empty_page(pid)));
        self.directory_buffer.insert(pid, page.clone());
        self.add_pin(pid)?;
        Ok((pid, page))
    }

    /// Allocate and pin a fresh bucket page.
    pub fn new_bucket_page(&self) -> Result<(PageId, Pod<HashBucketPage>), DbError> {
        let pid = self.allocate_page_id();
        let page = Arc::new(RwLock::new(HashBucketPage::new_empty_page(pid)));
        self.bucket_buffer.insert(pid, page.clone());
        self.add_pin(pid)?;
        Ok((pid, page))
    }

    /// Pin an existing directory page, loading it from disk on a cache
    /// miss.
    pub fn fetch_directory_page(&self, pid: PageId) -> ResultPod<HashDirectoryPage> {
        let page = self.directory_buffer.get_or_insert(&pid, |pid| {
            let bytes = self.read_page(*pid)?;
            Ok(Arc::new(RwLock::new(HashDirectoryPage::new(*pid, &bytes))))
        })?;
        self.add_pin(pid)?;
        Ok(page)
    }

    /// Pin an existing bucket page, loading it from disk on a cache miss.
    pub fn fetch_bucket_page(&self, pid: PageId) -> ResultPod<HashBucketPage> {
        let page = self.bucket_buffer.get_or_insert(&pid, |pid| {
            let bytes = self.read_page(*pid)?;
            Ok(Arc::new(RwLock::new(HashBucketPage::new(*pid, &bytes))))
        })?;
        self.add_pin(pid)?;
        Ok(page)
    }

    /// Drop one pin. Must be called exactly once per new/fetch.
    pub fn unpin_page(&self, pid: PageId, dirty: bool) -> bool {
        let result = self.pin_counts.alter_value(&pid, |count| {
            if *count <= 0 {
                return Err(DbError::new("unpin of a page with no pins"));
            }
            *count -= 1;
            Ok(())
        });
        if result.is_err() {
            error!("unpin of a page with no pins, pid: {}", pid);
            return false;
        }

        if dirty {
            self.dirty_pages.insert(pid, true);
        }
        true
    }

    /// Release a page's identity. Refused while the page is pinned. The
    /// page index goes back to the allocator for reuse.
    pub fn delete_page(&self, pid: PageId) -> bool {
        if let Some(count) = self.pin_counts.get(&pid) {
            if count > 0 {
                error!("delete of a pinned page, pid: {}, pins: {}", pid, count);
                return false;
            }
        }

        self.directory_buffer.remove(&pid);
        self.bucket_buffer.remove(&pid);
        self.dirty_pages.remove(&pid);
        self.pin_counts.remove(&pid);
        self.freed_pages.lock().unwrap().push(pid);

        debug!("deleted page {}", pid);
        true
    }

    /// Write every dirty page back to the database file.
    pub fn flush_all_pages(&self) {
        for pid in self.dirty_pages.keys() {
            self.flush_page(pid);
        }
    }

    fn flush_page(&self, pid: PageId) {
        let data = if let Some(page) = self.directory_buffer.get(&pid) {
            page.rl().get_page_data()
        } else if let Some(page) = self.bucket_buffer.get(&pid) {
            page.rl().get_page_data()
        } else {
            error!("flush of a page missing from the cache, pid: {}", pid);
            return;
        };

        debug!("flushing page {}", pid);
        if let Err(e) = self.file.write_page_at(Self::page_offset(pid), &data) {
            error!("flush of page {} failed: {}", pid, e);
            return;
        }
        self.dirty_pages.remove(&pid);
    }

    fn read_page(&self, pid: PageId) -> Result<Vec<u8>, DbError> {
        debug!("get page from disk, pid: {}", pid);
        self.file
            .read_page_at(Self::page_offset(pid), Self::get_page_size())
    }

    fn page_offset(pid: PageId) -> u64 {
        (pid - 1) as u64 * Self::get_page_size() as u64
    }

    fn allocate_page_id(&self) -> PageId {
        if let Some(pid) = self.freed_pages.lock().unwrap().pop() {
            return pid;
        }
        self.next_page_index.fetch_add(1, atomic::Ordering::Relaxed)
    }

    fn add_pin(&self, pid: PageId) -> Result<(), DbError> {
        self.pin_counts.alter_value(&pid, |count| {
            *count += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_unpin_delete() {
        let pool = BufferPool::new("/tmp/hash_db_buffer_pool_test.db");

        let (pid, _page) = pool.new_bucket_page().unwrap();

        // pinned pages cannot be deleted
        assert!(!pool.delete_page(pid));

        assert!(pool.unpin_page(pid, true));
        assert!(!pool.unpin_page(pid, false));

        assert!(pool.delete_page(pid));

        // the freed page index is handed out again
        let (reused_pid, _page) = pool.new_bucket_page().unwrap();
        assert_eq!(reused_pid, pid);
        assert!(pool.unpin_page(reused_pid, false));
    }

    #[test]
    fn test_flush_round_trip() {
        let path = "/tmp/hash_db_buffer_pool_flush_test.db";
        let pool = BufferPool::new(path);

        let (pid, page_rc) = pool.new_bucket_page().unwrap();
        let key = crate::storage::Cell::Int64(42);
        let value = crate::storage::RecordId::new(1, 7);
        let cmp: crate::storage::KeyComparator = crate::storage::cell_comparator;
        assert!(page_rc.wl().insert(&key, &value, &cmp));
        pool.unpin_page(pid, true);

        pool.flush_all_pages();

        // a fresh pool reads the entry back from the file
        let other = BufferPool::new(path);
        let fetched = other.fetch_bucket_page(pid).unwrap();
        assert_eq!(fetched.rl().get(&key, &cmp), vec![value]);
        other.unpin_page(pid, false);
    }
}

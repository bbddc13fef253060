use std::{mem, path::PathBuf, sync::Once};

use crate::{
    hash::buffer_pool::{BufferPool, DEFAULT_PAGE_SIZE},
    hash::page::HashBucketPage,
    transaction::{LockManager, TransactionManager},
};

/// We collect all global variables here.
///
/// These variable cannot be initialized as static variables, because
/// their initialization function all rely on non-const fn (e.g.
/// `HashMap::new()`).
///
/// In the same time, all these variables should not be wrapped in any
/// kind of smart pointers / locks (e.g. `Arc`, `RwLock`), because they
/// are used in concurrent environment, and it's hard, if not
/// impossible, to acquire a exclusive lock in any context.
pub struct Database {
    path: PathBuf,

    buffer_pool: BufferPool,
    lock_manager: LockManager,
    transaction_manager: TransactionManager,
}

static mut SINGLETON: *mut Database = 0 as *mut Database;

impl Database {
    fn new() -> Self {
        let db_name = "default_db";
        let db_path = PathBuf::from("data").join(db_name);
        if !db_path.exists() {
            std::fs::create_dir_all(&db_path).unwrap();
        }

        let data_path = db_path.join("hash.db");

        Self {
            path: db_path,

            buffer_pool: BufferPool::new(data_path),
            lock_manager: LockManager::new(),
            transaction_manager: TransactionManager::new(),
        }
    }

    /// Reset the memory status of the database, used for tests mostly.
    ///
    /// Actions:
    /// - Page size and bucket slot count go back to their defaults.
    /// - The buffer pool, lock manager and transaction manager are
    ///   recreated empty.
    pub fn reset() {
        BufferPool::set_page_size(DEFAULT_PAGE_SIZE);
        HashBucketPage::set_slot_count(0);

        // Drop the singleton if it's already initialized
        unsafe {
            if !SINGLETON.is_null() {
                mem::drop(Box::from_raw(SINGLETON));
            }
        }

        // Make it
        let singleton = Self::new();

        unsafe {
            // Put it in the heap so it can outlive this call
            SINGLETON = mem::transmute(Box::new(singleton));
        }
    }

    pub fn buffer_pool() -> &'static BufferPool {
        &Self::global().buffer_pool
    }

    pub fn lock_manager() -> &'static LockManager {
        &Self::global().lock_manager
    }

    pub fn transaction_manager() -> &'static TransactionManager {
        &Self::global().transaction_manager
    }

    pub fn global() -> &'static Self {
        static ONCE: Once = Once::new();

        ONCE.call_once(|| {
            // Make it
            let singleton = Self::new();

            unsafe {
                // Put it in the heap so it can outlive this call
                SINGLETON = mem::transmute(Box::new(singleton));
            }
        });

        unsafe {
            // Now we give out a copy of the data that is safe to use
            // concurrently.
            SINGLETON.as_ref().unwrap()
        }
    }

    pub fn get_path(&self) -> PathBuf {
        self.path.clone()
    }
}

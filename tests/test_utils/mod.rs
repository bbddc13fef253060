use std::sync::{Mutex, MutexGuard};

use hash_db::{utils::init_log, Database};

// The tests of one binary share the process-wide Database singleton, so
// they take turns.
static TEST_LOCK: Mutex<()> = Mutex::new(());

/// # Conduct the initialization
///
/// - Setting up log configurations.
/// - Reset the database singleton, the page size and the bucket slot
///   count.
pub fn setup() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    init_log();
    Database::reset();

    guard
}

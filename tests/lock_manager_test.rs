use std::{thread, time::Duration};

use hash_db::{
    storage::{Cell, RecordId},
    transaction::{IndexWriteRecord, IsolationLevel, TransactionState, WriteOp},
    Database,
};

mod test_utils;
use test_utils::setup;

fn rid(n: u32) -> RecordId {
    RecordId::new(n, 0)
}

/// Two readers share a record; a queued writer is promoted once the
/// shared holders are gone; the transaction that released enters its
/// shrinking phase and may not lock again.
#[test]
fn test_shared_exclusive_basics() {
    let _guard = setup();
    let tm = Database::transaction_manager();
    let lm = Database::lock_manager();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let r = rid(1);

    assert!(lm.lock_shared(&t1, &r));
    assert!(lm.lock_shared(&t2, &r));

    // t2's exclusive request has to wait behind t1's shared lock
    let waiter = {
        let t2 = t2.clone();
        thread::spawn(move || Database::lock_manager().lock_exclusive(&t2, &rid(1)))
    };
    thread::sleep(Duration::from_millis(200));

    // the release hands the record to the queued request
    assert!(lm.unlock(&t1, &r));
    assert!(waiter.join().unwrap());
    assert!(t2.is_exclusive_locked(&r));
    assert!(!t2.is_shared_locked(&r));

    // t1 released a lock under repeatable read, so it is shrinking and
    // the next acquisition aborts it
    assert_eq!(t1.get_state(), TransactionState::Shrinking);
    assert!(!lm.lock_shared(&t1, &rid(2)));
    assert_eq!(t1.get_state(), TransactionState::Aborted);

    tm.commit(&t2);
    tm.abort(&t1);
}

/// The older transaction wounds the younger exclusive holder instead of
/// waiting for it.
#[test]
fn test_wound_wait_preempts_younger_holder() {
    let _guard = setup();
    let tm = Database::transaction_manager();
    let lm = Database::lock_manager();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let r = rid(1);

    assert!(lm.lock_exclusive(&t2, &r));

    assert!(lm.lock_shared(&t1, &r));
    assert_eq!(t2.get_state(), TransactionState::Aborted);
    assert!(t1.is_shared_locked(&r));

    // an aborted transaction is refused everything
    assert!(!lm.lock_exclusive(&t2, &rid(9)));
    assert!(!lm.lock_shared(&t2, &rid(9)));

    tm.abort(&t2);
    tm.commit(&t1);
}

/// Only one upgrade may wait per record: the second upgrader is aborted,
/// and its released shared lock lets the first one through.
#[test]
fn test_upgrade_collision() {
    let _guard = setup();
    let tm = Database::transaction_manager();
    let lm = Database::lock_manager();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let r = rid(1);

    assert!(lm.lock_shared(&t1, &r));
    assert!(lm.lock_shared(&t2, &r));

    // the younger t2 upgrades first and waits behind t1's shared lock
    let waiter = {
        let t2 = t2.clone();
        thread::spawn(move || Database::lock_manager().lock_upgrade(&t2, &rid(1)))
    };
    thread::sleep(Duration::from_millis(200));

    // a second upgrader on the same record is forbidden
    assert!(!lm.lock_upgrade(&t1, &r));
    assert_eq!(t1.get_state(), TransactionState::Aborted);

    // t1's abort releases its shared lock and promotes the upgrader
    tm.abort(&t1);
    assert!(waiter.join().unwrap());
    assert!(t2.is_exclusive_locked(&r));
    assert!(!t2.is_shared_locked(&r));

    tm.commit(&t2);
}

/// Read uncommitted writes through exclusive locks but never takes a
/// shared lock.
#[test]
fn test_read_uncommitted() {
    let _guard = setup();
    let tm = Database::transaction_manager();
    let lm = Database::lock_manager();

    let t1 = tm.begin(IsolationLevel::ReadUncommitted);

    assert!(lm.lock_exclusive(&t1, &rid(1)));

    assert!(!lm.lock_shared(&t1, &rid(2)));
    assert_eq!(t1.get_state(), TransactionState::Aborted);

    tm.abort(&t1);
}

/// A read committed transaction may release a shared lock mid-growth
/// and acquire another one afterwards.
#[test]
fn test_read_committed_shared_release() {
    let _guard = setup();
    let tm = Database::transaction_manager();
    let lm = Database::lock_manager();

    let t1 = tm.begin(IsolationLevel::ReadCommitted);

    assert!(lm.lock_shared(&t1, &rid(1)));
    assert!(lm.unlock(&t1, &rid(1)));
    assert_eq!(t1.get_state(), TransactionState::Growing);

    assert!(lm.lock_shared(&t1, &rid(2)));
    assert!(t1.is_shared_locked(&rid(2)));

    tm.commit(&t1);
}

/// Unlocking a record that was never locked succeeds, but the phase
/// transition of repeatable read still applies.
#[test]
fn test_unlock_not_held() {
    let _guard = setup();
    let tm = Database::transaction_manager();
    let lm = Database::lock_manager();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.unlock(&t1, &rid(1)));
    assert_eq!(t1.get_state(), TransactionState::Shrinking);

    assert!(!lm.lock_shared(&t1, &rid(2)));
    assert_eq!(t1.get_state(), TransactionState::Aborted);

    tm.abort(&t1);
}

/// Re-requesting a held lock is a no-op; a shared request is satisfied
/// by a held exclusive lock; a lone shared holder upgrades in place.
#[test]
fn test_reentrant_and_upgrade() {
    let _guard = setup();
    let tm = Database::transaction_manager();
    let lm = Database::lock_manager();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_shared(&t1, &rid(1)));
    assert!(lm.lock_shared(&t1, &rid(1)));

    assert!(lm.lock_exclusive(&t1, &rid(2)));
    assert!(lm.lock_exclusive(&t1, &rid(2)));
    assert!(lm.lock_shared(&t1, &rid(2)));

    // the shared lock on rid 1 upgrades without a competitor
    assert!(lm.lock_exclusive(&t1, &rid(1)));
    assert!(t1.is_exclusive_locked(&rid(1)));
    assert!(!t1.is_shared_locked(&rid(1)));

    tm.commit(&t1);
}

/// The undo log accumulates index writes; an abort discards them.
#[test]
fn test_index_write_log() {
    let _guard = setup();
    let tm = Database::transaction_manager();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    t1.append_index_write_record(IndexWriteRecord {
        op: WriteOp::Insert,
        key: Cell::Int64(1),
        rid: rid(1),
    });
    t1.append_index_write_record(IndexWriteRecord {
        op: WriteOp::Remove,
        key: Cell::Int64(2),
        rid: rid(2),
    });
    assert_eq!(t1.get_index_write_log().len(), 2);

    tm.abort(&t1);
    assert!(t1.get_index_write_log().is_empty());
}

/// Commit releases every held lock and later requests are refused.
#[test]
fn test_commit_releases_locks() {
    let _guard = setup();
    let tm = Database::transaction_manager();
    let lm = Database::lock_manager();

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_exclusive(&t1, &rid(1)));
    assert!(lm.lock_shared(&t1, &rid(2)));
    tm.commit(&t1);
    assert!(t1.exclusive_lock_set().is_empty());
    assert!(t1.shared_lock_set().is_empty());

    // the records are free for others now
    assert!(lm.lock_exclusive(&t2, &rid(1)));
    assert!(lm.lock_exclusive(&t2, &rid(2)));
    tm.commit(&t2);
}

use core::fmt;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, RwLock,
    },
};

use crate::{
    storage::{Cell, RecordId},
    utils::HandyRwLock,
};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

pub type TransactionID = u64;

/// "No holder" marker. Compares greater than every real transaction id;
/// code must never feed it into an age comparison.
pub const INVALID_TXN_ID: TransactionID = u64::MAX;

/// GROWING -> SHRINKING -> COMMITTED, any state may move to ABORTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Insert,
    Remove,
}

/// One entry of the undo log that index-modifying executors append to.
/// The lock manager never looks inside.
#[derive(Debug, Clone)]
pub struct IndexWriteRecord {
    pub op: WriteOp,
    pub key: Cell,
    pub rid: RecordId,
}

/// All fields sit behind interior mutability: the lock manager works
/// through `&Transaction` and wound-wait flips the state of other
/// transactions resolved through the transaction manager.
pub struct Transaction {
    // increase monotonically by 1, smaller id = older transaction
    id: TransactionID,
    isolation_level: IsolationLevel,

    state: RwLock<TransactionState>,

    shared_lock_set: RwLock<HashSet<RecordId>>,
    exclusive_lock_set: RwLock<HashSet<RecordId>>,

    index_write_log: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    pub(crate) fn new(isolation_level: IsolationLevel) -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            shared_lock_set: RwLock::new(HashSet::new()),
            exclusive_lock_set: RwLock::new(HashSet::new()),
            index_write_log: Mutex::new(Vec::new()),
        }
    }

    pub fn get_id(&self) -> TransactionID {
        self.id
    }

    pub fn get_isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn get_state(&self) -> TransactionState {
        *self.state.rl()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.wl() = state;
    }

    pub fn is_shared_locked(&self, rid: &RecordId) -> bool {
        self.shared_lock_set.rl().contains(rid)
    }

    pub fn is_exclusive_locked(&self, rid: &RecordId) -> bool {
        self.exclusive_lock_set.rl().contains(rid)
    }

    pub(crate) fn add_shared_lock(&self, rid: &RecordId) {
        self.shared_lock_set.wl().insert(*rid);
    }

    pub(crate) fn remove_shared_lock(&self, rid: &RecordId) {
        self.shared_lock_set.wl().remove(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: &RecordId) {
        self.exclusive_lock_set.wl().insert(*rid);
    }

    pub(crate) fn remove_exclusive_lock(&self, rid: &RecordId) {
        self.exclusive_lock_set.wl().remove(rid);
    }

    /// Snapshot of the record ids held in shared mode.
    pub fn shared_lock_set(&self) -> HashSet<RecordId> {
        self.shared_lock_set.rl().clone()
    }

    /// Snapshot of the record ids held in exclusive mode.
    pub fn exclusive_lock_set(&self) -> HashSet<RecordId> {
        self.exclusive_lock_set.rl().clone()
    }

    pub fn append_index_write_record(&self, record: IndexWriteRecord) {
        self.index_write_log.lock().unwrap().push(record);
    }

    pub fn get_index_write_log(&self) -> Vec<IndexWriteRecord> {
        self.index_write_log.lock().unwrap().clone()
    }

    pub(crate) fn clear_index_write_log(&self) {
        self.index_write_log.lock().unwrap().clear();
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        return write!(f, "{}", self);
    }
}

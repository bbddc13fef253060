use std::sync::Arc;

use log::debug;

use crate::{
    common::Database,
    transaction::{IsolationLevel, Transaction, TransactionID, TransactionState},
    types::ConcurrentHashMap,
};

/// Owns every transaction of the process. The lock manager resolves
/// transaction ids through this registry when wound-wait needs to abort
/// a peer.
pub struct TransactionManager {
    transactions: ConcurrentHashMap<TransactionID, Arc<Transaction>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            transactions: ConcurrentHashMap::new(),
        }
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn = Arc::new(Transaction::new(isolation_level));
        self.transactions.insert(txn.get_id(), txn.clone());

        debug!("{} started, isolation level {:?}", txn, isolation_level);
        txn
    }

    pub fn get_transaction(&self, txn_id: &TransactionID) -> Option<Arc<Transaction>> {
        self.transactions.get(txn_id)
    }

    /// Release every lock the transaction still holds, then mark it
    /// committed.
    pub fn commit(&self, txn: &Transaction) {
        self.release_all_locks(txn);
        txn.set_state(TransactionState::Committed);

        debug!("{} committed", txn);
    }

    /// Release every lock, discard the undo log and mark the
    /// transaction aborted. The executors roll back their index writes
    /// before calling in.
    pub fn abort(&self, txn: &Transaction) {
        self.release_all_locks(txn);
        txn.clear_index_write_log();
        txn.set_state(TransactionState::Aborted);

        debug!("{} aborted", txn);
    }

    fn release_all_locks(&self, txn: &Transaction) {
        let lock_manager = Database::lock_manager();

        for rid in txn.shared_lock_set() {
            lock_manager.unlock(txn, &rid);
        }
        for rid in txn.exclusive_lock_set() {
            lock_manager.unlock(txn, &rid);
        }
    }
}

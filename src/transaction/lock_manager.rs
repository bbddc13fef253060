use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

use log::debug;

use crate::{
    common::Database,
    storage::RecordId,
    transaction::{IsolationLevel, Transaction, TransactionID, TransactionState, INVALID_TXN_ID},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

// A pending request parked in a queue. Only exclusive requests ever
// wait, shared requests are admitted right after preemption.
struct LockRequest {
    txn_id: TransactionID,
    mode: LockMode,
}

struct LockRequestQueue {
    // unprocessed exclusive lock requests, FIFO
    request_queue: VecDeque<LockRequest>,

    // transactions holding the shared lock
    shared_lock_holders: HashSet<TransactionID>,

    // the transaction holding the exclusive lock
    exclusive_lock_holder: TransactionID,

    // the transaction upgrading shared -> exclusive, at most one
    upgrading: TransactionID,

    // wakes the requests blocked on this record, always paired with the
    // lock table latch
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            request_queue: VecDeque::new(),
            shared_lock_holders: HashSet::new(),
            exclusive_lock_holder: INVALID_TXN_ID,
            upgrading: INVALID_TXN_ID,
            cv: Arc::new(Condvar::new()),
        }
    }

    fn is_lock_granted(&self, txn_id: TransactionID) -> bool {
        self.shared_lock_holders.contains(&txn_id) || self.exclusive_lock_holder == txn_id
    }
}

type LockTable = HashMap<RecordId, LockRequestQueue>;

/// Record-granularity two-phase locking with wound-wait deadlock
/// prevention: an older requester aborts the younger transactions in its
/// way, a younger requester waits for the older incumbents.
///
/// One process-wide mutex serializes every operation. Waiting happens on
/// the per-record condition variable paired with that mutex; a waiter
/// re-checks its grant and its own state on every wake, so aborting a
/// waiter means flipping its state and broadcasting the queue.
pub struct LockManager {
    latch: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on the record. Returns false and aborts the
    /// transaction when its isolation level forbids the request.
    pub fn lock_shared(&self, txn: &Transaction, rid: &RecordId) -> bool {
        let state = txn.get_state();
        let isolation_level = txn.get_isolation_level();

        if state == TransactionState::Aborted {
            return false;
        }
        // repeatable read takes no new locks once shrinking
        if isolation_level == IsolationLevel::RepeatableRead && state == TransactionState::Shrinking
        {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        // read uncommitted reads without shared locks
        if isolation_level == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return true;
        }

        let mut lock_table = self.latch.lock().unwrap();
        let txn_id = txn.get_id();
        let queue = lock_table.entry(*rid).or_insert_with(LockRequestQueue::new);

        Self::preempt_younger_requests(queue, txn_id, LockMode::Shared);
        Self::preempt_younger_exclusive_holder(queue, txn_id);

        // a shared request is admitted right away once the conflicting
        // younger incumbents are gone
        queue.shared_lock_holders.insert(txn_id);
        txn.add_shared_lock(rid);

        true
    }

    /// Acquire an exclusive lock on the record, blocking behind the
    /// incumbents wound-wait lets live. Returns false when the
    /// transaction is or becomes aborted.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: &RecordId) -> bool {
        let state = txn.get_state();

        if state == TransactionState::Aborted {
            return false;
        }
        // writes stay strictly two-phase, no exclusive lock in the
        // shrinking phase
        if state == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if txn.is_exclusive_locked(rid) {
            return true;
        }
        if txn.is_shared_locked(rid) {
            return self.lock_upgrade(txn, rid);
        }

        let mut lock_table = self.latch.lock().unwrap();
        let txn_id = txn.get_id();
        let queue = lock_table.entry(*rid).or_insert_with(LockRequestQueue::new);

        Self::preempt_younger_requests(queue, txn_id, LockMode::Exclusive);
        Self::preempt_younger_shared_holders(queue, txn_id);
        Self::preempt_younger_exclusive_holder(queue, txn_id);

        if !queue.request_queue.is_empty()
            || !queue.shared_lock_holders.is_empty()
            || queue.exclusive_lock_holder != INVALID_TXN_ID
        {
            queue.request_queue.push_back(LockRequest {
                txn_id,
                mode: LockMode::Exclusive,
            });
        } else {
            queue.exclusive_lock_holder = txn_id;
        }

        let mut lock_table = Self::wait_until_granted(lock_table, txn, rid);

        // wounded by an older transaction while waiting
        if txn.get_state() == TransactionState::Aborted {
            Self::abandon_request(&mut lock_table, txn_id, rid);
            return false;
        }

        txn.add_exclusive_lock(rid);
        true
    }

    /// Upgrade a held shared lock to an exclusive one. Only a single
    /// upgrade may be in flight per record; a second upgrader is
    /// aborted.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: &RecordId) -> bool {
        let state = txn.get_state();

        if state == TransactionState::Aborted {
            return false;
        }
        if state == TransactionState::Shrinking {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        if !txn.is_shared_locked(rid) {
            return false;
        }

        let mut lock_table = self.latch.lock().unwrap();
        let txn_id = txn.get_id();
        let queue = lock_table.entry(*rid).or_insert_with(LockRequestQueue::new);

        if queue.upgrading != INVALID_TXN_ID {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        queue.shared_lock_holders.remove(&txn_id);

        Self::preempt_younger_requests(queue, txn_id, LockMode::Exclusive);
        Self::preempt_younger_shared_holders(queue, txn_id);
        Self::preempt_younger_exclusive_holder(queue, txn_id);

        if queue.exclusive_lock_holder == INVALID_TXN_ID && queue.shared_lock_holders.is_empty() {
            queue.exclusive_lock_holder = txn_id;
        } else {
            queue.request_queue.push_back(LockRequest {
                txn_id,
                mode: LockMode::Exclusive,
            });
            queue.upgrading = txn_id;
        }

        let mut lock_table = Self::wait_until_granted(lock_table, txn, rid);

        if txn.get_state() == TransactionState::Aborted {
            Self::abandon_request(&mut lock_table, txn_id, rid);
            return false;
        }

        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        true
    }

    /// Release the transaction's lock on the record and promote the next
    /// pending request when possible. Releasing a lock that is not held
    /// succeeds, though the phase transition still applies.
    pub fn unlock(&self, txn: &Transaction, rid: &RecordId) -> bool {
        let mut lock_table = self.latch.lock().unwrap();

        // the first release moves a repeatable read transaction into its
        // shrinking phase
        if txn.get_isolation_level() == IsolationLevel::RepeatableRead
            && txn.get_state() == TransactionState::Growing
        {
            txn.set_state(TransactionState::Shrinking);
        }

        let txn_id = txn.get_id();
        let queue = lock_table.entry(*rid).or_insert_with(LockRequestQueue::new);

        if queue.exclusive_lock_holder == txn_id {
            queue.exclusive_lock_holder = INVALID_TXN_ID;
        }
        queue.shared_lock_holders.remove(&txn_id);

        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);

        // one pending exclusive request is promoted per release, the
        // next release promotes the next
        if queue.shared_lock_holders.is_empty() && !queue.request_queue.is_empty() {
            Self::process_queue(queue);
        }
        queue.cv.notify_all();

        true
    }

    /// Block until the request is granted or the transaction is wounded.
    /// The condition variable releases and re-acquires the lock table
    /// latch atomically around every wait.
    fn wait_until_granted<'a>(
        mut lock_table: MutexGuard<'a, LockTable>,
        txn: &Transaction,
        rid: &RecordId,
    ) -> MutexGuard<'a, LockTable> {
        let cv = lock_table.get(rid).unwrap().cv.clone();
        loop {
            {
                let queue = lock_table.get(rid).unwrap();
                if queue.is_lock_granted(txn.get_id())
                    || txn.get_state() == TransactionState::Aborted
                {
                    return lock_table;
                }
            }
            lock_table = cv.wait(lock_table).unwrap();
        }
    }

    /// Scrub every trace of a wounded requester from the queue before it
    /// returns, so a later promotion can never hand the record to an
    /// aborted transaction and leave its successors blocked forever.
    fn abandon_request(lock_table: &mut LockTable, txn_id: TransactionID, rid: &RecordId) {
        let queue = match lock_table.get_mut(rid) {
            Some(queue) => queue,
            None => return,
        };

        queue.request_queue.retain(|request| request.txn_id != txn_id);
        if queue.upgrading == txn_id {
            queue.upgrading = INVALID_TXN_ID;
        }
        if queue.exclusive_lock_holder == txn_id {
            queue.exclusive_lock_holder = INVALID_TXN_ID;
        }

        if queue.exclusive_lock_holder == INVALID_TXN_ID
            && queue.shared_lock_holders.is_empty()
            && !queue.request_queue.is_empty()
        {
            Self::process_queue(queue);
        }
        queue.cv.notify_all();
    }

    fn process_queue(queue: &mut LockRequestQueue) {
        if let Some(request) = queue.request_queue.pop_front() {
            queue.exclusive_lock_holder = request.txn_id;
            if queue.upgrading == request.txn_id {
                queue.upgrading = INVALID_TXN_ID;
            }
        }
    }

    /// Abort and drop the younger pending requests conflicting with the
    /// requester, then wake the queue so they observe the abort.
    fn preempt_younger_requests(
        queue: &mut LockRequestQueue,
        txn_id: TransactionID,
        lock_mode: LockMode,
    ) {
        let mut preempted = false;
        queue.request_queue.retain(|request| {
            let conflicts =
                lock_mode == LockMode::Exclusive || request.mode == LockMode::Exclusive;
            if conflicts && txn_id < request.txn_id {
                Self::wound(request.txn_id, txn_id);
                preempted = true;
                return false;
            }
            true
        });

        if preempted {
            queue.cv.notify_all();
        }
    }

    fn preempt_younger_shared_holders(queue: &mut LockRequestQueue, txn_id: TransactionID) {
        queue.shared_lock_holders.retain(|&holder_id| {
            if txn_id < holder_id {
                Self::wound(holder_id, txn_id);
                return false;
            }
            true
        });
    }

    fn preempt_younger_exclusive_holder(queue: &mut LockRequestQueue, txn_id: TransactionID) {
        let holder_id = queue.exclusive_lock_holder;
        if holder_id != INVALID_TXN_ID && txn_id < holder_id {
            Self::wound(holder_id, txn_id);
            queue.exclusive_lock_holder = INVALID_TXN_ID;
        }
    }

    // The victim observes the flipped state on its next wake or lock
    // call; no message is sent.
    fn wound(victim_id: TransactionID, by: TransactionID) {
        if let Some(victim) = Database::transaction_manager().get_transaction(&victim_id) {
            debug!("tx_{} wounded by tx_{}", victim_id, by);
            victim.set_state(TransactionState::Aborted);
        }
    }
}

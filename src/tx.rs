//! Transaction context threaded through heap operations: the transaction
//! handle itself, a row-lock ledger, and the LSN authority for mutation
//! records. The heap passes these through without interpreting them.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::buffer::PageId;
use crate::heap::RowId;

/// Transaction identifier
pub type TxnId = u64;

/// Log sequence number; 0 means "never logged"
pub type Lsn = u64;

/// Handle for the transaction on whose behalf heap operations run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    id: TxnId,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct RowLock {
    shared: Vec<TxnId>,
    exclusive: Option<TxnId>,
}

/// Row-lock ledger: records which transaction holds which row lock.
///
/// Grants are immediate and ownership is tracked until `unlock_all`;
/// wait/retry policy belongs to the concurrency-control layer above.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<AHashMap<RowId, RowLock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a shared lock on `rid` for `txn`
    pub fn lock_shared(&self, txn: &Transaction, rid: RowId) {
        let mut table = self.table.lock();
        let entry = table.entry(rid).or_default();
        if entry.exclusive == Some(txn.id()) {
            return; // exclusive already covers shared
        }
        if !entry.shared.contains(&txn.id()) {
            entry.shared.push(txn.id());
        }
    }

    /// Record an exclusive lock on `rid` for `txn`, upgrading a shared one
    pub fn lock_exclusive(&self, txn: &Transaction, rid: RowId) {
        let mut table = self.table.lock();
        let entry = table.entry(rid).or_default();
        entry.shared.retain(|&id| id != txn.id());
        entry.exclusive = Some(txn.id());
    }

    /// Release every lock held by `txn`
    pub fn unlock_all(&self, txn: &Transaction) {
        let mut table = self.table.lock();
        table.retain(|_, entry| {
            entry.shared.retain(|&id| id != txn.id());
            if entry.exclusive == Some(txn.id()) {
                entry.exclusive = None;
            }
            entry.exclusive.is_some() || !entry.shared.is_empty()
        });
    }

    /// The strongest lock `txn` holds on `rid`, if any
    pub fn holds(&self, txn: &Transaction, rid: RowId) -> Option<LockMode> {
        let table = self.table.lock();
        let entry = table.get(&rid)?;
        if entry.exclusive == Some(txn.id()) {
            Some(LockMode::Exclusive)
        } else if entry.shared.contains(&txn.id()) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Number of rows with at least one lock recorded
    pub fn locked_rows(&self) -> usize {
        self.table.lock().len()
    }
}

/// One logged heap mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Insert { txn: TxnId, rid: RowId },
    MarkDelete { txn: TxnId, rid: RowId },
    ApplyDelete { txn: TxnId, rid: RowId },
    RollbackDelete { txn: TxnId, rid: RowId },
    Update { txn: TxnId, old_rid: RowId, new_rid: RowId },
    NewTablePage { txn: TxnId, page_id: PageId },
}

/// LSN authority and in-memory record buffer for heap mutations.
///
/// Every appended record gets a strictly increasing LSN, which the heap
/// stamps into the mutated page's header.
#[derive(Debug)]
pub struct LogManager {
    next_lsn: AtomicU64,
    records: Mutex<Vec<(Lsn, LogRecord)>>,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            next_lsn: AtomicU64::new(1),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Append a record, returning its LSN
    pub fn append(&self, record: LogRecord) -> Lsn {
        let lsn = self.next_lsn.fetch_add(1, Ordering::Relaxed);
        self.records.lock().push((lsn, record));
        lsn
    }

    /// Highest LSN handed out so far (0 if none)
    pub fn latest_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::Relaxed) - 1
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Take all buffered records, e.g. for flushing to a durable log
    pub fn drain(&self) -> Vec<(Lsn, LogRecord)> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_ledger_shared_then_exclusive() {
        let lock_mgr = LockManager::new();
        let txn = Transaction::new(1);
        let rid = RowId::new(0, 0);

        assert_eq!(lock_mgr.holds(&txn, rid), None);

        lock_mgr.lock_shared(&txn, rid);
        assert_eq!(lock_mgr.holds(&txn, rid), Some(LockMode::Shared));

        lock_mgr.lock_exclusive(&txn, rid);
        assert_eq!(lock_mgr.holds(&txn, rid), Some(LockMode::Exclusive));

        // Shared after exclusive does not downgrade
        lock_mgr.lock_shared(&txn, rid);
        assert_eq!(lock_mgr.holds(&txn, rid), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_unlock_all_releases_only_own_locks() {
        let lock_mgr = LockManager::new();
        let t1 = Transaction::new(1);
        let t2 = Transaction::new(2);
        let rid_a = RowId::new(0, 0);
        let rid_b = RowId::new(0, 1);

        lock_mgr.lock_shared(&t1, rid_a);
        lock_mgr.lock_shared(&t2, rid_a);
        lock_mgr.lock_exclusive(&t1, rid_b);
        assert_eq!(lock_mgr.locked_rows(), 2);

        lock_mgr.unlock_all(&t1);
        assert_eq!(lock_mgr.holds(&t1, rid_a), None);
        assert_eq!(lock_mgr.holds(&t1, rid_b), None);
        assert_eq!(lock_mgr.holds(&t2, rid_a), Some(LockMode::Shared));
        assert_eq!(lock_mgr.locked_rows(), 1);
    }

    #[test]
    fn test_log_lsns_strictly_increase() {
        let log_mgr = LogManager::new();
        let rid = RowId::new(3, 1);

        assert_eq!(log_mgr.latest_lsn(), 0);
        let a = log_mgr.append(LogRecord::Insert { txn: 1, rid });
        let b = log_mgr.append(LogRecord::MarkDelete { txn: 1, rid });
        assert!(b > a);
        assert_eq!(log_mgr.latest_lsn(), b);
        assert_eq!(log_mgr.len(), 2);
    }

    #[test]
    fn test_log_drain() {
        let log_mgr = LogManager::new();
        let rid = RowId::new(0, 0);
        log_mgr.append(LogRecord::Insert { txn: 9, rid });

        let records = log_mgr.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, LogRecord::Insert { txn: 9, rid });
        assert!(log_mgr.is_empty());
        // LSNs keep increasing across drains
        assert_eq!(log_mgr.append(LogRecord::ApplyDelete { txn: 9, rid }), 2);
    }
}

use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;

use super::error::{HeapError, HeapResult};
use super::page::{MAX_TUPLE_SIZE, SlotState, SlotUpdate, TablePage};
use super::row::{INVALID_ROW_ID, Row, RowId};
use super::schema::Schema;
use crate::buffer::{BufferError, BufferPool, INVALID_PAGE_ID, PageGuard, PageId};
use crate::tx::{LockManager, LogManager, LogRecord, Transaction};

/// Outcome of a successful update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The row was rewritten in its slot; the id is unchanged
    InPlace,
    /// The row did not fit in place and moved; the old id is retired
    Relocated(RowId),
}

/// An unordered, paged collection of rows belonging to one table.
///
/// Rows live in a singly linked chain of slotted pages reachable from
/// `first_page_id` and are addressed by [`RowId`]. All page access goes
/// through the shared buffer pool; every operation releases its pins on
/// every exit path by holding pages only through [`PageGuard`]s.
pub struct TableHeap {
    pool: Arc<BufferPool>,
    schema: Schema,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    /// INVALID_PAGE_ID until the first page is allocated
    first_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Create a heap with a freshly allocated, empty first page
    pub fn create(
        pool: Arc<BufferPool>,
        schema: Schema,
        lock_manager: Arc<LockManager>,
        log_manager: Arc<LogManager>,
    ) -> HeapResult<Self> {
        let heap = Self::open(pool, schema, lock_manager, log_manager, INVALID_PAGE_ID);
        {
            let mut first = heap.first_page_id.lock();
            let guard = heap.allocate_first_page()?;
            *first = guard.page_id();
        }
        Ok(heap)
    }

    /// Attach to an existing chain (or to no chain at all: the first page is
    /// then allocated lazily by the first insert)
    pub fn open(
        pool: Arc<BufferPool>,
        schema: Schema,
        lock_manager: Arc<LockManager>,
        log_manager: Arc<LogManager>,
        first_page_id: PageId,
    ) -> Self {
        Self {
            pool,
            schema,
            lock_manager,
            log_manager,
            first_page_id: Mutex::new(first_page_id),
        }
    }

    /// Id of the first page in the chain, or INVALID_PAGE_ID
    pub fn first_page_id(&self) -> PageId {
        *self.first_page_id.lock()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Insert a row, assigning its id.
    ///
    /// Walks the chain first-fit and extends it when every page is full.
    /// Rows larger than [`MAX_TUPLE_SIZE`] are refused outright; they are
    /// never split across pages.
    pub fn insert(&self, row: &mut Row, txn: &Transaction) -> HeapResult<RowId> {
        let size = row.serialized_size(&self.schema);
        if size > MAX_TUPLE_SIZE {
            return Err(HeapError::SizeExceeded {
                size,
                limit: MAX_TUPLE_SIZE,
            });
        }
        let data = row.serialize(&self.schema)?;

        let mut guard = self.first_page_for_insert()?;
        loop {
            let inserted = {
                let mut buf = guard.write();
                let mut page = TablePage::new(&mut buf[..]);
                page.insert_tuple(&data).map(|slot_id| {
                    let rid = RowId::new(guard.page_id(), slot_id);
                    let lsn = self.log_manager.append(LogRecord::Insert {
                        txn: txn.id(),
                        rid,
                    });
                    page.set_lsn(lsn);
                    rid
                })
            };

            if let Some(rid) = inserted {
                guard.mark_dirty();
                self.lock_manager.lock_exclusive(txn, rid);
                row.set_rid(rid);
                return Ok(rid);
            }

            let next = {
                let buf = guard.read();
                TablePage::new(&buf[..]).next_page_id()
            };
            guard = if next != INVALID_PAGE_ID {
                self.fetch_linked(next)?
            } else {
                self.extend_chain(guard, txn)?
            };
        }
    }

    /// Look up a row by id. Never dirties the page.
    pub fn get(&self, rid: RowId, txn: &Transaction) -> HeapResult<Row> {
        let guard = self.fetch_page_of(rid)?;
        let row = {
            let buf = guard.read();
            let page = TablePage::new(&buf[..]);
            let Some(data) = page.get_tuple(rid.slot_id) else {
                return Err(HeapError::NotFound(rid));
            };
            let mut row = Row::deserialize(data, &self.schema)?;
            row.set_rid(rid);
            row
        };
        self.lock_manager.lock_shared(txn, rid);
        Ok(row)
    }

    /// Tombstone a row. The row stays physically present (and recoverable
    /// through [`rollback_delete`](Self::rollback_delete)) until
    /// [`apply_delete`](Self::apply_delete) reclaims it.
    pub fn mark_delete(&self, rid: RowId, txn: &Transaction) -> HeapResult<()> {
        let guard = self.fetch_page_of(rid)?;
        let outcome = {
            let mut buf = guard.write();
            let mut page = TablePage::new(&mut buf[..]);
            match page.slot_state(rid.slot_id) {
                SlotState::Vacant => Err(HeapError::NotFound(rid)),
                SlotState::Deleted => Err(HeapError::InvalidState {
                    rid,
                    op: "mark delete",
                }),
                SlotState::Live => {
                    page.mark_delete(rid.slot_id);
                    let lsn = self.log_manager.append(LogRecord::MarkDelete {
                        txn: txn.id(),
                        rid,
                    });
                    page.set_lsn(lsn);
                    Ok(())
                }
            }
        };
        if outcome.is_ok() {
            guard.mark_dirty();
            self.lock_manager.lock_exclusive(txn, rid);
        }
        outcome
    }

    /// Physically reclaim a tombstoned row. The owning page must exist:
    /// apply-delete is only ever issued for rows known to the caller, so an
    /// unfetchable page is heap corruption, not a recoverable miss.
    pub fn apply_delete(&self, rid: RowId, txn: &Transaction) -> HeapResult<()> {
        let guard = self.fetch_existing(rid, "apply delete")?;
        let applied = {
            let mut buf = guard.write();
            let mut page = TablePage::new(&mut buf[..]);
            if page.apply_delete(rid.slot_id) {
                let lsn = self.log_manager.append(LogRecord::ApplyDelete {
                    txn: txn.id(),
                    rid,
                });
                page.set_lsn(lsn);
                true
            } else {
                false
            }
        };
        guard.mark_dirty();
        if applied {
            self.lock_manager.lock_exclusive(txn, rid);
            Ok(())
        } else {
            Err(HeapError::InvalidState {
                rid,
                op: "apply delete",
            })
        }
    }

    /// Reverse a mark-deletion, restoring the row to visibility.
    /// Same page-existence precondition as [`apply_delete`](Self::apply_delete).
    pub fn rollback_delete(&self, rid: RowId, txn: &Transaction) -> HeapResult<()> {
        let guard = self.fetch_existing(rid, "rollback delete")?;
        let restored = {
            let mut buf = guard.write();
            let mut page = TablePage::new(&mut buf[..]);
            if page.rollback_delete(rid.slot_id) {
                let lsn = self.log_manager.append(LogRecord::RollbackDelete {
                    txn: txn.id(),
                    rid,
                });
                page.set_lsn(lsn);
                true
            } else {
                false
            }
        };
        if restored {
            guard.mark_dirty();
            self.lock_manager.lock_exclusive(txn, rid);
            Ok(())
        } else {
            Err(HeapError::InvalidState {
                rid,
                op: "rollback delete",
            })
        }
    }

    /// Replace the row at `rid` with `row`.
    ///
    /// If the new content fits in place the id is preserved. Otherwise the
    /// old slot is retired and the row re-enters through the standard insert
    /// path, which may extend the chain; the returned
    /// [`UpdateOutcome::Relocated`] carries the new id and the old one
    /// reports NotFound from then on.
    pub fn update(
        &self,
        row: &mut Row,
        rid: RowId,
        txn: &Transaction,
    ) -> HeapResult<UpdateOutcome> {
        let size = row.serialized_size(&self.schema);
        if size > MAX_TUPLE_SIZE {
            return Err(HeapError::SizeExceeded {
                size,
                limit: MAX_TUPLE_SIZE,
            });
        }
        let data = row.serialize(&self.schema)?;

        let guard = self.fetch_page_of(rid)?;
        let result = {
            let mut buf = guard.write();
            let mut page = TablePage::new(&mut buf[..]);
            let result = page.update_tuple(rid.slot_id, &data);
            if result == SlotUpdate::Updated {
                let lsn = self.log_manager.append(LogRecord::Update {
                    txn: txn.id(),
                    old_rid: rid,
                    new_rid: rid,
                });
                page.set_lsn(lsn);
            }
            result
        };

        match result {
            SlotUpdate::Updated => {
                guard.mark_dirty();
                self.lock_manager.lock_exclusive(txn, rid);
                row.set_rid(rid);
                Ok(UpdateOutcome::InPlace)
            }
            SlotUpdate::IllegalCall => Err(HeapError::InvalidState { rid, op: "update" }),
            SlotUpdate::DoubleDelete => Err(HeapError::InvalidState {
                rid,
                op: "update of deleted row",
            }),
            SlotUpdate::InsufficientSpace => {
                drop(guard);
                self.relocate(row, rid, txn)
            }
        }
    }

    /// Delete-then-insert path for updates that do not fit in place.
    /// Reuses the ordinary insertion logic instead of duplicating page-growth
    /// handling; the old id is apply-deleted once the new copy is in the
    /// chain, so stale ids fail deterministically.
    fn relocate(&self, row: &mut Row, rid: RowId, txn: &Transaction) -> HeapResult<UpdateOutcome> {
        self.mark_delete(rid, txn)?;
        let new_rid = match self.insert(row, txn) {
            Ok(new_rid) => new_rid,
            Err(e) => {
                if let Err(undo) = self.rollback_delete(rid, txn) {
                    warn!("failed to restore row {rid} after aborted relocation: {undo}");
                }
                return Err(e);
            }
        };
        self.apply_delete(rid, txn)?;
        self.log_manager.append(LogRecord::Update {
            txn: txn.id(),
            old_rid: rid,
            new_rid,
        });
        debug!("relocated row {rid} to {new_rid}");
        Ok(UpdateOutcome::Relocated(new_rid))
    }

    /// Release every page of the chain back to the pool, front to back.
    /// Used when the heap is dropped for good; afterwards the heap is empty.
    pub fn free_heap(&self) -> HeapResult<()> {
        let mut first = self.first_page_id.lock();
        let mut page_id = *first;
        let mut freed = 0usize;

        while page_id != INVALID_PAGE_ID {
            let next = {
                let guard = self.fetch_linked(page_id)?;
                let buf = guard.read();
                TablePage::new(&buf[..]).next_page_id()
            };
            self.pool.delete_page(page_id)?;
            freed += 1;
            page_id = next;
        }

        *first = INVALID_PAGE_ID;
        debug!("freed heap: {freed} pages released");
        Ok(())
    }

    /// Delete a page and all of its successors, post-order: each page is
    /// released only after its entire suffix has been torn down. `None`
    /// starts at the first page and empties the heap. The predecessor of
    /// `from` (if any) is unlinked first so the remaining chain stays
    /// walkable.
    pub fn delete_table(&self, from: Option<PageId>) -> HeapResult<()> {
        let mut first = self.first_page_id.lock();
        let start = from.unwrap_or(*first);
        if start == INVALID_PAGE_ID {
            return Ok(());
        }

        if start != *first {
            let prev = {
                let guard = self.fetch_linked(start)?;
                let buf = guard.read();
                TablePage::new(&buf[..]).prev_page_id()
            };
            if prev != INVALID_PAGE_ID {
                let guard = self.fetch_linked(prev)?;
                {
                    let mut buf = guard.write();
                    TablePage::new(&mut buf[..]).set_next_page_id(INVALID_PAGE_ID);
                }
                guard.mark_dirty();
            }
        }

        // Explicit stack instead of recursion: chain length is unbounded
        let mut stack = Vec::new();
        let mut page_id = start;
        while page_id != INVALID_PAGE_ID {
            stack.push(page_id);
            let guard = self.fetch_linked(page_id)?;
            let buf = guard.read();
            page_id = TablePage::new(&buf[..]).next_page_id();
        }

        let pages = stack.len();
        while let Some(page_id) = stack.pop() {
            self.pool.delete_page(page_id)?;
        }

        if start == *first {
            *first = INVALID_PAGE_ID;
        }
        debug!("deleted table chain from page {start}: {pages} pages");
        Ok(())
    }

    /// Forward cursor over the live rows of this heap.
    ///
    /// An empty heap, an unfetchable first page, or a first page with no
    /// live rows all yield an already-exhausted iterator.
    pub fn iter<'a>(&'a self, txn: &'a Transaction) -> TableIter<'a> {
        let first = *self.first_page_id.lock();
        let current = if first == INVALID_PAGE_ID {
            INVALID_ROW_ID
        } else {
            match self.pool.fetch_page(first) {
                Ok(guard) => {
                    let buf = guard.read();
                    match TablePage::new(&buf[..]).first_live_slot() {
                        Some(slot_id) => RowId::new(first, slot_id),
                        None => INVALID_ROW_ID,
                    }
                }
                Err(_) => INVALID_ROW_ID,
            }
        };
        TableIter {
            heap: self,
            txn,
            current,
        }
    }

    /// Ids of the chain's pages in order; mostly useful for introspection
    pub fn page_ids(&self) -> HeapResult<Vec<PageId>> {
        let mut ids = Vec::new();
        let mut page_id = *self.first_page_id.lock();
        while page_id != INVALID_PAGE_ID {
            ids.push(page_id);
            let guard = self.fetch_linked(page_id)?;
            let buf = guard.read();
            page_id = TablePage::new(&buf[..]).next_page_id();
        }
        Ok(ids)
    }

    /// First live row after `after` in chain order, or the sentinel
    fn next_live_rid(&self, after: RowId) -> HeapResult<RowId> {
        let mut page_id = after.page_id;
        let mut from = after.slot_id.saturating_add(1);
        loop {
            let guard = match self.pool.fetch_page(page_id) {
                Ok(guard) => guard,
                // Page vanished under a concurrent teardown: end of iteration
                Err(BufferError::PageNotFound(_)) => return Ok(INVALID_ROW_ID),
                Err(e) => return Err(e.into()),
            };
            let buf = guard.read();
            let page = TablePage::new(&buf[..]);
            if let Some(slot_id) = page.next_live_slot(from) {
                return Ok(RowId::new(page_id, slot_id));
            }
            let next = page.next_page_id();
            drop(buf);
            drop(guard);
            if next == INVALID_PAGE_ID {
                return Ok(INVALID_ROW_ID);
            }
            page_id = next;
            from = 0;
        }
    }

    /// Fetch the first page, allocating it for a heap that has none yet
    fn first_page_for_insert(&self) -> HeapResult<PageGuard<'_>> {
        let mut first = self.first_page_id.lock();
        if *first == INVALID_PAGE_ID {
            let guard = self.allocate_first_page()?;
            *first = guard.page_id();
            return Ok(guard);
        }
        let first_id = *first;
        drop(first);
        Ok(self.pool.fetch_page(first_id)?)
    }

    fn allocate_first_page(&self) -> HeapResult<PageGuard<'_>> {
        let guard = self.pool.new_page()?;
        {
            let mut buf = guard.write();
            TablePage::new(&mut buf[..]).init(INVALID_PAGE_ID);
        }
        guard.mark_dirty();
        debug!("allocated first heap page {}", guard.page_id());
        Ok(guard)
    }

    /// Append a fresh page after `pred` and return it, pinned.
    ///
    /// The new page is fully initialized before the predecessor's next
    /// pointer is published. The link is check-and-set under the
    /// predecessor's write latch: if a concurrent insert extended the chain
    /// first, the freshly allocated page is returned to the pool and the
    /// winner's successor is followed instead. On allocation failure every
    /// pin is released and no link is written.
    fn extend_chain<'a>(
        &'a self,
        pred: PageGuard<'a>,
        txn: &Transaction,
    ) -> HeapResult<PageGuard<'a>> {
        let new_guard = self.pool.new_page()?;
        let new_id = new_guard.page_id();
        let pred_id = pred.page_id();

        {
            let mut buf = new_guard.write();
            TablePage::new(&mut buf[..]).init(pred_id);
        }
        new_guard.mark_dirty();

        let raced_next = {
            let mut buf = pred.write();
            let mut page = TablePage::new(&mut buf[..]);
            let next = page.next_page_id();
            if next != INVALID_PAGE_ID {
                Some(next)
            } else {
                page.set_next_page_id(new_id);
                None
            }
        };

        if let Some(next) = raced_next {
            drop(new_guard);
            self.pool.delete_page(new_id)?;
            drop(pred);
            trace!("lost chain-extension race after page {pred_id}, following page {next}");
            return self.fetch_linked(next);
        }

        pred.mark_dirty();
        drop(pred);

        {
            let mut buf = new_guard.write();
            let lsn = self.log_manager.append(LogRecord::NewTablePage {
                txn: txn.id(),
                page_id: new_id,
            });
            TablePage::new(&mut buf[..]).set_lsn(lsn);
        }
        debug!("extended heap chain: page {new_id} linked after page {pred_id}");
        Ok(new_guard)
    }

    /// Fetch a page addressed by a row id; an absent page is NotFound
    fn fetch_page_of(&self, rid: RowId) -> HeapResult<PageGuard<'_>> {
        if !rid.is_valid() {
            return Err(HeapError::NotFound(rid));
        }
        match self.pool.fetch_page(rid.page_id) {
            Ok(guard) => Ok(guard),
            Err(BufferError::PageNotFound(_)) => Err(HeapError::NotFound(rid)),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a page whose existence is an operation precondition
    fn fetch_existing(&self, rid: RowId, op: &'static str) -> HeapResult<PageGuard<'_>> {
        match self.pool.fetch_page(rid.page_id) {
            Ok(guard) => Ok(guard),
            Err(BufferError::PageNotFound(_)) => {
                panic!("{op} of row {rid}: its page is gone from the heap")
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a page reached through a chain link; an unfetchable linked
    /// page means the chain itself is corrupt
    fn fetch_linked(&self, page_id: PageId) -> HeapResult<PageGuard<'_>> {
        match self.pool.fetch_page(page_id) {
            Ok(guard) => Ok(guard),
            Err(BufferError::PageNotFound(_)) => {
                panic!("table page chain corrupted: page {page_id} is linked but unfetchable")
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Forward cursor over the live rows of a heap, one row at a time,
/// oblivious to page boundaries.
///
/// A single pass: once exhausted it stays exhausted; call
/// [`TableHeap::iter`] again to rescan. Rows deleted or relocated during
/// iteration are never yielded from their old slots.
pub struct TableIter<'a> {
    heap: &'a TableHeap,
    txn: &'a Transaction,
    current: RowId,
}

impl TableIter<'_> {
    /// Address of the row the cursor is positioned at, or the sentinel
    /// once exhausted
    pub fn rid(&self) -> RowId {
        self.current
    }
}

impl Iterator for TableIter<'_> {
    type Item = HeapResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.current.is_valid() {
            return None;
        }
        let rid = self.current;

        let row = match self.heap.get(rid, self.txn) {
            Ok(row) => row,
            Err(e) => {
                self.current = INVALID_ROW_ID;
                return Some(Err(e));
            }
        };

        self.current = match self.heap.next_live_rid(rid) {
            Ok(next) => next,
            Err(e) => {
                warn!("heap iteration stopped early at {rid}: {e}");
                INVALID_ROW_ID
            }
        };

        Some(Ok(row))
    }
}

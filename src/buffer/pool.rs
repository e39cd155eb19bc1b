use std::cell::Cell;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ahash::AHashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::disk_manager::DiskManager;
use super::error::{BufferError, BufferResult};
use super::{BUFFER_POOL_SIZE, PAGE_SIZE, PageId};

/// A cached page frame, shared between the pool and the guards pinning it.
///
/// The `RwLock` around the page bytes is the page latch: readers take it
/// shared, mutators take it exclusive. Pin count and dirty flag are only
/// mutated under the pool mutex.
struct Frame {
    page_id: PageId,
    data: RwLock<Box<[u8]>>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

struct PoolState {
    disk: DiskManager,
    /// Page table: every resident page, pinned or not
    frames: AHashMap<PageId, Arc<Frame>>,
    /// Pages with pin count zero, in least-recently-unpinned order.
    /// Victim selection is a single pop_lru.
    replacer: LruCache<PageId, ()>,
}

/// Fixed-capacity page cache with pin-based eviction control.
///
/// Pages are handed out as [`PageGuard`]s; a guard holds exactly one pin
/// and releases it when dropped. Only pages with no outstanding pins are
/// eviction candidates.
pub struct BufferPool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Create a buffer pool with the default frame capacity
    pub fn new(disk: DiskManager) -> Self {
        Self::with_capacity(disk, BUFFER_POOL_SIZE)
    }

    /// Create a buffer pool with the specified frame capacity
    pub fn with_capacity(disk: DiskManager, capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(PoolState {
                disk,
                frames: AHashMap::with_capacity(capacity),
                replacer: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
            }),
        }
    }

    /// Fetch an existing page, pinning it.
    ///
    /// Loads from disk on a cache miss, evicting an unpinned victim if the
    /// pool is at capacity. Fails with `PoolExhausted` when every frame is
    /// pinned and with `PageNotFound` when the id was never allocated.
    pub fn fetch_page(&self, page_id: PageId) -> BufferResult<PageGuard<'_>> {
        let mut state = self.state.lock();

        if let Some(frame) = state.frames.get(&page_id) {
            let frame = Arc::clone(frame);
            frame.pin_count.fetch_add(1, Ordering::Relaxed);
            state.replacer.pop(&page_id);
            return Ok(PageGuard::new(self, frame));
        }

        Self::ensure_free_frame(&mut state, self.capacity)?;

        let mut data = vec![0u8; PAGE_SIZE].into_boxed_slice();
        state.disk.read_page(page_id, &mut data)?;

        let frame = Arc::new(Frame {
            page_id,
            data: RwLock::new(data),
            pin_count: AtomicU32::new(1),
            dirty: AtomicBool::new(false),
        });
        state.frames.insert(page_id, Arc::clone(&frame));

        Ok(PageGuard::new(self, frame))
    }

    /// Allocate a fresh zeroed page, pinned and dirty.
    ///
    /// A frame is secured before the id is allocated, so a full pool leaves
    /// no orphaned page id behind.
    pub fn new_page(&self) -> BufferResult<PageGuard<'_>> {
        let mut state = self.state.lock();

        Self::ensure_free_frame(&mut state, self.capacity)?;

        let page_id = state.disk.allocate_page();
        let frame = Arc::new(Frame {
            page_id,
            data: RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            pin_count: AtomicU32::new(1),
            dirty: AtomicBool::new(true),
        });
        state.frames.insert(page_id, Arc::clone(&frame));

        Ok(PageGuard::new(self, frame))
    }

    /// Delete a page from the pool and return its id to the disk manager.
    ///
    /// Precondition: the page has no outstanding pins.
    pub fn delete_page(&self, page_id: PageId) -> BufferResult<()> {
        let mut state = self.state.lock();

        if let Some(frame) = state.frames.get(&page_id) {
            let pins = frame.pin_count.load(Ordering::Relaxed);
            if pins > 0 {
                return Err(BufferError::PagePinned(page_id, pins));
            }
            state.frames.remove(&page_id);
            state.replacer.pop(&page_id);
        }

        state.disk.deallocate_page(page_id)
    }

    /// Write a resident page back to disk if dirty
    pub fn flush_page(&self, page_id: PageId) -> BufferResult<()> {
        let mut state = self.state.lock();
        let frame = state
            .frames
            .get(&page_id)
            .cloned()
            .ok_or(BufferError::PageNotFound(page_id))?;

        if frame.dirty.load(Ordering::Relaxed) {
            let data = frame.data.read();
            state.disk.write_page(page_id, &data)?;
            frame.dirty.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Write all dirty resident pages back to disk and sync the file
    pub fn flush_all(&self) -> BufferResult<()> {
        let mut state = self.state.lock();
        let frames: Vec<Arc<Frame>> = state.frames.values().cloned().collect();

        for frame in frames {
            if frame.dirty.load(Ordering::Relaxed) {
                let data = frame.data.read();
                state.disk.write_page(frame.page_id, &data)?;
                frame.dirty.store(false, Ordering::Relaxed);
            }
        }

        state.disk.sync()
    }

    /// Number of frames this pool can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pages currently resident
    pub fn cached_pages(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Pin count of a resident page, if cached
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        self.state
            .lock()
            .frames
            .get(&page_id)
            .map(|f| f.pin_count.load(Ordering::Relaxed))
    }

    /// Number of page ids the backing file has handed out
    pub fn page_count(&self) -> PageId {
        self.state.lock().disk.page_count()
    }

    /// Make room for one more frame, evicting the least recently unpinned
    /// page if the pool is at capacity
    fn ensure_free_frame(state: &mut PoolState, capacity: usize) -> BufferResult<()> {
        while state.frames.len() >= capacity {
            let Some((victim, ())) = state.replacer.pop_lru() else {
                return Err(BufferError::PoolExhausted);
            };
            let Some(frame) = state.frames.remove(&victim) else {
                continue;
            };
            if frame.dirty.load(Ordering::Relaxed) {
                let data = frame.data.read();
                state.disk.write_page(victim, &data)?;
            }
        }
        Ok(())
    }

    /// Drop one pin; invoked exactly once per guard
    fn unpin_page(&self, page_id: PageId, dirty: bool) {
        let mut state = self.state.lock();
        let Some(frame) = state.frames.get(&page_id) else {
            return;
        };
        if dirty {
            frame.dirty.store(true, Ordering::Relaxed);
        }
        let prev = frame.pin_count.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "unpin of page {page_id} with zero pins");
        if prev == 1 {
            state.replacer.put(page_id, ());
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // Flush all dirty pages when the pool is dropped
        let _ = self.flush_all();
    }
}

/// Scoped pin on a buffer-pool page.
///
/// Holds exactly one pin and releases it on drop, carrying the dirty flag
/// accumulated via [`mark_dirty`](Self::mark_dirty). The page latch is taken
/// through [`read`](Self::read)/[`write`](Self::write); latch guards must not
/// outlive the pin guard, which the borrow checker enforces. Moving the
/// guard value transfers the pin to the new owner.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    frame: Arc<Frame>,
    dirty: Cell<bool>,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferPool, frame: Arc<Frame>) -> Self {
        Self {
            pool,
            frame,
            dirty: Cell::new(false),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.frame.page_id
    }

    /// Take the page latch shared, for reading
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.frame.data.read()
    }

    /// Take the page latch exclusive, for mutation
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.frame.data.write()
    }

    /// Record that this guard mutated the page; the unpin will carry it
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.frame.page_id, self.dirty.get());
    }
}

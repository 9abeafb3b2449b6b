use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::page::Page;
use crate::paged_file::{PageId, PagedFile};
use crate::replacer::{ClockReplacer, FrameId, Replacer};

/// Errors returned by the buffer pool manager.
#[derive(Debug, Error)]
pub enum BufferPoolError {
    /// The buffer pool lock was poisoned.
    #[error("buffer pool lock poisoned")]
    LockPoisoned,
    /// The underlying paged file failed.
    #[error("paged file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for buffer pool results.
pub type BufferPoolResult<T> = Result<T, BufferPoolError>;

/// Running count of pin acquisitions and releases, for auditing that every
/// successful pin was matched by exactly one unpin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinStats {
    pub pins: u64,
    pub unpins: u64,
}

/// Guard that provides access to a pinned page while holding the pool lock.
pub struct PageGuard<'a> {
    state: MutexGuard<'a, BufferPoolState>,
    frame_id: FrameId,
}

impl PageGuard<'_> {
    /// Returns the frame id backing this guard.
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

impl Deref for PageGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Self::Target {
        &self.state.pages[self.frame_id]
    }
}

impl DerefMut for PageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state.pages[self.frame_id]
    }
}

struct BufferPoolState {
    file: PagedFile,
    replacer: ClockReplacer,
    pages: Vec<Page>,
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    pin_stats: PinStats,
}

/// Buffer pool manager caching pages of one paged file in a fixed set of
/// frames. Pinned frames are never evicted; dirty victims are written back
/// before their frame is reused.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<Mutex<BufferPoolState>>,
}

impl BufferPoolManager {
    /// Creates a buffer pool with a fixed number of frames over `file`.
    pub fn new(file: PagedFile, pool_size: usize) -> Self {
        let state = BufferPoolState {
            file,
            replacer: ClockReplacer::new(pool_size),
            pages: vec![Page::new(); pool_size],
            page_table: HashMap::new(),
            free_list: (0..pool_size).rev().collect(),
            pin_stats: PinStats::default(),
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock_state(&self) -> BufferPoolResult<MutexGuard<'_, BufferPoolState>> {
        self.inner.lock().map_err(|_| BufferPoolError::LockPoisoned)
    }

    fn evict_if_needed(state: &mut BufferPoolState, frame_id: FrameId) -> BufferPoolResult<()> {
        let (file, pages, page_table) = (
            &mut state.file,
            &mut state.pages,
            &mut state.page_table,
        );
        if let Some(old_page_id) = pages[frame_id].page_id {
            if pages[frame_id].is_dirty {
                file.write_page(old_page_id, pages[frame_id].data())?;
            }
            page_table.remove(&old_page_id);
        }
        Ok(())
    }

    fn take_frame(state: &mut BufferPoolState) -> Option<FrameId> {
        state
            .free_list
            .pop()
            .or_else(|| state.replacer.victim())
    }

    /// Allocates a new page on disk and pins it in the pool. Returns `None`
    /// when every frame is pinned.
    pub fn new_page(&self) -> BufferPoolResult<Option<PageId>> {
        let mut state = self.lock_state()?;
        let Some(frame_id) = Self::take_frame(&mut state) else {
            return Ok(None);
        };
        Self::evict_if_needed(&mut state, frame_id)?;

        let page_id = state.file.allocate_page()?;
        {
            let page = &mut state.pages[frame_id];
            page.reset_memory();
            page.page_id = Some(page_id);
            page.pin_count = 1;
        }
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        state.pin_stats.pins += 1;
        Ok(Some(page_id))
    }

    /// Fetches a page into the pool and pins it, returning a guarded
    /// reference. Returns `None` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> BufferPoolResult<Option<PageGuard<'_>>> {
        let mut state = self.lock_state()?;
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.pages[frame_id].pin_count += 1;
            state.replacer.pin(frame_id);
            state.pin_stats.pins += 1;
            return Ok(Some(PageGuard { state, frame_id }));
        }

        let Some(frame_id) = Self::take_frame(&mut state) else {
            return Ok(None);
        };
        Self::evict_if_needed(&mut state, frame_id)?;
        {
            let state = &mut *state;
            let page = &mut state.pages[frame_id];
            page.reset_memory();
            state.file.read_page(page_id, page.data_mut())?;
            page.page_id = Some(page_id);
            page.pin_count = 1;
        }
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        state.pin_stats.pins += 1;
        Ok(Some(PageGuard { state, frame_id }))
    }

    /// Unpins a page, optionally marking it dirty. Returns `false` if the
    /// page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> BufferPoolResult<bool> {
        let mut state = self.lock_state()?;
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let page = &mut state.pages[frame_id];
        if page.pin_count == 0 {
            return Ok(false);
        }
        if is_dirty {
            page.is_dirty = true;
        }
        page.pin_count -= 1;
        let now_evictable = page.pin_count == 0;
        if now_evictable {
            state.replacer.unpin(frame_id);
        }
        state.pin_stats.unpins += 1;
        Ok(true)
    }

    /// Writes one resident page back to the file, clearing its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> BufferPoolResult<bool> {
        let mut state = self.lock_state()?;
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let state = &mut *state;
        let page = &mut state.pages[frame_id];
        state.file.write_page(page_id, page.data())?;
        page.is_dirty = false;
        Ok(true)
    }

    /// Writes every resident page back to the file and syncs it.
    pub fn flush_all_pages(&self) -> BufferPoolResult<()> {
        let mut state = self.lock_state()?;
        let state = &mut *state;
        for page in state.pages.iter_mut() {
            if let Some(page_id) = page.page_id {
                state.file.write_page(page_id, page.data())?;
                page.is_dirty = false;
            }
        }
        state.file.sync_data()?;
        Ok(())
    }

    /// Pin acquisitions and releases so far.
    pub fn pin_stats(&self) -> BufferPoolResult<PinStats> {
        Ok(self.lock_state()?.pin_stats)
    }

    /// Number of frames currently holding a pinned page.
    pub fn pinned_frames(&self) -> BufferPoolResult<usize> {
        let state = self.lock_state()?;
        Ok(state.pages.iter().filter(|page| page.pin_count > 0).count())
    }
}

//! Usage: Cursor-driven image feed with re-entrancy protection.

use crate::client::api::ApiClient;
use crate::domain::images::{ImagePage, ImageRecord};
use crate::shared::error::{AppError, AppResult, CODE_INVALID_INPUT};
use crate::shared::mutex_ext::MutexExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// What a load attempt did to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// First page (or a refresh) replaced the whole record list.
    Replaced(usize),
    /// A follow-up page was appended.
    Appended(usize),
    /// The cursor was already exhausted; nothing was fetched.
    Exhausted,
    /// Another load was in flight; this trigger was dropped.
    Busy,
}

#[derive(Default)]
struct FeedState {
    records: Vec<ImageRecord>,
    cursor: Option<String>,
    primed: bool,
}

/// Accumulates listing pages in order. Only one fetch runs at a time;
/// overlapping triggers return [`LoadOutcome::Busy`] instead of queueing.
/// A failed fetch leaves records and cursor exactly as they were.
pub struct ImageFeed {
    api: Arc<ApiClient>,
    state: Mutex<FeedState>,
    loading: AtomicBool,
    page_limit: u32,
}

impl ImageFeed {
    pub fn new(api: Arc<ApiClient>, page_limit: u32) -> AppResult<Self> {
        if page_limit < 1 || page_limit > 100 {
            return Err(AppError::new(
                CODE_INVALID_INPUT,
                format!("page limit must be within 1..=100, got {page_limit}"),
            ));
        }
        Ok(Self {
            api,
            state: Mutex::new(FeedState::default()),
            loading: AtomicBool::new(false),
            page_limit,
        })
    }

    /// Fetch the next page and append it. The first call replaces the empty
    /// list; once the cursor runs out, further calls return `Exhausted`
    /// without touching the network.
    pub async fn load_next(&self) -> AppResult<LoadOutcome> {
        let Some(_gate) = LoadGate::acquire(&self.loading) else {
            return Ok(LoadOutcome::Busy);
        };

        let (cursor, primed) = {
            let state = self.state.lock_or_recover();
            (state.cursor.clone(), state.primed)
        };
        if primed && cursor.is_none() {
            return Ok(LoadOutcome::Exhausted);
        }

        let page = self
            .api
            .list_images(cursor.as_deref(), Some(self.page_limit))
            .await?;

        let mut state = self.state.lock_or_recover();
        Ok(apply_page(&mut state, page, !primed))
    }

    /// Drop accumulated state and fetch the first page again.
    pub async fn refresh(&self) -> AppResult<LoadOutcome> {
        let Some(_gate) = LoadGate::acquire(&self.loading) else {
            return Ok(LoadOutcome::Busy);
        };

        let page = self.api.list_images(None, Some(self.page_limit)).await?;

        let mut state = self.state.lock_or_recover();
        Ok(apply_page(&mut state, page, true))
    }

    pub fn records(&self) -> Vec<ImageRecord> {
        self.state.lock_or_recover().records.clone()
    }

    pub fn cursor(&self) -> Option<String> {
        self.state.lock_or_recover().cursor.clone()
    }

    /// True once at least one page has been fetched and no cursor remains.
    pub fn is_exhausted(&self) -> bool {
        let state = self.state.lock_or_recover();
        state.primed && state.cursor.is_none()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }
}

fn apply_page(state: &mut FeedState, page: ImagePage, replace: bool) -> LoadOutcome {
    let count = page.images.len();
    if replace {
        state.records = page.images;
    } else {
        state.records.extend(page.images);
    }
    state.cursor = page.next_cursor;
    state.primed = true;
    if replace {
        LoadOutcome::Replaced(count)
    } else {
        LoadOutcome::Appended(count)
    }
}

/// Releases the loading flag on drop, error paths included.
struct LoadGate<'a> {
    flag: &'a AtomicBool,
}

impl<'a> LoadGate<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(Self { flag })
    }
}

impl Drop for LoadGate<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

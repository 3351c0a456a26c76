//! Client-side controller for one page of a larger server-side collection.
//!
//! [`PaginatedList`] wraps a [`PageFetcher`], keeps the current page and its metadata, and
//! corrects requests for pages that fall outside the collection. Overlapping loads are not
//! serialized: whichever finishes last owns the final state.

use std::{future::Future, sync::Arc};

use shared::{
    error::FetchError,
    protocol::{total_pages, ExtraParams, FetchRequest, FetchResponse, Page},
};
use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{FnFetcher, PageFetcher};

/// Page size used by the logistics backend's list endpoints.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    pub page_size: u32,
    /// Load page 1 as soon as [`PaginatedList::start`] is called.
    pub auto_load: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            auto_load: true,
        }
    }
}

impl ListOptions {
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEvent {
    LoadStarted { page: u32 },
    /// A page was committed; views should scroll back to the top.
    ScrollToTop { page: u32 },
    LoadFailed { page: u32, error: FetchError },
}

/// Point-in-time copy of the controller state.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot<T> {
    pub items: Vec<T>,
    pub is_loading: bool,
    pub last_error: Option<FetchError>,
    pub current_page: u32,
    pub total_count: u64,
    pub total_pages: u32,
    pub page_size: u32,
}

struct ListState<T> {
    items: Vec<T>,
    is_loading: bool,
    last_error: Option<FetchError>,
    current_page: u32,
    total_count: u64,
    last_params: ExtraParams,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            is_loading: false,
            last_error: None,
            current_page: 1,
            total_count: 0,
            last_params: ExtraParams::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryReason {
    PageBeyondTotal,
    EmptyPage,
    InvalidPage,
}

/// Steps of a single `load` call. Only `Initial` may move to `Retry`.
enum LoadStep<T> {
    Initial {
        page: u32,
    },
    Retry {
        page: u32,
        reason: RetryReason,
        original_error: Option<FetchError>,
    },
    Done {
        page: u32,
        items: Vec<T>,
        total_count: u64,
    },
    Failed(FetchError),
}

pub struct PaginatedList<T> {
    fetcher: Arc<dyn PageFetcher<T>>,
    options: ListOptions,
    state: RwLock<ListState<T>>,
    events: broadcast::Sender<ListEvent>,
}

impl<T> PaginatedList<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(fetcher: Arc<dyn PageFetcher<T>>, options: ListOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            fetcher,
            options: ListOptions {
                page_size: options.page_size.max(1),
                ..options
            },
            state: RwLock::new(ListState::default()),
            events,
        })
    }

    pub fn from_fn<F, Fut>(fetch: F, options: ListOptions) -> Arc<Self>
    where
        F: Fn(FetchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FetchResponse<T>, FetchError>> + Send + 'static,
    {
        Self::new(Arc::new(FnFetcher(fetch)), options)
    }

    pub fn page_size(&self) -> u32 {
        self.options.page_size
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListEvent> {
        self.events.subscribe()
    }

    /// Spawns the initial load of page 1 when `auto_load` is enabled.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.options
            .auto_load
            .then(|| self.spawn_load(Some(1), None))
    }

    pub async fn load_page(&self, page: u32) -> Result<Page<T>, FetchError> {
        self.load(page, ExtraParams::new()).await
    }

    /// Loads `page`, correcting out-of-range requests with at most one extra fetch.
    ///
    /// On failure the error is recorded in `last_error`, the items are cleared and the
    /// error is returned. `is_loading` is reset last in every outcome.
    pub async fn load(&self, page: u32, extra: ExtraParams) -> Result<Page<T>, FetchError> {
        let requested = page.max(1);
        self.begin(requested, &extra).await;

        let mut step = LoadStep::Initial { page: requested };
        let outcome = loop {
            step = match step {
                LoadStep::Initial { page } => match self.fetch(page, &extra).await {
                    Ok((items, total_count)) => {
                        match self.correction_for(page, items.len(), total_count) {
                            Some((retry_page, reason)) => LoadStep::Retry {
                                page: retry_page,
                                reason,
                                original_error: None,
                            },
                            None => LoadStep::Done {
                                page,
                                items,
                                total_count,
                            },
                        }
                    }
                    Err(error) if error.is_invalid_page() && page > 1 => LoadStep::Retry {
                        page: 1,
                        reason: RetryReason::InvalidPage,
                        original_error: Some(error),
                    },
                    Err(error) => LoadStep::Failed(error),
                },
                LoadStep::Retry {
                    page,
                    reason,
                    original_error,
                } => {
                    debug!(requested, retry_page = page, ?reason, "retrying list load");
                    match self.fetch(page, &extra).await {
                        Ok((items, total_count)) => LoadStep::Done {
                            page,
                            items,
                            total_count,
                        },
                        Err(error) => LoadStep::Failed(original_error.unwrap_or(error)),
                    }
                }
                LoadStep::Done {
                    page,
                    items,
                    total_count,
                } => break Ok((page, items, total_count)),
                LoadStep::Failed(error) => break Err(error),
            };
        };

        self.finish(requested, outcome).await
    }

    /// Loads `new_page` in the background with the parameters of the previous load.
    pub fn change_page(self: &Arc<Self>, new_page: u32) -> JoinHandle<()> {
        self.spawn_load(Some(new_page), None)
    }

    /// Reloads the current page in the background with the parameters of the previous load.
    pub fn refresh(self: &Arc<Self>) -> JoinHandle<()> {
        self.spawn_load(None, None)
    }

    /// Replaces the query parameters and goes back to page 1.
    pub fn apply_filters(self: &Arc<Self>, extra: ExtraParams) -> JoinHandle<()> {
        self.spawn_load(Some(1), Some(extra))
    }

    /// Overwrites the visible items without refetching.
    pub async fn replace_items(&self, items: Vec<T>) {
        self.state.write().await.items = items;
    }

    pub async fn snapshot(&self) -> ListSnapshot<T> {
        let state = self.state.read().await;
        ListSnapshot {
            items: state.items.clone(),
            is_loading: state.is_loading,
            last_error: state.last_error.clone(),
            current_page: state.current_page,
            total_count: state.total_count,
            total_pages: total_pages(state.total_count, self.options.page_size),
            page_size: self.options.page_size,
        }
    }

    pub async fn items(&self) -> Vec<T> {
        self.state.read().await.items.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.is_loading
    }

    pub async fn last_error(&self) -> Option<FetchError> {
        self.state.read().await.last_error.clone()
    }

    pub async fn current_page(&self) -> u32 {
        self.state.read().await.current_page
    }

    pub async fn total_count(&self) -> u64 {
        self.state.read().await.total_count
    }

    pub async fn total_pages(&self) -> u32 {
        total_pages(self.total_count().await, self.options.page_size)
    }

    fn spawn_load(
        self: &Arc<Self>,
        page: Option<u32>,
        extra: Option<ExtraParams>,
    ) -> JoinHandle<()> {
        let list = Arc::clone(self);
        tokio::spawn(async move {
            let (page, extra) = {
                let state = list.state.read().await;
                (
                    page.unwrap_or(state.current_page),
                    extra.unwrap_or_else(|| state.last_params.clone()),
                )
            };
            if let Err(error) = list.load(page, extra).await {
                warn!(page, %error, "background list load failed");
            }
        })
    }

    async fn begin(&self, page: u32, extra: &ExtraParams) {
        {
            let mut state = self.state.write().await;
            state.is_loading = true;
            state.last_error = None;
            state.last_params = extra.clone();
        }
        let _ = self.events.send(ListEvent::LoadStarted { page });
    }

    async fn fetch(&self, page: u32, extra: &ExtraParams) -> Result<(Vec<T>, u64), FetchError> {
        let request = FetchRequest::new(page, self.options.page_size, extra.clone());
        let response = self.fetcher.fetch_page(request).await?;
        Ok(response.normalize())
    }

    fn correction_for(
        &self,
        page: u32,
        item_count: usize,
        total_count: u64,
    ) -> Option<(u32, RetryReason)> {
        let pages = total_pages(total_count, self.options.page_size);
        if page > pages && pages > 0 {
            return Some((pages, RetryReason::PageBeyondTotal));
        }
        if item_count == 0 && total_count > 0 && page > 1 {
            return Some((1, RetryReason::EmptyPage));
        }
        None
    }

    async fn finish(
        &self,
        requested: u32,
        outcome: Result<(u32, Vec<T>, u64), FetchError>,
    ) -> Result<Page<T>, FetchError> {
        let mut state = self.state.write().await;
        match outcome {
            Ok((page, items, total_count)) => {
                let pages = total_pages(total_count, self.options.page_size);
                let current_page = if page > pages { pages.max(1) } else { page };
                state.items = items.clone();
                state.total_count = total_count;
                state.current_page = current_page;
                state.is_loading = false;
                drop(state);

                if current_page != requested {
                    info!(requested, current_page, total_count, "list page corrected");
                }
                let _ = self.events.send(ListEvent::ScrollToTop { page: current_page });
                Ok(Page {
                    items,
                    total_count,
                    page: current_page,
                })
            }
            Err(error) => {
                state.last_error = Some(error.clone());
                state.items.clear();
                state.is_loading = false;
                drop(state);

                warn!(page = requested, %error, "list load failed");
                let _ = self.events.send(ListEvent::LoadFailed {
                    page: requested,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/list_tests.rs"]
mod tests;

use super::*;
use async_trait::async_trait;
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex as StdMutex,
    time::Duration,
};
use tokio::sync::{oneshot, Mutex};

#[derive(Clone, Copy)]
enum Shape {
    Bare,
    Envelope,
    Wrapped,
}

/// In-memory backend serving records `1..=total` in pages.
struct FakeBackend {
    total: u32,
    shape: Shape,
    not_found_beyond_last: bool,
    hollow_pages: HashSet<u32>,
    page_failures: HashMap<u32, FetchError>,
    fail_all: StdMutex<Option<FetchError>>,
    total_override: StdMutex<Option<u32>>,
    requests: StdMutex<Vec<FetchRequest>>,
}

impl FakeBackend {
    fn with_records(total: u32) -> Self {
        Self {
            total,
            shape: Shape::Envelope,
            not_found_beyond_last: false,
            hollow_pages: HashSet::new(),
            page_failures: HashMap::new(),
            fail_all: StdMutex::new(None),
            total_override: StdMutex::new(None),
            requests: StdMutex::new(Vec::new()),
        }
    }

    fn shaped(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    fn not_found_beyond_last(mut self) -> Self {
        self.not_found_beyond_last = true;
        self
    }

    fn hollow(mut self, page: u32) -> Self {
        self.hollow_pages.insert(page);
        self
    }

    fn failing_page(mut self, page: u32, error: FetchError) -> Self {
        self.page_failures.insert(page, error);
        self
    }

    fn set_fail_all(&self, error: Option<FetchError>) {
        *self.fail_all.lock().expect("lock") = error;
    }

    fn set_total(&self, total: u32) {
        *self.total_override.lock().expect("lock") = Some(total);
    }

    fn requested_pages(&self) -> Vec<u32> {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .map(|request| request.page)
            .collect()
    }

    fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PageFetcher<u32> for FakeBackend {
    async fn fetch_page(&self, request: FetchRequest) -> Result<FetchResponse<u32>, FetchError> {
        self.requests.lock().expect("lock").push(request.clone());

        if let Some(error) = self.fail_all.lock().expect("lock").clone() {
            return Err(error);
        }
        if let Some(error) = self.page_failures.get(&request.page) {
            return Err(error.clone());
        }

        let total = self
            .total_override
            .lock()
            .expect("lock")
            .unwrap_or(self.total);
        let pages = total_pages(u64::from(total), request.page_size);
        if self.not_found_beyond_last && request.page > pages.max(1) {
            return Err(FetchError::http(404, "Not Found").with_detail("Invalid page."));
        }

        let items: Vec<u32> = if self.hollow_pages.contains(&request.page) {
            Vec::new()
        } else {
            let start = (request.page - 1) * request.page_size + 1;
            let end = (request.page * request.page_size).min(total);
            (start..=end).collect()
        };

        Ok(match self.shape {
            Shape::Bare => FetchResponse::Bare(items),
            Shape::Envelope => FetchResponse::envelope(items, u64::from(total)),
            Shape::Wrapped => FetchResponse::wrapped(items, u64::from(total)),
        })
    }
}

fn list_over(backend: &Arc<FakeBackend>, page_size: u32) -> Arc<PaginatedList<u32>> {
    PaginatedList::new(
        Arc::clone(backend) as Arc<dyn PageFetcher<u32>>,
        ListOptions::with_page_size(page_size),
    )
}

fn network_error() -> FetchError {
    FetchError::transport("connection reset by peer")
}

#[tokio::test]
async fn response_shapes_produce_identical_pages() {
    let mut pages = Vec::new();
    for shape in [Shape::Bare, Shape::Envelope, Shape::Wrapped] {
        let backend = Arc::new(FakeBackend::with_records(7).shaped(shape));
        let list = list_over(&backend, 10);
        let page = list.load_page(1).await.expect("load");
        assert_eq!(list.items().await, page.items);
        assert_eq!(list.total_count().await, page.total_count);
        pages.push((page.items, page.total_count));
    }

    assert_eq!(pages[0], (vec![1, 2, 3, 4, 5, 6, 7], 7));
    assert_eq!(pages[0], pages[1]);
    assert_eq!(pages[1], pages[2]);
}

#[tokio::test]
async fn page_past_the_end_is_corrected_with_one_retry() {
    let backend = Arc::new(FakeBackend::with_records(95));
    let list = list_over(&backend, 50);

    let page = list.load_page(5).await.expect("load");

    assert_eq!(page.page, 2);
    assert_eq!(page.items, (51..=95).collect::<Vec<_>>());
    assert_eq!(list.current_page().await, 2);
    assert_eq!(list.items().await.len(), 45);
    assert_eq!(backend.requested_pages(), vec![5, 2]);
}

#[tokio::test]
async fn empty_page_with_data_elsewhere_redirects_to_first_page() {
    let backend = Arc::new(FakeBackend::with_records(30).hollow(3));
    let list = list_over(&backend, 10);

    let page = list.load_page(3).await.expect("load");

    assert_eq!(page.page, 1);
    assert_eq!(list.current_page().await, 1);
    assert_eq!(list.items().await, (1..=10).collect::<Vec<_>>());
    assert_eq!(backend.requested_pages(), vec![3, 1]);
}

#[tokio::test]
async fn retry_never_retries_again() {
    let backend = Arc::new(FakeBackend::with_records(30).hollow(3).hollow(1));
    let list = list_over(&backend, 10);

    let page = list.load_page(3).await.expect("load");

    assert_eq!(page.page, 1);
    assert!(page.items.is_empty());
    assert_eq!(page.total_count, 30);
    assert_eq!(backend.requested_pages(), vec![3, 1]);
}

#[tokio::test]
async fn invalid_page_error_recovers_with_first_page() {
    let backend = Arc::new(FakeBackend::with_records(30).not_found_beyond_last());
    let list = list_over(&backend, 10);

    let page = list.load_page(9).await.expect("recovered");

    assert_eq!(page.page, 1);
    assert_eq!(page.items, (1..=10).collect::<Vec<_>>());
    assert_eq!(list.last_error().await, None);
    assert_eq!(backend.requested_pages(), vec![9, 1]);
}

#[tokio::test]
async fn failed_invalid_page_retry_reports_original_error() {
    let original = FetchError::http(404, "Not Found");
    let backend = Arc::new(
        FakeBackend::with_records(30)
            .failing_page(9, original.clone())
            .failing_page(1, FetchError::http(500, "Internal Server Error")),
    );
    let list = list_over(&backend, 10);

    let error = list.load_page(9).await.expect_err("must fail");

    assert_eq!(error, original);
    assert_eq!(list.last_error().await, Some(original));
    assert!(list.items().await.is_empty());
    assert!(!list.is_loading().await);
    assert_eq!(backend.requested_pages(), vec![9, 1]);
}

#[tokio::test]
async fn invalid_page_on_first_page_is_not_retried() {
    let backend = Arc::new(
        FakeBackend::with_records(0).failing_page(1, FetchError::http(404, "Not Found")),
    );
    let list = list_over(&backend, 10);

    let error = list.load_page(1).await.expect_err("must fail");

    assert_eq!(error.status(), Some(404));
    assert_eq!(backend.requested_pages(), vec![1]);
}

#[tokio::test]
async fn failed_correction_retry_propagates_its_own_error() {
    let retry_error = FetchError::http(503, "Service Unavailable");
    let backend = Arc::new(FakeBackend::with_records(95).failing_page(2, retry_error.clone()));
    let list = list_over(&backend, 50);

    let error = list.load_page(5).await.expect_err("must fail");

    assert_eq!(error, retry_error);
    assert_eq!(list.last_error().await, Some(retry_error));
    assert_eq!(backend.requested_pages(), vec![5, 2]);
}

#[tokio::test]
async fn network_failure_clears_items_and_records_error() {
    let backend = Arc::new(FakeBackend::with_records(20));
    let list = list_over(&backend, 10);
    list.load_page(1).await.expect("initial load");
    assert_eq!(list.items().await.len(), 10);

    backend.set_fail_all(Some(network_error()));
    let error = list.load_page(1).await.expect_err("must fail");

    assert_eq!(error, network_error());
    let snapshot = list.snapshot().await;
    assert_eq!(snapshot.last_error, Some(network_error()));
    assert!(snapshot.items.is_empty());
    assert!(!snapshot.is_loading);
    assert_eq!(backend.requested_pages(), vec![1, 1]);
}

#[tokio::test]
async fn next_load_clears_previous_error() {
    let backend = Arc::new(FakeBackend::with_records(20));
    backend.set_fail_all(Some(network_error()));
    let list = list_over(&backend, 10);
    list.load_page(1).await.expect_err("must fail");
    assert!(list.last_error().await.is_some());

    backend.set_fail_all(None);
    list.load_page(2).await.expect("load");

    assert_eq!(list.last_error().await, None);
    assert_eq!(list.items().await, (11..=20).collect::<Vec<_>>());
}

#[tokio::test]
async fn refresh_twice_yields_identical_state() {
    let backend = Arc::new(FakeBackend::with_records(120));
    let list = list_over(&backend, 50);
    list.load_page(2).await.expect("load");

    list.refresh().await.expect("join");
    let first = list.snapshot().await;
    list.refresh().await.expect("join");
    let second = list.snapshot().await;

    assert_eq!(first, second);
    assert_eq!(first.current_page, 2);
    assert_eq!(first.items.len(), 50);
    assert_eq!(backend.requested_pages(), vec![2, 2, 2]);
}

#[tokio::test]
async fn walks_pages_of_a_partial_collection() {
    let backend = Arc::new(FakeBackend::with_records(120));
    let list = list_over(&backend, 50);

    list.load_page(1).await.expect("page 1");
    let snapshot = list.snapshot().await;
    assert_eq!(snapshot.items.len(), 50);
    assert_eq!(snapshot.total_count, 120);
    assert_eq!(snapshot.current_page, 1);
    assert_eq!(snapshot.total_pages, 3);

    list.load_page(3).await.expect("page 3");
    let snapshot = list.snapshot().await;
    assert_eq!(snapshot.items.len(), 20);
    assert_eq!(snapshot.total_count, 120);
    assert_eq!(snapshot.current_page, 3);

    list.load_page(4).await.expect("page 4");
    let snapshot = list.snapshot().await;
    assert_eq!(snapshot.current_page, 3);
    assert_eq!(snapshot.items, (101..=120).collect::<Vec<_>>());
    assert_eq!(backend.requested_pages(), vec![1, 3, 4, 3]);
}

#[tokio::test]
async fn empty_collection_keeps_page_one() {
    let backend = Arc::new(FakeBackend::with_records(0));
    let list = list_over(&backend, 10);

    let page = list.load_page(4).await.expect("load");

    assert_eq!(page.page, 1);
    assert!(page.items.is_empty());
    assert_eq!(list.total_pages().await, 0);
    assert_eq!(backend.requested_pages(), vec![4]);
}

#[tokio::test]
async fn page_zero_is_treated_as_first_page() {
    let backend = Arc::new(FakeBackend::with_records(5));
    let list = list_over(&backend, 10);

    let page = list.load_page(0).await.expect("load");

    assert_eq!(page.page, 1);
    assert_eq!(backend.requested_pages(), vec![1]);
}

#[tokio::test]
async fn shrinking_collection_corrects_on_refresh() {
    let backend = Arc::new(FakeBackend::with_records(120));
    let list = list_over(&backend, 50);
    list.load_page(3).await.expect("load");

    backend.set_total(60);
    list.refresh().await.expect("join");

    assert_eq!(list.current_page().await, 2);
    assert_eq!(list.items().await, (51..=60).collect::<Vec<_>>());
}

#[tokio::test]
async fn change_page_and_refresh_reuse_last_parameters() {
    let backend = Arc::new(FakeBackend::with_records(120));
    let list = list_over(&backend, 50);
    let mut filters = ExtraParams::new();
    filters.insert("status".into(), json!("in_transit"));

    list.load(1, filters.clone()).await.expect("load");
    list.change_page(2).await.expect("join");
    list.refresh().await.expect("join");

    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|request| request.extra == filters));
    assert!(requests.iter().all(|request| request.page_size == 50));
    assert_eq!(backend.requested_pages(), vec![1, 2, 2]);
}

#[tokio::test]
async fn apply_filters_restarts_from_first_page() {
    let backend = Arc::new(FakeBackend::with_records(120));
    let list = list_over(&backend, 50);
    list.load_page(3).await.expect("load");

    let mut filters = ExtraParams::new();
    filters.insert("transport_agency".into(), json!(4));
    list.apply_filters(filters.clone()).await.expect("join");

    let last = backend.requests().pop().expect("request");
    assert_eq!(last.page, 1);
    assert_eq!(last.extra, filters);
    assert_eq!(list.current_page().await, 1);
}

#[tokio::test]
async fn change_page_failure_surfaces_through_state() {
    let backend = Arc::new(FakeBackend::with_records(120));
    backend.set_fail_all(Some(network_error()));
    let list = list_over(&backend, 50);

    list.change_page(2).await.expect("join");

    assert_eq!(list.last_error().await, Some(network_error()));
    assert!(!list.is_loading().await);
}

#[tokio::test]
async fn start_respects_auto_load() {
    let backend = Arc::new(FakeBackend::with_records(3));
    let list = list_over(&backend, 10);
    list.start().expect("auto load").await.expect("join");
    assert_eq!(list.items().await, vec![1, 2, 3]);

    let backend = Arc::new(FakeBackend::with_records(3));
    let list = PaginatedList::new(
        Arc::clone(&backend) as Arc<dyn PageFetcher<u32>>,
        ListOptions {
            page_size: 10,
            auto_load: false,
        },
    );
    assert!(list.start().is_none());
    assert!(backend.requested_pages().is_empty());
}

#[tokio::test]
async fn replace_items_overwrites_without_fetching() {
    let backend = Arc::new(FakeBackend::with_records(3));
    let list = list_over(&backend, 10);
    list.load_page(1).await.expect("load");

    list.replace_items(vec![2, 3]).await;

    assert_eq!(list.items().await, vec![2, 3]);
    assert_eq!(list.total_count().await, 3);
    assert_eq!(backend.requested_pages(), vec![1]);
}

#[tokio::test]
async fn committed_pages_emit_scroll_to_top() {
    let backend = Arc::new(FakeBackend::with_records(95));
    let list = list_over(&backend, 50);
    let mut events = list.subscribe();

    list.load_page(5).await.expect("load");

    assert_eq!(events.recv().await.expect("event"), ListEvent::LoadStarted { page: 5 });
    assert_eq!(events.recv().await.expect("event"), ListEvent::ScrollToTop { page: 2 });
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn failed_loads_emit_failure_without_scrolling() {
    let backend = Arc::new(FakeBackend::with_records(95));
    backend.set_fail_all(Some(network_error()));
    let list = list_over(&backend, 50);
    let mut events = list.subscribe();

    list.load_page(1).await.expect_err("must fail");

    assert_eq!(events.recv().await.expect("event"), ListEvent::LoadStarted { page: 1 });
    assert_eq!(
        events.recv().await.expect("event"),
        ListEvent::LoadFailed {
            page: 1,
            error: network_error(),
        }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn closure_fetchers_drive_the_controller() {
    let list = PaginatedList::<u32>::from_fn(
        |request: FetchRequest| async move {
            Ok::<_, FetchError>(crate::decode_response::<u32>(json!({
                "data": {"results": [request.page * 10], "count": 3}
            })))
        },
        ListOptions::with_page_size(1),
    );

    let page = list.load_page(3).await.expect("load");

    assert_eq!(page.items, vec![30]);
    assert_eq!(page.total_count, 3);
    assert_eq!(list.page_size(), 1);
}

#[tokio::test]
async fn non_list_results_still_redirect_to_first_page() {
    let requested = Arc::new(StdMutex::new(Vec::new()));
    let seen = Arc::clone(&requested);
    let list = PaginatedList::<u32>::from_fn(
        move |request: FetchRequest| {
            seen.lock().expect("requests").push(request.page);
            let body = if request.page == 1 {
                json!({"results": [1, 2, 3], "count": 30})
            } else {
                json!({"results": {"unexpected": true}, "count": 30})
            };
            futures::future::ready(Ok::<_, FetchError>(crate::decode_response::<u32>(body)))
        },
        ListOptions::with_page_size(10),
    );

    let page = list.load_page(3).await.expect("load");

    assert_eq!(page.page, 1);
    assert_eq!(page.items, vec![1, 2, 3]);
    assert_eq!(page.total_count, 30);
    assert_eq!(list.current_page().await, 1);
    assert_eq!(list.total_count().await, 30);
    assert_eq!(*requested.lock().expect("requests"), vec![3, 1]);
}

/// Fetcher whose responses are released manually, one page at a time.
struct GatedBackend {
    gates: Mutex<HashMap<u32, oneshot::Receiver<FetchResponse<u32>>>>,
}

#[async_trait]
impl PageFetcher<u32> for GatedBackend {
    async fn fetch_page(&self, request: FetchRequest) -> Result<FetchResponse<u32>, FetchError> {
        let gate = self
            .gates
            .lock()
            .await
            .remove(&request.page)
            .ok_or_else(|| FetchError::transport(format!("no gate for page {}", request.page)))?;
        gate.await
            .map_err(|_| FetchError::transport("gate dropped"))
    }
}

async fn wait_until_loading(list: &PaginatedList<u32>) {
    for _ in 0..100 {
        if list.is_loading().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("load never started");
}

#[tokio::test]
async fn overlapping_loads_are_last_write_wins() {
    let (first_tx, first_rx) = oneshot::channel();
    let (second_tx, second_rx) = oneshot::channel();
    let backend = Arc::new(GatedBackend {
        gates: Mutex::new(HashMap::from([(1, first_rx), (2, second_rx)])),
    });
    let list = PaginatedList::new(
        backend as Arc<dyn PageFetcher<u32>>,
        ListOptions::with_page_size(2),
    );

    let slow = {
        let list = Arc::clone(&list);
        tokio::spawn(async move { list.load_page(1).await })
    };
    wait_until_loading(&list).await;
    let fast = {
        let list = Arc::clone(&list);
        tokio::spawn(async move { list.load_page(2).await })
    };

    second_tx
        .send(FetchResponse::envelope(vec![3, 4], 4))
        .expect("release page 2");
    fast.await.expect("join").expect("page 2");
    assert_eq!(list.current_page().await, 2);
    // The slower request is still in flight but the flag already reads idle.
    assert!(!list.is_loading().await);

    first_tx
        .send(FetchResponse::envelope(vec![1, 2], 4))
        .expect("release page 1");
    slow.await.expect("join").expect("page 1");

    let snapshot = list.snapshot().await;
    assert_eq!(snapshot.current_page, 1);
    assert_eq!(snapshot.items, vec![1, 2]);
}

#[tokio::test]
async fn concurrent_loads_both_complete() {
    let backend = Arc::new(FakeBackend::with_records(120));
    let list = list_over(&backend, 50);

    let (first, second) = futures::future::join(list.load_page(1), list.load_page(3)).await;

    assert_eq!(first.expect("page 1").items.len(), 50);
    assert_eq!(second.expect("page 3").items.len(), 20);
    assert!(!list.is_loading().await);
    let mut pages = backend.requested_pages();
    pages.sort_unstable();
    assert_eq!(pages, vec![1, 3]);
}

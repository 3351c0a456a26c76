use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    error::FetchError,
    protocol::{FetchRequest, FetchResponse},
};
use tracing::warn;

pub mod http;
pub mod list;
pub mod operation;

pub use http::{HttpFetcherError, HttpPageFetcher};
pub use list::{ListEvent, ListOptions, ListSnapshot, PaginatedList, DEFAULT_PAGE_SIZE};
pub use operation::{AsyncOperation, Notice, OperationOptions, OperationOverrides};

/// Source of pages for a [`PaginatedList`].
#[async_trait]
pub trait PageFetcher<T>: Send + Sync {
    async fn fetch_page(&self, request: FetchRequest) -> Result<FetchResponse<T>, FetchError>;
}

/// Adapts an async closure into a [`PageFetcher`].
pub struct FnFetcher<F>(pub F);

#[async_trait]
impl<T, F, Fut> PageFetcher<T> for FnFetcher<F>
where
    T: Send + 'static,
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FetchResponse<T>, FetchError>> + Send + 'static,
{
    async fn fetch_page(&self, request: FetchRequest) -> Result<FetchResponse<T>, FetchError> {
        (self.0)(request).await
    }
}

/// Decodes a JSON list body, treating any unrecognized shape as an empty page.
pub fn decode_response<T: DeserializeOwned>(value: Value) -> FetchResponse<T> {
    match FetchResponse::from_value(value) {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "list response has an unrecognized shape; treating it as empty");
            FetchResponse::empty()
        }
    }
}

/// Like [`decode_response`] but starting from raw body bytes.
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> FetchResponse<T> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => decode_response(value),
        Err(error) => {
            warn!(%error, bytes = body.len(), "list response is not JSON; treating it as empty");
            FetchResponse::empty()
        }
    }
}

use std::{marker::PhantomData, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use shared::{
    domain::Resource,
    error::{ErrorBody, FetchError},
    protocol::{FetchRequest, FetchResponse},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{decode_body, PageFetcher};

#[derive(Debug, Error)]
pub enum HttpFetcherError {
    #[error("invalid list endpoint '{url}': {source}")]
    InvalidEndpoint {
        url: String,
        source: url::ParseError,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Fetches pages from a REST list endpoint (`GET {base}{path}?page=..&page_size=..`).
pub struct HttpPageFetcher<T> {
    http: Client,
    endpoint: Url,
    _items: PhantomData<fn() -> T>,
}

impl<T> HttpPageFetcher<T> {
    pub fn new(
        base_url: &str,
        resource: Resource,
        timeout: Duration,
    ) -> Result<Self, HttpFetcherError> {
        let http = Client::builder().timeout(timeout).build()?;
        Self::with_client(http, base_url, resource.path())
    }

    pub fn with_client(http: Client, base_url: &str, path: &str) -> Result<Self, HttpFetcherError> {
        let endpoint = endpoint_url(base_url, path)?;
        Ok(Self {
            http,
            endpoint,
            _items: PhantomData,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn transport_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: self.endpoint.to_string(),
            }
        } else {
            FetchError::transport(error.to_string())
        }
    }
}

fn endpoint_url(base_url: &str, path: &str) -> Result<Url, HttpFetcherError> {
    let joined = format!(
        "{}/{}",
        base_url.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|source| HttpFetcherError::InvalidEndpoint {
        url: joined,
        source,
    })
}

#[async_trait]
impl<T> PageFetcher<T> for HttpPageFetcher<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch_page(&self, request: FetchRequest) -> Result<FetchResponse<T>, FetchError> {
        debug!(endpoint = %self.endpoint, page = request.page, "fetching list page");
        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&request.query_pairs())
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let message = format!("request failed with status code {}", status.as_u16());
            let error = FetchError::http(status.as_u16(), message);
            return Err(match serde_json::from_slice::<ErrorBody>(&body) {
                Ok(body) => error.with_body(body),
                Err(_) => error,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|error| self.transport_error(error))?;
        Ok(decode_body(&body))
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;

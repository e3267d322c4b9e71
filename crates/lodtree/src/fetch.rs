//! Network collaborator interface.
//!
//! The engine never talks to the network directly. It asks a [`Fetcher`]
//! for whole files, byte ranges, or JSON documents, and asks it whether a
//! failure is worth retrying. [`HttpFetcher`] is the reqwest-backed default.

use std::{future::Future, pin::Pin};

use lodtree_decode::ByteRange;
use serde_json::Value;

use crate::error::{Error, Result};

/// Future type returned by fetchers.
pub type FetchFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Retrieves remote bytes and documents.
pub trait Fetcher: Send + Sync {
    /// Fetch a whole file, or the given range of it.
    fn fetch_range(&self, url: &str, range: Option<ByteRange>) -> FetchFuture<'_, Vec<u8>>;

    /// Fetch and parse a JSON document.
    fn fetch_json(&self, url: &str) -> FetchFuture<'_, Value>;

    /// Whether a failure is permanent and must never be retried.
    ///
    /// The default treats HTTP 404 and 410 as permanent and everything else
    /// as transient.
    fn is_definitive(&self, error: &Error) -> bool {
        matches!(error, Error::HttpStatus { status: 404 | 410, .. })
    }
}

/// HTTP fetcher built on reqwest.
///
/// # Example
///
/// ```ignore
/// let fetcher = HttpFetcher::new().with_header("Authorization", "Bearer abc");
/// let bytes = fetcher.fetch_range(url, Some(ByteRange::new(0, 22))).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    http: reqwest::Client,
    headers: Vec<(String, String)>,
}

impl HttpFetcher {
    /// Create a fetcher with a default reqwest client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher around an existing reqwest client.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            headers: Vec::new(),
        }
    }

    /// Add a header sent with every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    async fn send(&self, url: &str, range: Option<ByteRange>) -> Result<reqwest::Response> {
        let mut request = self.http.get(url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range.header_value());
        }

        tracing::debug!(url, ?range, "fetching");

        let response = request.send().await.map_err(|e| Error::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_range(&self, url: &str, range: Option<ByteRange>) -> FetchFuture<'_, Vec<u8>> {
        let url = url.to_string();
        Box::pin(async move {
            let response = self.send(&url, range).await?;
            let data = response.bytes().await.map_err(|e| Error::Http {
                url: url.clone(),
                message: e.to_string(),
            })?;
            Ok(data.to_vec())
        })
    }

    fn fetch_json(&self, url: &str) -> FetchFuture<'_, Value> {
        let url = url.to_string();
        Box::pin(async move {
            let response = self.send(&url, None).await?;
            response.json::<Value>().await.map_err(|e| Error::Json {
                context: "json response",
                message: e.to_string(),
            })
        })
    }
}

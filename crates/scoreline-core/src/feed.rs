//! Upstream feed clients.
//!
//! Two independent HTTP sources are polled:
//!
//! | Feed | Body | Payload |
//! |------|------|---------|
//! | mappings | `{ "mappings"?: string }` | `id:value` pairs joined by `;` |
//! | events | `{ "odds"?: string }` | CSV rows joined by newlines |
//!
//! [`MappingFeed`] and [`EventFeed`] abstract the source so the sync task
//! and the reconciliation engine can be driven by scripted feeds in tests.
//! The HTTP implementations share one `reqwest` client.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::FeedError;

/// Body of the mapping feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MappingsPayload {
    /// `;`-separated `id:value` pairs.
    pub mappings: Option<String>,
}

/// Body of the event feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OddsPayload {
    /// Newline-separated event rows.
    pub odds: Option<String>,
}

/// A source of raw mapping payloads.
pub trait MappingFeed: Send + Sync + 'static {
    /// Fetch the current mapping payload.
    fn fetch_mappings(&self) -> impl Future<Output = Result<MappingsPayload, FeedError>> + Send;
}

/// A source of raw event feed payloads.
pub trait EventFeed: Send + Sync + 'static {
    /// Fetch the current event payload.
    fn fetch_events(&self) -> impl Future<Output = Result<OddsPayload, FeedError>> + Send;
}

/// Build the shared HTTP client used by both feeds.
///
/// # Errors
///
/// Returns [`FeedError::Request`] if the TLS backend cannot be initialized.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, FeedError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| FeedError::Request {
            url: String::from("<client>"),
            source,
        })
}

/// GET `url` and decode the JSON body as `T`, logging failures.
async fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, FeedError> {
    let result = async {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|source| FeedError::Request {
                url: url.to_owned(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|source| FeedError::Decode {
            url: url.to_owned(),
            source,
        })
    }
    .await;

    if let Err(err) = &result {
        warn!(url, error = %err, "Failed to fetch data");
    }
    result
}

/// Mapping feed served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMappingFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpMappingFeed {
    /// Create a feed reading `url` with `client`.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// The polled URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl MappingFeed for HttpMappingFeed {
    fn fetch_mappings(&self) -> impl Future<Output = Result<MappingsPayload, FeedError>> + Send {
        get_json(&self.client, &self.url)
    }
}

/// Event feed served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEventFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpEventFeed {
    /// Create a feed reading `url` with `client`.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// The polled URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventFeed for HttpEventFeed {
    fn fetch_events(&self) -> impl Future<Output = Result<OddsPayload, FeedError>> + Send {
        get_json(&self.client, &self.url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn payloads_tolerate_missing_fields() {
        let mappings: MappingsPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(mappings.mappings, None);

        let odds: OddsPayload = serde_json::from_str(r#"{"odds":"e1,s1"}"#).unwrap();
        assert_eq!(odds.odds.as_deref(), Some("e1,s1"));
    }

    #[tokio::test]
    async fn unreachable_feed_is_a_request_error() {
        let client = http_client(Duration::from_millis(200)).unwrap();
        let feed = HttpEventFeed::new(client, "http://127.0.0.1:9/api/state");
        let err = feed.fetch_events().await.unwrap_err();
        assert!(matches!(err, FeedError::Request { .. }));
    }
}

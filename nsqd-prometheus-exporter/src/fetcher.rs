//! HTTP client for the nsqd stats API.

use reqwest::{Client, StatusCode};
use tracing::trace;

use crate::error::FetchError;
use crate::stats::{self, ResponseShape, Snapshot};

/// Path and query appended to the nsqd base URL.
pub const STATS_PATH: &str = "/stats?format=json";

/// Fetches and decodes nsqd stats.
///
/// One request per call and no retries; the poll loop decides what a
/// failure means.
#[derive(Debug, Clone)]
pub struct StatsClient {
    client: Client,
    url: String,
}

impl StatsClient {
    /// Create a client for the nsqd instance at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client reusing an existing `reqwest` client.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: stats_url(base_url),
        }
    }

    /// Full URL that [`StatsClient::fetch`] requests.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch one snapshot.
    pub async fn fetch(&self) -> Result<Snapshot, FetchError> {
        self.fetch_with_shape().await.map(|(_, snapshot)| snapshot)
    }

    /// Fetch one snapshot along with the wire shape it arrived in.
    pub async fn fetch_with_shape(&self) -> Result<(ResponseShape, Snapshot), FetchError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FetchError::transport(&self.url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::transport(&self.url, e))?;

        trace!(url = %self.url, bytes = body.len(), "Fetched nsqd stats");

        stats::decode(&body)
    }
}

/// Build the stats URL for an nsqd base URL.
pub fn stats_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), STATS_PATH)
}

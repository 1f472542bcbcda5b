use std::time::{Duration, Instant};

use anyhow::Context as _;

use super::{Query, Transport};

/// Relay used when `HISTSYNC_SERVER` is unset.
pub const DEFAULT_SERVER: &str = "https://api.histsync.dev";

/// Header carrying the calling client build.
pub const VERSION_HEADER: &str = "X-Histsync-Version";

/// Request timeout for uploads and bootstrap downloads.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Base URL of the relay: `HISTSYNC_SERVER` if set and non-empty, else
/// [`DEFAULT_SERVER`].
pub fn server_base_url() -> String {
    std::env::var("HISTSYNC_SERVER")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string())
}

/// Whether `HISTSYNC_SIMULATE_NETWORK_ERROR` asks every call to fail as if
/// offline.
fn simulate_network_error() -> bool {
    std::env::var("HISTSYNC_SIMULATE_NETWORK_ERROR").is_ok_and(|v| !v.is_empty())
}

/// Blocking HTTP transport to the relay.
pub struct ApiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    version: String,
}

impl ApiClient {
    /// Build a client for the relay at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed (e.g., invalid TLS config).
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| anyhow::anyhow!("could not build HTTP client: {e}"))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            version: format!("v{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Build a client for [`server_base_url`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(&server_base_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn finish(
        &self,
        method: &str,
        url: &str,
        started: Instant,
        resp: reqwest::blocking::Response,
    ) -> anyhow::Result<Vec<u8>> {
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("{method} {url} failed: status_code={}", status.as_u16());
        }
        let body = resp
            .bytes()
            .with_context(|| format!("failed to read response body from {method} {url}"))?;
        tracing::debug!(
            method,
            url,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            version = %self.version,
            "relay call finished"
        );
        Ok(body.to_vec())
    }
}

impl Transport for ApiClient {
    fn get(&self, path: &str, query: Query<'_>) -> anyhow::Result<Vec<u8>> {
        if simulate_network_error() {
            anyhow::bail!("simulated network error: dns error: failed to lookup address information");
        }
        let started = Instant::now();
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .header(VERSION_HEADER, &self.version)
            .send()
            .with_context(|| format!("failed to GET {url}"))?;
        self.finish("GET", &url, started, resp)
    }

    fn post(
        &self,
        path: &str,
        query: Query<'_>,
        content_type: &str,
        body: Vec<u8>,
    ) -> anyhow::Result<Vec<u8>> {
        if simulate_network_error() {
            anyhow::bail!("simulated network error: dns error: failed to lookup address information");
        }
        let started = Instant::now();
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .query(query)
            .header(VERSION_HEADER, &self.version)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .with_context(|| format!("failed to POST {url}"))?;
        self.finish("POST", &url, started, resp)
    }
}

//! Upstream HTTP fetch utilities + profile/keyword storage collaborators for Socian.

pub mod profiles;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use socian_core::ErrorKind;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info_span, warn, Instrument};

pub use profiles::{KeywordSource, MemoryProfileStore, PgStore, ProfileStore, StaticKeywords, StoreError};

pub const CRATE_NAME: &str = "socian-storage";

/// Which upstream base address a request is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpstreamRequest {
    pub endpoint: Endpoint,
    pub path: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
}

impl UpstreamRequest {
    pub fn new(endpoint: Endpoint, path: impl Into<String>) -> Self {
        Self {
            endpoint,
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for UpstreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.endpoint, self.path)?;
        for (i, (key, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Requests that could not even be built are never resent; everything else
/// that fails below the HTTP status layer is treated as transient.
pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_builder() {
        RetryDisposition::NonRetryable
    } else {
        RetryDisposition::Retryable
    }
}

/// Fixed-delay resend policy for transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Attempts are counted from 1; a zero bound still sends once.
    pub fn allows_another(&self, attempts_made: usize) -> bool {
        attempts_made < self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub primary_base_url: String,
    pub secondary_base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            primary_base_url: "https://www.instagram.com/".to_string(),
            secondary_base_url: "https://i.instagram.com/api/v1/".to_string(),
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport failure after {attempts} attempt(s) for {url}: {message}")]
    Transport {
        url: String,
        attempts: usize,
        message: String,
    },
    #[error("http status {status} for {url}")]
    Rejected { status: u16, url: String, body: String },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Rejected { .. } => ErrorKind::Rejection,
        }
    }
}

/// Source of parsed upstream payloads.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    async fn fetch_json(&self, request: &UpstreamRequest) -> Result<JsonValue, FetchError>;
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    primary_base_url: String,
    secondary_base_url: String,
    in_flight: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            primary_base_url: config.primary_base_url,
            secondary_base_url: config.secondary_base_url,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            retry: config.retry,
        })
    }

    pub fn url_for(&self, request: &UpstreamRequest) -> String {
        let base = match request.endpoint {
            Endpoint::Primary => &self.primary_base_url,
            Endpoint::Secondary => &self.secondary_base_url,
        };
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        )
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<JsonValue, FetchError> {
        let mut attempts = 0usize;

        loop {
            attempts += 1;

            let failure = match self.client.get(url).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if !status.is_success() {
                        let final_url = resp.url().to_string();
                        let body = resp.text().await.unwrap_or_default();
                        warn!(status = status.as_u16(), url = %final_url, %body, "upstream rejected request");
                        return Err(FetchError::Rejected {
                            status: status.as_u16(),
                            url: final_url,
                            body,
                        });
                    }

                    match resp.bytes().await {
                        Ok(bytes) => match serde_json::from_slice::<JsonValue>(&bytes) {
                            Ok(payload) => return Ok(payload),
                            Err(err) => format!("malformed response body: {err}"),
                        },
                        Err(err) => format!("reading response body: {err}"),
                    }
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable {
                        return Err(FetchError::Transport {
                            url: url.to_string(),
                            attempts,
                            message: err.to_string(),
                        });
                    }
                    err.to_string()
                }
            };

            if !self.retry.allows_another(attempts) {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    attempts,
                    message: failure,
                });
            }

            warn!(
                attempts,
                max_attempts = self.retry.max_attempts,
                delay_secs = self.retry.delay.as_secs_f64(),
                error = %failure,
                "transport failure; waiting before resend"
            );
            tokio::time::sleep(self.retry.delay).await;
        }
    }
}

#[async_trait]
impl UpstreamFetcher for HttpFetcher {
    async fn fetch_json(&self, request: &UpstreamRequest) -> Result<JsonValue, FetchError> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .expect("semaphore not closed");

        let url = self.url_for(request);
        let span = info_span!("upstream_fetch", endpoint = ?request.endpoint, path = %request.path);
        self.fetch_with_retry(&url, &request.query)
            .instrument(span)
            .await
    }
}

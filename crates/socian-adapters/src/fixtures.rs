//! Recorded upstream exchanges, replayed without network access.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use socian_storage::{FetchError, UpstreamFetcher, UpstreamRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureBundle {
    pub fixture_id: String,
    pub captured_from: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub exchanges: Vec<RecordedExchange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedExchange {
    pub request: UpstreamRequest,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub body: JsonValue,
}

fn default_status() -> u16 {
    200
}

pub fn load_fixture_bundle(path: impl AsRef<Path>) -> Result<FixtureBundle> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Serves recorded payloads keyed by the exact request.
///
/// Unrecorded requests are rejected with a 404 so a replay behaves like an
/// upstream that does not know the resource.
#[derive(Debug, Default)]
pub struct FixtureFetcher {
    exchanges: HashMap<UpstreamRequest, RecordedExchange>,
    served: Mutex<Vec<UpstreamRequest>>,
}

impl FixtureFetcher {
    pub fn new(exchanges: Vec<RecordedExchange>) -> Self {
        Self {
            exchanges: exchanges
                .into_iter()
                .map(|exchange| (exchange.request.clone(), exchange))
                .collect(),
            served: Mutex::new(Vec::new()),
        }
    }

    pub fn from_bundle(bundle: &FixtureBundle) -> Self {
        Self::new(bundle.exchanges.clone())
    }

    pub fn respond(mut self, request: UpstreamRequest, body: JsonValue) -> Self {
        self.exchanges.insert(
            request.clone(),
            RecordedExchange {
                request,
                status: 200,
                body,
            },
        );
        self
    }

    pub fn reject(mut self, request: UpstreamRequest, status: u16) -> Self {
        self.exchanges.insert(
            request.clone(),
            RecordedExchange {
                request,
                status,
                body: JsonValue::Null,
            },
        );
        self
    }

    /// Requests answered so far, in call order.
    pub fn served(&self) -> Vec<UpstreamRequest> {
        self.served
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl UpstreamFetcher for FixtureFetcher {
    async fn fetch_json(&self, request: &UpstreamRequest) -> Result<JsonValue, FetchError> {
        self.served
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        match self.exchanges.get(request) {
            Some(exchange) if (200..300).contains(&exchange.status) => Ok(exchange.body.clone()),
            Some(exchange) => Err(FetchError::Rejected {
                status: exchange.status,
                url: request.to_string(),
                body: exchange.body.to_string(),
            }),
            None => Err(FetchError::Rejected {
                status: 404,
                url: request.to_string(),
                body: "no recorded exchange".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use socian_core::ErrorKind;
    use socian_storage::Endpoint;

    #[tokio::test]
    async fn replays_recorded_body_and_rejects_unknown_requests() {
        let known = UpstreamRequest::new(Endpoint::Primary, "ana/").with_query("__a", "1");
        let fetcher = FixtureFetcher::default().respond(known.clone(), json!({ "ok": true }));

        assert_eq!(fetcher.fetch_json(&known).await.unwrap(), json!({ "ok": true }));

        let unknown = UpstreamRequest::new(Endpoint::Secondary, "ana/");
        let err = fetcher.fetch_json(&unknown).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rejection);
        assert_eq!(fetcher.served(), vec![known, unknown]);
    }

    #[test]
    fn bundle_exchange_defaults_to_success_status() {
        let bundle: FixtureBundle = serde_json::from_value(json!({
            "fixture_id": "t",
            "captured_from": "test",
            "exchanges": [
                { "request": { "endpoint": "secondary", "path": "users/1/info" }, "body": {} }
            ]
        }))
        .unwrap();
        assert_eq!(bundle.exchanges[0].status, 200);
        assert!(bundle.exchanges[0].request.query.is_empty());
    }
}

//! Upstream source adapters: hashtag discovery, post-owner extraction and
//! profile normalization.

pub mod fixtures;
pub mod normalize;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use socian_core::{CanonicalProfile, ErrorKind, Hashtag, Keyword, OwnerId, PLATFORM_INSTAGRAM};
use socian_storage::{Endpoint, FetchError, UpstreamFetcher, UpstreamRequest};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use fixtures::{load_fixture_bundle, FixtureBundle, FixtureFetcher, RecordedExchange};
pub use normalize::{engagement_rate, project_profile, MediaStats, RawProfile};

pub const CRATE_NAME: &str = "socian-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected {operation} payload: {detail}")]
    Payload {
        operation: &'static str,
        detail: String,
    },
}

impl AdapterError {
    pub fn payload(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Payload {
            operation,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(err) => err.kind(),
            Self::Payload { .. } => ErrorKind::Payload,
        }
    }
}

/// The four upstream read calls the crawl makes.
#[derive(Debug, Clone, Copy)]
pub enum UpstreamOperation<'a> {
    Search(&'a Keyword),
    HashtagFeed(&'a Hashtag),
    UserInfo(&'a OwnerId),
    UserFeed(&'a str),
}

impl UpstreamOperation<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search(_) => "search",
            Self::HashtagFeed(_) => "hashtag_feed",
            Self::UserInfo(_) => "user_info",
            Self::UserFeed(_) => "user_feed",
        }
    }

    pub fn request(&self) -> UpstreamRequest {
        match self {
            Self::Search(keyword) => UpstreamRequest::new(Endpoint::Primary, "web/search/topsearch/")
                .with_query("query", keyword.as_str())
                .with_query("context", "hashtag"),
            Self::HashtagFeed(hashtag) => {
                UpstreamRequest::new(Endpoint::Primary, format!("explore/tags/{hashtag}/"))
                    .with_query("__a", "1")
            }
            Self::UserInfo(owner) => {
                UpstreamRequest::new(Endpoint::Secondary, format!("users/{owner}/info"))
            }
            Self::UserFeed(username) => {
                UpstreamRequest::new(Endpoint::Primary, format!("{username}/"))
                    .with_query("__a", "1")
            }
        }
    }
}

/// Crawl stages a platform adapter provides to the orchestrator.
///
/// Every stage absorbs its own failures: `None` or a shorter list means the
/// unit of work was skipped and already logged.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    fn platform(&self) -> &'static str;

    async fn resolve_hashtags(&self, keyword: &Keyword) -> Option<Vec<Hashtag>>;

    async fn extract_owners(&self, hashtags: &[Hashtag]) -> Vec<OwnerId>;

    async fn normalize(&self, owner: &OwnerId) -> Option<CanonicalProfile>;
}

fn json_path<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_path(value, path)?.as_str()
}

/// Upstream ids arrive as strings or bare numbers depending on the endpoint.
fn json_id(value: &JsonValue, path: &[&str]) -> Option<String> {
    match json_path(value, path)? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Hashtag names from a top-search payload, in upstream order.
pub fn parse_search_hashtags(payload: &JsonValue) -> Result<Vec<Hashtag>, AdapterError> {
    let entries = payload
        .get("hashtags")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| AdapterError::payload("search", "missing hashtags array"))?;

    Ok(entries
        .iter()
        .filter_map(|entry| json_str(entry, &["hashtag", "name"]))
        .map(Hashtag::new)
        .collect())
}

/// Owner ids of every top post in a hashtag feed payload.
pub fn parse_top_post_owners(payload: &JsonValue) -> Result<Vec<OwnerId>, AdapterError> {
    let edges = json_path(
        payload,
        &["graphql", "hashtag", "edge_hashtag_to_top_posts", "edges"],
    )
    .and_then(JsonValue::as_array)
    .ok_or_else(|| AdapterError::payload("hashtag_feed", "missing top posts edges"))?;

    Ok(edges
        .iter()
        .filter_map(|edge| json_id(edge, &["node", "owner", "id"]))
        .map(OwnerId::new)
        .collect())
}

pub fn parse_info_username(payload: &JsonValue) -> Result<String, AdapterError> {
    json_str(payload, &["user", "username"])
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| AdapterError::payload("user_info", "missing user.username"))
}

pub struct InstagramSource {
    fetcher: Arc<dyn UpstreamFetcher>,
    hashtag_limit: Option<usize>,
}

impl InstagramSource {
    pub fn new(fetcher: Arc<dyn UpstreamFetcher>) -> Self {
        Self {
            fetcher,
            hashtag_limit: None,
        }
    }

    /// Stops owner extraction after this many hashtags were fetched successfully.
    pub fn with_hashtag_limit(mut self, limit: Option<usize>) -> Self {
        self.hashtag_limit = limit;
        self
    }

    async fn fetch(&self, operation: UpstreamOperation<'_>) -> Result<JsonValue, AdapterError> {
        let request = operation.request();
        debug!(operation = operation.name(), %request, "fetching upstream");
        Ok(self.fetcher.fetch_json(&request).await?)
    }

    pub async fn try_resolve_hashtags(&self, keyword: &Keyword) -> Result<Vec<Hashtag>, AdapterError> {
        let payload = self.fetch(UpstreamOperation::Search(keyword)).await?;
        parse_search_hashtags(&payload)
    }

    /// Two-step lookup: owner id to username on the secondary endpoint, then
    /// that username's feed on the primary endpoint.
    pub async fn fetch_profile(&self, owner: &OwnerId) -> Result<CanonicalProfile, AdapterError> {
        let info = self.fetch(UpstreamOperation::UserInfo(owner)).await?;
        let username = parse_info_username(&info)?;

        let feed = self.fetch(UpstreamOperation::UserFeed(&username)).await?;
        let user = feed
            .get("user")
            .cloned()
            .ok_or_else(|| AdapterError::payload("user_feed", "missing user object"))?;
        let raw: RawProfile = serde_json::from_value(user)
            .map_err(|err| AdapterError::payload("user_feed", err.to_string()))?;
        project_profile(&raw)
    }
}

#[async_trait]
impl ProfileSource for InstagramSource {
    fn platform(&self) -> &'static str {
        PLATFORM_INSTAGRAM
    }

    async fn resolve_hashtags(&self, keyword: &Keyword) -> Option<Vec<Hashtag>> {
        match self.try_resolve_hashtags(keyword).await {
            Ok(hashtags) => {
                info!(%keyword, count = hashtags.len(), "resolved hashtags");
                Some(hashtags)
            }
            Err(err) => {
                warn!(%keyword, kind = %err.kind(), error = %err, "hashtag search failed; skipping keyword");
                None
            }
        }
    }

    async fn extract_owners(&self, hashtags: &[Hashtag]) -> Vec<OwnerId> {
        let mut owners = Vec::new();
        let mut fetched = 0usize;

        for hashtag in hashtags {
            if self.hashtag_limit.is_some_and(|limit| fetched >= limit) {
                break;
            }

            let result = match self.fetch(UpstreamOperation::HashtagFeed(hashtag)).await {
                Ok(payload) => parse_top_post_owners(&payload),
                Err(err) => Err(err),
            };

            match result {
                Ok(found) => {
                    fetched += 1;
                    debug!(%hashtag, count = found.len(), "collected top post owners");
                    owners.extend(found);
                }
                Err(err) => {
                    warn!(%hashtag, kind = %err.kind(), error = %err, "hashtag feed failed; skipping hashtag");
                }
            }
        }

        owners
    }

    async fn normalize(&self, owner: &OwnerId) -> Option<CanonicalProfile> {
        match self.fetch_profile(owner).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!(%owner, kind = %err.kind(), error = %err, "profile fetch failed; skipping owner");
                None
            }
        }
    }
}

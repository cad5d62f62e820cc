//! Raw upstream profile payloads and their projection into `CanonicalProfile`.

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use socian_core::{
    CanonicalProfile, KeywordSet, ENGAGEMENT_WINDOW, PLATFORM_INSTAGRAM, POST_HISTORY_LEN,
    PROFILE_SCORE_PENDING,
};
use tracing::debug;

use crate::AdapterError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct EdgeCount {
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMediaPage {
    #[serde(default)]
    pub nodes: JsonValue,
}

/// `user` object of a feed-by-username payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RawProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub profile_pic_url: Option<String>,
    #[serde(default)]
    pub profile_pic_url_hd: Option<String>,
    pub followed_by: EdgeCount,
    pub follows: EdgeCount,
    #[serde(default)]
    pub media: RawMediaPage,
}

impl RawProfile {
    /// Media nodes in upstream order (most recent first), or `None` when
    /// upstream did not send a list.
    pub fn media_nodes(&self) -> Option<&Vec<JsonValue>> {
        self.media.nodes.as_array()
    }
}

/// Interaction counters of one media item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct MediaStats {
    #[serde(default)]
    pub comments: EdgeCount,
    #[serde(default)]
    pub likes: EdgeCount,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub video_views: Option<u64>,
}

impl MediaStats {
    pub fn interactions(&self) -> u64 {
        let views = if self.is_video {
            self.video_views.unwrap_or(0)
        } else {
            0
        };
        self.comments.count + self.likes.count + views
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Average per-post interactions relative to followers over the first
/// `ENGAGEMENT_WINDOW` items, rounded to two decimals.
///
/// Zero followers or zero posts yield `0.0`.
pub fn engagement_rate(follower_count: u64, media: &[MediaStats]) -> f64 {
    let window = &media[..media.len().min(ENGAGEMENT_WINDOW)];
    if follower_count == 0 || window.is_empty() {
        debug!(
            follower_count,
            posts = window.len(),
            "no engagement data; rate is 0"
        );
        return 0.0;
    }

    let followers = follower_count as f64;
    let total: f64 = window
        .iter()
        .map(|item| item.interactions() as f64 / followers)
        .sum();
    round2(total / window.len() as f64)
}

pub fn project_profile(raw: &RawProfile) -> Result<CanonicalProfile, AdapterError> {
    let nodes = raw.media_nodes();

    let stats = nodes
        .map(|nodes| {
            nodes
                .iter()
                .take(ENGAGEMENT_WINDOW)
                .map(|node| serde_json::from_value::<MediaStats>(node.clone()))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|err| AdapterError::payload("user_feed", format!("media node: {err}")))?
        .unwrap_or_default();

    let post_history = nodes
        .map(|nodes| nodes.iter().take(POST_HISTORY_LEN).cloned().collect())
        .unwrap_or_default();

    Ok(CanonicalProfile {
        username: raw.username.clone(),
        platform_id: raw.id.clone(),
        platform: PLATFORM_INSTAGRAM.to_string(),
        display_name: raw.full_name.clone().unwrap_or_default(),
        followers: raw.followed_by.count,
        following: raw.follows.count,
        profile_picture: raw.profile_pic_url_hd.clone().unwrap_or_default(),
        profile_picture_thumbnail: raw.profile_pic_url.clone().unwrap_or_default(),
        bio: raw.biography.clone().unwrap_or_default(),
        engagement_rate: engagement_rate(raw.followed_by.count, &stats),
        location_lat: 0.0,
        location_long: 0.0,
        profile_score: PROFILE_SCORE_PENDING.to_string(),
        post_history,
        keywords: KeywordSet::default(),
    })
}

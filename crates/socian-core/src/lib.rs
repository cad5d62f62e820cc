//! Core domain model for the Socian profile crawler.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "socian-core";

/// Value stored in `CanonicalProfile::platform` for every crawled profile.
pub const PLATFORM_INSTAGRAM: &str = "instagram";

/// Placeholder written to `profile_score` until scoring exists.
pub const PROFILE_SCORE_PENDING: &str = "TBD";

/// Number of most-recent media items kept in `post_history`.
pub const POST_HISTORY_LEN: usize = 3;

/// Number of most-recent media items averaged into the engagement rate.
pub const ENGAGEMENT_WINDOW: usize = 10;

/// Seed search term. Always lowercase with no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keyword(String);

impl Keyword {
    /// Normalizes a raw seed term; returns `None` when nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<String>()
            .replace("'s", "s");
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashtag discovered for a keyword. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hashtag(String);

impl Hashtag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hashtag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque upstream account identifier of a post owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order-insensitive, duplicate-free set of keywords a profile was found under.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordSet(BTreeSet<Keyword>);

impl KeywordSet {
    pub fn singleton(keyword: Keyword) -> Self {
        let mut set = Self::default();
        set.insert(keyword);
        set
    }

    /// Returns `false` when the keyword was already present.
    pub fn insert(&mut self, keyword: Keyword) -> bool {
        self.0.insert(keyword)
    }

    pub fn union_with(&mut self, other: &KeywordSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn contains(&self, keyword: &Keyword) -> bool {
        self.0.contains(keyword)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Keyword> {
        self.0.iter()
    }
}

impl FromIterator<Keyword> for KeywordSet {
    fn from_iter<I: IntoIterator<Item = Keyword>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Persisted profile document, keyed by `username`.
///
/// `keywords` accumulates across crawl runs; every other field reflects the
/// most recent fetch. Documents written by older schema versions may lack
/// `keywords` or `post_history`, which deserialize as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProfile {
    pub username: String,
    pub platform_id: String,
    pub platform: String,
    pub display_name: String,
    pub followers: u64,
    pub following: u64,
    pub profile_picture: String,
    pub profile_picture_thumbnail: String,
    pub bio: String,
    pub engagement_rate: f64,
    pub location_lat: f64,
    pub location_long: f64,
    pub profile_score: String,
    #[serde(default)]
    pub post_history: Vec<JsonValue>,
    #[serde(default)]
    pub keywords: KeywordSet,
}

impl CanonicalProfile {
    pub fn with_keywords(mut self, keywords: KeywordSet) -> Self {
        self.keywords = keywords;
        self
    }
}

/// Failure taxonomy shared by every crawl stage.
///
/// The kind decides what gets skipped: a transport, rejection or payload
/// failure skips the current hashtag, owner or keyword; a persistence failure
/// skips a single profile write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Rejection,
    Payload,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Rejection => "rejection",
            Self::Payload => "payload",
            Self::Persistence => "persistence",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(raw: &str) -> Keyword {
        Keyword::parse(raw).expect("keyword")
    }

    #[test]
    fn keyword_parse_normalizes_seed_terms() {
        assert_eq!(kw("  Street Food ").as_str(), "streetfood");
        assert_eq!(kw("Mother's Day").as_str(), "mothersday");
        assert_eq!(kw("CATS").as_str(), "cats");
        assert!(Keyword::parse("   ").is_none());
    }

    #[test]
    fn keyword_set_ignores_duplicates_and_order() {
        let mut a = KeywordSet::singleton(kw("dogs"));
        assert!(a.insert(kw("cats")));
        assert!(!a.insert(kw("dogs")));

        let b: KeywordSet = vec![kw("cats"), kw("dogs")].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn keyword_set_union_merges_without_duplicates() {
        let mut stored: KeywordSet = vec![kw("cats"), kw("travel")].into_iter().collect();
        stored.union_with(&KeywordSet::singleton(kw("cats")));
        stored.union_with(&KeywordSet::singleton(kw("dogs")));
        let values: Vec<&str> = stored.iter().map(Keyword::as_str).collect();
        assert_eq!(values, vec!["cats", "dogs", "travel"]);
    }

    #[test]
    fn legacy_document_without_keywords_deserializes_empty() {
        let doc = serde_json::json!({
            "username": "legacy",
            "platform_id": "1",
            "platform": "instagram",
            "display_name": "Legacy",
            "followers": 10,
            "following": 2,
            "profile_picture": "hd.jpg",
            "profile_picture_thumbnail": "sd.jpg",
            "bio": "",
            "engagement_rate": 0.5,
            "location_lat": 0.0,
            "location_long": 0.0,
            "profile_score": "TBD"
        });
        let profile: CanonicalProfile = serde_json::from_value(doc).expect("profile");
        assert!(profile.keywords.is_empty());
        assert!(profile.post_history.is_empty());
    }

    #[test]
    fn keywords_serialize_as_plain_array() {
        let set: KeywordSet = vec![kw("dogs"), kw("cats")].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&set).expect("json"),
            serde_json::json!(["cats", "dogs"])
        );
    }
}

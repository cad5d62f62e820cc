//! Profile documents and seed keywords.

use std::collections::BTreeMap;

use async_trait::async_trait;
use socian_core::{CanonicalProfile, ErrorKind, Keyword};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("profile document error: {0}")]
    Document(#[from] serde_json::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Persistence
    }
}

/// Document store keyed by unique username.
///
/// Implementations must never shrink the stored keyword set: an upsert
/// replaces every other field but keeps the union of the stored and incoming
/// `keywords`.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_username(&self, username: &str)
        -> Result<Option<CanonicalProfile>, StoreError>;

    async fn upsert_by_username(
        &self,
        username: &str,
        profile: &CanonicalProfile,
    ) -> Result<(), StoreError>;
}

/// Ordered seed keywords for a crawl run.
#[async_trait]
pub trait KeywordSource: Send + Sync {
    async fn list_keywords(&self) -> Result<Vec<Keyword>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("profile store migrations applied");
        Ok(())
    }

    /// Normalizes and inserts seed keywords, returning how many were new.
    pub async fn add_keywords<S: AsRef<str>>(&self, raw: &[S]) -> Result<usize, StoreError> {
        let mut inserted = 0usize;
        for keyword in raw.iter().filter_map(|s| Keyword::parse(s.as_ref())) {
            let result = sqlx::query(
                r#"
                INSERT INTO keywords (keyword)
                VALUES ($1)
                ON CONFLICT (keyword) DO NOTHING
                "#,
            )
            .bind(keyword.as_str())
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<CanonicalProfile>, StoreError> {
        let row = sqlx::query("SELECT document FROM profiles WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: serde_json::Value = row.try_get("document")?;
                Ok(Some(serde_json::from_value(document)?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_by_username(
        &self,
        username: &str,
        profile: &CanonicalProfile,
    ) -> Result<(), StoreError> {
        let document = serde_json::to_value(profile)?;
        sqlx::query(
            r#"
            INSERT INTO profiles (username, document, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (username) DO UPDATE
               SET document = jsonb_set(
                       EXCLUDED.document,
                       '{keywords}',
                       (SELECT COALESCE(jsonb_agg(DISTINCT k ORDER BY k), '[]'::jsonb)
                          FROM jsonb_array_elements_text(
                                   COALESCE(profiles.document -> 'keywords', '[]'::jsonb)
                                || COALESCE(EXCLUDED.document -> 'keywords', '[]'::jsonb)
                               ) AS k)
                   ),
                   updated_at = now()
            "#,
        )
        .bind(username)
        .bind(document)
        .execute(&self.pool)
        .await?;
        debug!(username, "profile upserted");
        Ok(())
    }
}

#[async_trait]
impl KeywordSource for PgStore {
    async fn list_keywords(&self) -> Result<Vec<Keyword>, StoreError> {
        let rows = sqlx::query("SELECT keyword FROM keywords ORDER BY keyword")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("keyword")?;
            if let Some(keyword) = Keyword::parse(&raw) {
                out.push(keyword);
            }
        }
        Ok(out)
    }
}

/// In-process store with the same keyword-union upsert semantics as Postgres.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<BTreeMap<String, CanonicalProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<CanonicalProfile> {
        self.profiles.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.profiles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.profiles.lock().await.is_empty()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<CanonicalProfile>, StoreError> {
        Ok(self.profiles.lock().await.get(username).cloned())
    }

    async fn upsert_by_username(
        &self,
        username: &str,
        profile: &CanonicalProfile,
    ) -> Result<(), StoreError> {
        let mut profiles = self.profiles.lock().await;
        let mut next = profile.clone();
        if let Some(existing) = profiles.get(username) {
            next.keywords.union_with(&existing.keywords);
        }
        profiles.insert(username.to_string(), next);
        Ok(())
    }
}

/// Fixed keyword list, mostly for tests and fixture replays.
#[derive(Debug, Clone, Default)]
pub struct StaticKeywords(Vec<Keyword>);

impl StaticKeywords {
    pub fn new(keywords: Vec<Keyword>) -> Self {
        Self(keywords)
    }

    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Self {
        Self(raw.iter().filter_map(|s| Keyword::parse(s.as_ref())).collect())
    }
}

#[async_trait]
impl KeywordSource for StaticKeywords {
    async fn list_keywords(&self) -> Result<Vec<Keyword>, StoreError> {
        Ok(self.0.clone())
    }
}

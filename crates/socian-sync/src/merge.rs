//! Keyword-merging upsert of normalized profiles.

use std::sync::Arc;

use serde::Serialize;
use socian_core::{CanonicalProfile, Keyword, KeywordSet};
use socian_storage::{ProfileStore, StoreError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub received: usize,
    pub persisted: usize,
    pub failed: usize,
    pub failed_usernames: Vec<String>,
}

pub struct StoreMerger {
    store: Arc<dyn ProfileStore>,
}

impl StoreMerger {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    /// Persists every `Some` profile under `keyword`.
    ///
    /// A failed write is logged and counted; the rest of the batch still runs.
    pub async fn merge_and_persist(
        &self,
        profiles: Vec<Option<CanonicalProfile>>,
        keyword: &Keyword,
    ) -> MergeReport {
        let mut report = MergeReport {
            received: profiles.len(),
            ..Default::default()
        };

        for profile in profiles.into_iter().flatten() {
            let username = profile.username.clone();
            match self.merge_one(profile, keyword).await {
                Ok(()) => report.persisted += 1,
                Err(err) => {
                    warn!(%username, %keyword, kind = %err.kind(), error = %err, "profile persist failed; continuing batch");
                    report.failed += 1;
                    report.failed_usernames.push(username);
                }
            }
        }

        debug!(
            %keyword,
            received = report.received,
            persisted = report.persisted,
            failed = report.failed,
            "merge batch finished"
        );
        report
    }

    async fn merge_one(
        &self,
        profile: CanonicalProfile,
        keyword: &Keyword,
    ) -> Result<(), StoreError> {
        let keywords = match self.store.find_by_username(&profile.username).await? {
            Some(existing) => {
                let mut keywords = existing.keywords;
                keywords.insert(keyword.clone());
                keywords
            }
            None => KeywordSet::singleton(keyword.clone()),
        };

        let record = profile.with_keywords(keywords);
        self.store
            .upsert_by_username(&record.username, &record)
            .await
    }
}

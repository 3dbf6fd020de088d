use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::TORZNAB_ANIME_CATEGORY;

/// A single release as returned by the indexer, before Torznab rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    /// Stable identifier; for Nyaa this is the view-page URL.
    pub guid: String,
    /// Torrent download URL.
    pub link: String,
    /// Info page, rendered as the RSS `comments` element.
    pub info_url: Option<String>,
    pub pub_date: DateTime<Utc>,
    pub size: u64,
    pub seeders: u32,
    pub peers: u32,
    pub indexer: String,
    pub categories: Vec<i32>,
}

impl SearchResult {
    /// Ordering key for ranking: more seeders first, newer first on ties.
    #[must_use]
    pub fn rank_key(&self) -> (u32, DateTime<Utc>) {
        (self.seeders, self.pub_date)
    }

    /// Whether this result should replace `existing` under the same GUID.
    #[must_use]
    pub fn is_better_than(&self, existing: &Self) -> bool {
        self.rank_key() > existing.rank_key()
    }

    #[must_use]
    pub fn default_categories() -> Vec<i32> {
        vec![TORZNAB_ANIME_CATEGORY]
    }
}

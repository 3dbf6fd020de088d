use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Title variants for a single anime.
///
/// At least one facet must be non-empty for the mapping to be searchable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimeTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
    pub synonyms: Vec<String>,
}

impl AnimeTitle {
    /// Merge two title sets: `self` wins on the fields it has set, `other`
    /// fills empty slots, synonym lists union without duplicates.
    #[must_use]
    pub fn merged_with(&self, other: &Self) -> Self {
        let mut synonyms = self.synonyms.clone();
        for synonym in &other.synonyms {
            if !synonyms.contains(synonym) {
                synonyms.push(synonym.clone());
            }
        }

        Self {
            romaji: self.romaji.clone().or_else(|| other.romaji.clone()),
            english: self.english.clone().or_else(|| other.english.clone()),
            native: self.native.clone().or_else(|| other.native.clone()),
            synonyms,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.romaji.as_deref().is_none_or(str::is_empty)
            && self.english.as_deref().is_none_or(str::is_empty)
            && self.native.as_deref().is_none_or(str::is_empty)
            && self.synonyms.iter().all(|s| s.is_empty())
    }
}

/// Episode count for one season, used for absolute-number fallback math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonEpisodes {
    pub season: i64,
    pub episodes: i64,
}

/// Canonical record mapping a TVDB series to the anime databases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimeMapping {
    pub tvdb_id: i64,
    #[serde(default)]
    pub anidb_id: Option<i64>,
    #[serde(default)]
    pub anilist_id: Option<i64>,
    #[serde(default)]
    pub mal_id: Option<i64>,
    pub titles: AnimeTitle,
    #[serde(default)]
    pub total_episodes: i64,
    #[serde(default)]
    pub season_info: Vec<SeasonEpisodes>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Set when the mapping was synthesized from a user override; such
    /// mappings are never evicted by the cache TTL.
    #[serde(default)]
    pub user_override: bool,
}

impl AnimeMapping {
    #[must_use]
    pub fn is_searchable(&self) -> bool {
        !self.titles.is_empty()
    }

    /// All distinct titles, ordered for search: romaji, english, up to three
    /// synonyms, then the native script title.
    #[must_use]
    pub fn search_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = Vec::new();

        if let Some(romaji) = &self.titles.romaji
            && !romaji.is_empty()
        {
            titles.push(romaji.clone());
        }

        if let Some(english) = &self.titles.english
            && !english.is_empty()
            && !titles.contains(english)
        {
            titles.push(english.clone());
        }

        for synonym in self.titles.synonyms.iter().take(3) {
            if !synonym.is_empty() && !titles.contains(synonym) {
                titles.push(synonym.clone());
            }
        }

        if let Some(native) = &self.titles.native
            && !native.is_empty()
            && !titles.contains(native)
        {
            titles.push(native.clone());
        }

        titles
    }
}

/// User-supplied mapping override, always highest priority in the resolver.
///
/// `episode_overrides` pins individual episodes to absolute numbers, keyed by
/// an `SxxEyy` label (e.g. `"S02E01": 14`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingOverride {
    pub tvdb_id: i64,
    pub anidb_id: Option<i64>,
    pub anilist_id: Option<i64>,
    pub mal_id: Option<i64>,
    pub custom_titles: Vec<String>,
    pub episode_overrides: HashMap<String, i64>,
    pub season_info: Vec<SeasonEpisodes>,
    pub notes: String,
}

impl MappingOverride {
    /// Key format used by `episode_overrides`.
    #[must_use]
    pub fn episode_key(season: i64, episode: i64) -> String {
        format!("S{season:02}E{episode:02}")
    }
}

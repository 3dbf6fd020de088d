//! Anime offline database catalog for TVDB -> anime ID mapping.
//!
//! Downloads and indexes the manami-project anime-offline-database so that
//! TVDB lookups and title searches work without touching any online API. The
//! catalog owns the vendor JSON shape; everything else consumes
//! [`AnimeTitle`] and [`CrossDbIds`] projections.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::models::AnimeTitle;

const CATALOG_FILENAME: &str = "anime-offline-database.json";

/// Root structure of the offline database JSON.
#[derive(Debug, Default, Deserialize)]
struct DatabaseRoot {
    #[serde(default)]
    data: Vec<CatalogEntry>,
}

/// Single anime entry from the offline database.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogEntry {
    pub title: String,
    pub sources: Vec<String>,
    pub synonyms: Vec<String>,
}

/// Cross-database IDs extracted from an entry's `sources` URLs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrossDbIds {
    pub anidb_id: Option<i64>,
    pub anilist_id: Option<i64>,
    pub mal_id: Option<i64>,
}

/// Extracts a numeric ID from a URL after a given prefix.
fn extract_id(url: &str, prefix: &str) -> Option<i64> {
    url.find(prefix)
        .map(|pos| &url[pos + prefix.len()..])
        .and_then(|s| {
            let num_str: String = s.chars().take_while(char::is_ascii_digit).collect();
            num_str.parse().ok()
        })
}

#[derive(Default)]
struct CatalogIndex {
    entries: Vec<CatalogEntry>,
    series: HashMap<i64, usize>,
    movies: HashMap<i64, usize>,
}

impl CatalogIndex {
    fn build(entries: Vec<CatalogEntry>) -> Self {
        let mut series = HashMap::new();
        let mut movies = HashMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            for source in &entry.sources {
                if let Some(id) = extract_id(source, "thetvdb.com/series/") {
                    series.insert(id, idx);
                } else if let Some(id) = extract_id(source, "themoviedb.org/movie/") {
                    movies.insert(id, idx);
                }
            }
        }

        Self {
            entries,
            series,
            movies,
        }
    }
}

/// Offline catalog with TVDB/TMDB keyed indexes and fuzzy title search.
pub struct OfflineCatalog {
    db_path: PathBuf,
    db_url: String,
    update_interval: Duration,
    http_client: Client,
    index: RwLock<CatalogIndex>,
}

impl OfflineCatalog {
    #[must_use]
    pub fn new(config: &CatalogConfig, data_dir: &std::path::Path) -> Self {
        Self {
            db_path: data_dir.join(CATALOG_FILENAME),
            db_url: config.url.clone(),
            update_interval: Duration::from_secs(u64::from(config.update_interval_hours) * 3600),
            http_client: Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(crate::USER_AGENT)
                .build()
                .unwrap_or_default(),
            index: RwLock::new(CatalogIndex::default()),
        }
    }

    /// Load the local catalog, downloading a fresh copy when it is missing or
    /// older than the update interval. Never fails hard: with neither a
    /// usable download nor a local file the catalog stays empty and every
    /// lookup misses.
    pub async fn initialize(&self) -> Result<()> {
        let file_age = tokio::fs::metadata(&self.db_path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|mtime| mtime.elapsed().ok());

        let needs_download = match file_age {
            Some(age) => age > self.update_interval,
            None => true,
        };

        if !needs_download {
            return self.load_from_file().await;
        }

        match self.download_and_store().await {
            Ok(count) => {
                info!(entries = count, "Updated anime offline database");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to update anime offline database");
                if tokio::fs::try_exists(&self.db_path).await.unwrap_or(false) {
                    self.load_from_file().await
                } else {
                    warn!("No local catalog available, operating with an empty catalog");
                    Ok(())
                }
            }
        }
    }

    async fn download_and_store(&self) -> Result<usize> {
        info!(url = %self.db_url, "Downloading anime offline database");

        let body = self
            .http_client
            .get(&self.db_url)
            .send()
            .await
            .context("Failed to send catalog download request")?
            .error_for_status()
            .context("Catalog download returned error status")?
            .bytes()
            .await
            .context("Failed to download catalog body")?;

        let root: DatabaseRoot =
            serde_json::from_slice(&body).context("Failed to parse catalog JSON")?;

        if let Some(parent) = self.db_path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }

        // Atomic replace so a concurrent reader never observes a torn file.
        let tmp_path = self.db_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body)
            .await
            .with_context(|| format!("Failed to write catalog: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.db_path)
            .await
            .context("Failed to move catalog into place")?;

        let count = root.data.len();
        self.replace_index(root.data);
        Ok(count)
    }

    async fn load_from_file(&self) -> Result<()> {
        let contents = tokio::fs::read(&self.db_path)
            .await
            .with_context(|| format!("Failed to read catalog: {}", self.db_path.display()))?;

        match serde_json::from_slice::<DatabaseRoot>(&contents) {
            Ok(root) => {
                info!(entries = root.data.len(), "Loaded anime offline database");
                self.replace_index(root.data);
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse local catalog, operating with an empty catalog");
            }
        }
        Ok(())
    }

    fn replace_index(&self, entries: Vec<CatalogEntry>) {
        let index = CatalogIndex::build(entries);
        debug!(
            entries = index.entries.len(),
            series = index.series.len(),
            movies = index.movies.len(),
            "Rebuilt catalog indexes"
        );
        *self.index.write().expect("catalog index poisoned") = index;
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.index.read().expect("catalog index poisoned").entries.len()
    }

    #[must_use]
    pub fn lookup_by_series_id(&self, tvdb_id: i64) -> Option<CatalogEntry> {
        let index = self.index.read().expect("catalog index poisoned");
        index
            .series
            .get(&tvdb_id)
            .and_then(|&idx| index.entries.get(idx))
            .cloned()
    }

    #[must_use]
    pub fn lookup_by_movie_id(&self, tmdb_id: i64) -> Option<CatalogEntry> {
        let index = self.index.read().expect("catalog index poisoned");
        index
            .movies
            .get(&tmdb_id)
            .and_then(|&idx| index.entries.get(idx))
            .cloned()
    }

    /// Extract the anime-database IDs embedded in an entry's source URLs.
    ///
    /// AniDB appears in two URL shapes in the wild: the modern
    /// `/anime/NNN` path and the legacy `perl-bin` query string.
    #[must_use]
    pub fn extract_ids(entry: &CatalogEntry) -> CrossDbIds {
        let mut ids = CrossDbIds::default();

        for source in &entry.sources {
            if let Some(id) = extract_id(source, "anilist.co/anime/") {
                ids.anilist_id = Some(id);
            } else if let Some(id) = extract_id(source, "myanimelist.net/anime/") {
                ids.mal_id = Some(id);
            } else if source.contains("anidb.net") {
                if let Some(id) =
                    extract_id(source, "anidb.net/anime/").or_else(|| extract_id(source, "aid="))
                {
                    ids.anidb_id = Some(id);
                }
            }
        }

        ids
    }

    /// Project an entry's titles. The offline database does not distinguish
    /// English or native titles; those are enriched downstream.
    #[must_use]
    pub fn extract_titles(entry: &CatalogEntry) -> AnimeTitle {
        AnimeTitle {
            romaji: Some(entry.title.clone()),
            english: None,
            native: None,
            synonyms: entry.synonyms.clone(),
        }
    }

    /// All distinct titles of an entry, main title first.
    #[must_use]
    pub fn all_titles(entry: &CatalogEntry) -> Vec<String> {
        let mut titles = Vec::new();
        if !entry.title.is_empty() {
            titles.push(entry.title.clone());
        }
        for synonym in &entry.synonyms {
            if !synonym.is_empty() && !titles.contains(synonym) {
                titles.push(synonym.clone());
            }
        }
        titles
    }

    /// Fuzzy title search over every entry, ranked by match score.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn search_by_title(&self, query: &str, limit: usize) -> Vec<CatalogEntry> {
        let query_lower = query.trim().to_lowercase();
        if query_lower.len() < 3 {
            return Vec::new();
        }

        let query_words: Vec<&str> = query_lower.split_whitespace().collect();

        let index = self.index.read().expect("catalog index poisoned");
        let mut matches: Vec<(f64, &CatalogEntry)> = Vec::new();

        for entry in &index.entries {
            let mut best_score = 0.0_f64;

            let all = std::iter::once(entry.title.as_str()).chain(
                entry.synonyms.iter().map(String::as_str),
            );

            for title in all {
                let title_lower = title.to_lowercase();
                let score = if query_lower == title_lower {
                    100.0
                } else if title_lower.contains(&query_lower) {
                    80.0
                } else if title_lower.starts_with(&query_lower) {
                    70.0
                } else {
                    let title_words: Vec<&str> = title_lower.split_whitespace().collect();
                    let overlap = query_words
                        .iter()
                        .filter(|w| title_words.contains(w))
                        .count();
                    if overlap > 0 {
                        overlap as f64 / query_words.len().max(1) as f64 * 50.0
                    } else {
                        0.0
                    }
                };

                best_score = best_score.max(score);
            }

            if best_score > 20.0 {
                matches.push((best_score, entry));
            }
        }

        matches.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        matches
            .into_iter()
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Identify an anime from a free-form query and return the best titles to
    /// search the indexer with: up to two Latin-script titles, or the first
    /// non-Latin title when the entry has no Latin ones at all.
    #[must_use]
    pub fn get_search_titles_for_query(&self, query: &str) -> Vec<String> {
        let Some(winner) = self.search_by_title(query, 1).into_iter().next() else {
            return Vec::new();
        };

        let titles = Self::all_titles(&winner);
        let (latin, non_latin): (Vec<String>, Vec<String>) =
            titles.into_iter().partition(|t| is_mostly_latin(t));

        if latin.is_empty() {
            warn!(
                query = %query,
                "Catalog entry has no Latin-script titles, searching with native title"
            );
            non_latin.into_iter().take(1).collect()
        } else {
            latin.into_iter().take(2).collect()
        }
    }
}

fn is_latin_char(c: char) -> bool {
    matches!(c,
        '\u{0041}'..='\u{007A}' | '\u{00C0}'..='\u{024F}' | '\u{1E00}'..='\u{1EFF}'
    )
}

/// Whether a string reads as Latin script: strictly more than half of its
/// alphabetic characters fall in the Latin ranges. A string with no
/// alphabetic characters is not Latin.
#[must_use]
pub fn is_mostly_latin(s: &str) -> bool {
    let mut total = 0usize;
    let mut latin = 0usize;

    for c in s.chars().filter(|c| c.is_alphabetic()) {
        total += 1;
        if is_latin_char(c) {
            latin += 1;
        }
    }

    latin * 2 > total && total > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;

    fn catalog_with(entries: Vec<CatalogEntry>) -> OfflineCatalog {
        let catalog = OfflineCatalog::new(&CatalogConfig::default(), std::path::Path::new("data"));
        catalog.replace_index(entries);
        catalog
    }

    fn frieren() -> CatalogEntry {
        CatalogEntry {
            title: "Sousou no Frieren".to_string(),
            sources: vec![
                "https://anidb.net/anime/17617".to_string(),
                "https://anilist.co/anime/154587".to_string(),
                "https://myanimelist.net/anime/52991".to_string(),
                "https://thetvdb.com/series/424435".to_string(),
            ],
            synonyms: vec![
                "Frieren: Beyond Journey's End".to_string(),
                "葬送のフリーレン".to_string(),
            ],
        }
    }

    #[test]
    fn test_extract_ids() {
        let ids = OfflineCatalog::extract_ids(&frieren());
        assert_eq!(ids.anidb_id, Some(17617));
        assert_eq!(ids.anilist_id, Some(154_587));
        assert_eq!(ids.mal_id, Some(52991));
    }

    #[test]
    fn test_extract_ids_legacy_anidb_url() {
        let entry = CatalogEntry {
            title: "Old Show".to_string(),
            sources: vec![
                "https://anidb.net/perl-bin/animedb.pl?show=anime&aid=1234".to_string(),
            ],
            synonyms: vec![],
        };
        assert_eq!(OfflineCatalog::extract_ids(&entry).anidb_id, Some(1234));
    }

    #[test]
    fn test_series_index_lookup() {
        let catalog = catalog_with(vec![frieren()]);
        let entry = catalog.lookup_by_series_id(424_435).unwrap();
        assert_eq!(entry.title, "Sousou no Frieren");
        assert!(catalog.lookup_by_series_id(99_999_999).is_none());
    }

    #[test]
    fn test_movie_index_lookup() {
        let entry = CatalogEntry {
            title: "Some Film".to_string(),
            sources: vec!["https://www.themoviedb.org/movie/5551".to_string()],
            synonyms: vec![],
        };
        let catalog = catalog_with(vec![entry]);
        assert!(catalog.lookup_by_movie_id(5551).is_some());
        assert!(catalog.lookup_by_series_id(5551).is_none());
    }

    #[test]
    fn test_search_exact_match_outranks_substring() {
        let other = CatalogEntry {
            title: "Frieren Fan Animation".to_string(),
            sources: vec![],
            synonyms: vec![],
        };
        let exact = CatalogEntry {
            title: "Frieren Fan".to_string(),
            sources: vec![],
            synonyms: vec![],
        };
        let catalog = catalog_with(vec![other, exact]);

        let results = catalog.search_by_title("Frieren Fan", 5);
        assert_eq!(results[0].title, "Frieren Fan");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_search_drops_low_scores_and_short_queries() {
        let catalog = catalog_with(vec![frieren()]);
        assert!(catalog.search_by_title("zz", 5).is_empty());
        assert!(catalog.search_by_title("completely unrelated words", 5).is_empty());
    }

    #[test]
    fn test_search_titles_for_query_prefers_latin() {
        let catalog = catalog_with(vec![frieren()]);
        let titles = catalog.get_search_titles_for_query("Sousou no Frieren");
        assert_eq!(
            titles,
            vec![
                "Sousou no Frieren".to_string(),
                "Frieren: Beyond Journey's End".to_string(),
            ]
        );
    }

    #[test]
    fn test_search_titles_for_query_falls_back_to_native() {
        let entry = CatalogEntry {
            title: "ワンパンマン".to_string(),
            sources: vec![],
            synonyms: vec!["ワンパン".to_string()],
        };
        let catalog = catalog_with(vec![entry]);
        let titles = catalog.get_search_titles_for_query("ワンパンマン");
        assert_eq!(titles, vec!["ワンパンマン".to_string()]);
    }

    #[test]
    fn test_latin_classifier() {
        assert!(is_mostly_latin("Frieren"));
        assert!(is_mostly_latin("Kaguya-sama wa Kokurasetai"));
        assert!(!is_mostly_latin("葬送のフリーレン"));
        assert!(!is_mostly_latin(""));
        assert!(!is_mostly_latin("1080p"));

        // Exactly half Latin is non-Latin: the threshold is strictly > 50%.
        assert!(!is_mostly_latin("ab日本"));
    }
}

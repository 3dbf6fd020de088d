//! Query planning: title selection, combined search dispatch, relevance
//! filtering, deduplication and ranking.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

use crate::clients::nyaa::NyaaClient;
use crate::clients::offline_db::OfflineCatalog;
use crate::constants::SPECIAL_KEYWORDS;
use crate::models::{AnimeMapping, SearchResult};
use crate::services::episode::EpisodeTranslator;

/// Words carrying no discriminating power in anime release titles: English
/// function words, media jargon, and title words so common that they match
/// half the index.
const STOP_WORDS: &[&str] = &[
    // Articles, prepositions, pronouns
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of",
    "with", "by", "from", "as", "is", "was", "are", "were", "been", "be",
    "have", "has", "had", "do", "does", "did", "will", "would", "could",
    "should", "may", "might", "must", "shall", "can", "need", "this", "that",
    "these", "those", "i", "you", "he", "she", "it", "we", "they", "what",
    "which", "who", "whom", "where", "when", "why", "how", "all", "each",
    "every", "both", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just",
    // Media-related terms
    "season", "seasons", "episode", "episodes", "series",
    "movie", "film", "gekijouban", "theatrical", "cinema",
    "ova", "ona", "oad", "special", "specials",
    // Common anime title words
    "love", "war", "world", "story", "tale", "life", "time", "day", "days",
    "night", "girl", "girls", "boy", "boys", "man", "men", "woman", "women",
    "school", "high", "magic", "battle", "fight", "hero", "heroes", "dragon",
    "sword", "king", "queen", "prince", "princess", "knight", "angel", "demon",
    "god", "devil", "soul", "spirit", "heart", "dream", "star", "stars",
    "moon", "sun", "sky", "sea", "ocean", "fire", "ice", "dark", "light",
    "black", "white", "red", "blue", "green", "golden", "new", "last",
    "first", "final", "ultimate", "great", "super", "mega", "zero", "one",
    "two", "three", "ii", "iii", "iv",
];

/// Release-title noise replaced with spaces before fuzzy comparison.
const TITLE_NOISE: &[&str] = &[
    "2160p", "1080p", "720p", "480p", "4k",
    "hevc", "x264", "x265", "h264", "h265", "av1",
    "aac", "flac", "mp3", "opus",
    "web-dl", "webrip", "bluray", "bdrip", "dvdrip",
    "dual audio", "multi-sub", "multi audio",
    "movie", "film", "gekijouban", "theatrical",
    "[", "]", "(", ")", "{", "}",
];

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").expect("Invalid regex"))
}

fn digits_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+\b").expect("Invalid regex"))
}

fn punctuation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("Invalid regex"))
}

/// Normalize a release title for fuzzy grouping: lowercase, noise tags and
/// bracket characters become spaces, year stamps are removed, whitespace
/// collapses. Idempotent.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let mut normalized = title.to_lowercase();

    for pattern in TITLE_NOISE {
        normalized = normalized.replace(pattern, " ");
    }

    normalized = year_regex().replace_all(&normalized, " ").into_owned();

    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract significant keywords from search titles: digits and punctuation
/// stripped, lowercased, stop words and short tokens dropped.
#[must_use]
pub fn extract_keywords(titles: &[String]) -> HashSet<String> {
    let mut keywords = HashSet::new();

    for title in titles {
        let cleaned = digits_regex().replace_all(title, "");
        let cleaned = punctuation_regex().replace_all(&cleaned, " ");

        for word in cleaned.to_lowercase().split_whitespace() {
            if word.len() >= 3 && !STOP_WORDS.contains(&word) {
                keywords.insert(word.to_string());
            }
        }
    }

    keywords
}

/// A partial match counts when both tokens are at least four characters, the
/// shorter is at least half the length of the longer, and the shorter is a
/// substring of the longer.
#[must_use]
pub fn is_valid_partial_match(keyword: &str, result_word: &str) -> bool {
    if keyword.len() < 4 || result_word.len() < 4 {
        return false;
    }

    let (shorter, longer) = if keyword.len() <= result_word.len() {
        (keyword, result_word)
    } else {
        (result_word, keyword)
    };

    if shorter.len() * 2 < longer.len() {
        return false;
    }

    longer.contains(shorter)
}

fn is_result_relevant(result_title: &str, keywords: &HashSet<String>) -> bool {
    let lowercased = result_title.to_lowercase();
    let cleaned = punctuation_regex().replace_all(&lowercased, " ");
    let result_words: HashSet<&str> = cleaned.split_whitespace().collect();

    let mut matches = 0;
    for keyword in keywords {
        if result_words.contains(keyword.as_str()) {
            matches += 1;
        } else if result_words
            .iter()
            .any(|word| is_valid_partial_match(keyword, word))
        {
            matches += 1;
        }
    }

    matches >= 1
}

/// Drop results whose titles share no significant keyword with the search
/// titles. With no extractable keywords everything passes.
#[must_use]
pub fn filter_relevant_results(
    results: Vec<SearchResult>,
    search_titles: &[String],
) -> Vec<SearchResult> {
    if results.is_empty() || search_titles.is_empty() {
        return results;
    }

    let keywords = extract_keywords(search_titles);
    if keywords.is_empty() {
        warn!("No significant keywords found in search titles");
        return results;
    }

    let before = results.len();
    let relevant: Vec<SearchResult> = results
        .into_iter()
        .filter(|result| {
            let keep = is_result_relevant(&result.title, &keywords);
            if !keep {
                debug!(title = %result.title, "Filtered out irrelevant result");
            }
            keep
        })
        .collect();

    if relevant.len() != before {
        info!(before = before, after = relevant.len(), "Relevance filter applied");
    }
    relevant
}

/// Two-pass deduplication: exact by GUID, then fuzzy by normalized title,
/// keeping the best (most seeders, newest) of each group. The output is
/// ranked by `(seeders, pub_date)` descending. Idempotent.
#[must_use]
pub fn deduplicate_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut by_guid: HashMap<String, SearchResult> = HashMap::new();
    for result in results {
        match by_guid.entry(result.guid.clone()) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if result.is_better_than(slot.get()) {
                    slot.insert(result);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(result);
            }
        }
    }

    let mut by_title: HashMap<String, SearchResult> = HashMap::new();
    for result in by_guid.into_values() {
        match by_title.entry(normalize_title(&result.title)) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                if result.is_better_than(slot.get()) {
                    slot.insert(result);
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(result);
            }
        }
    }

    let mut deduplicated: Vec<SearchResult> = by_title.into_values().collect();
    sort_results(&mut deduplicated);
    deduplicated
}

/// Rank by seeders descending, publication date descending. Stable.
pub fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.rank_key().cmp(&a.rank_key()));
}

/// The `offset`/`limit` window over the ranked results.
#[must_use]
pub fn paginate(results: Vec<SearchResult>, limit: usize, offset: usize) -> Vec<SearchResult> {
    results.into_iter().skip(offset).take(limit).collect()
}

/// Plans and executes indexer searches for a resolved mapping.
pub struct QueryPlanner {
    nyaa: Arc<NyaaClient>,
    catalog: Arc<OfflineCatalog>,
    translator: Arc<EpisodeTranslator>,
    enable_deduplication: bool,
}

impl QueryPlanner {
    #[must_use]
    pub fn new(
        nyaa: Arc<NyaaClient>,
        catalog: Arc<OfflineCatalog>,
        translator: Arc<EpisodeTranslator>,
        enable_deduplication: bool,
    ) -> Self {
        Self {
            nyaa,
            catalog,
            translator,
            enable_deduplication,
        }
    }

    fn finalize(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        if self.enable_deduplication {
            deduplicate_results(results)
        } else {
            let mut results = results;
            sort_results(&mut results);
            results
        }
    }

    /// Search for one episode of a mapped series.
    ///
    /// Season 0 is a special search; anything else resolves the absolute
    /// episode number and issues a single combined query over every title
    /// variant. Upstream failures degrade to an empty result set.
    pub async fn search_episode(
        &self,
        mapping: &AnimeMapping,
        season: i64,
        episode: i64,
    ) -> Vec<SearchResult> {
        if !mapping.is_searchable() {
            error!(tvdb_id = mapping.tvdb_id, "Mapping has no searchable titles");
            return Vec::new();
        }

        let titles = mapping.search_titles();

        if season == 0 {
            return self.special_search(&titles, Some(episode)).await;
        }

        let absolute = self.translator.to_absolute(mapping, season, episode).await;
        info!(
            tvdb_id = mapping.tvdb_id,
            season = season,
            episode = episode,
            absolute = absolute,
            titles = titles.len(),
            "Searching episode"
        );

        let results = match self.nyaa.search_multi(&titles, &[absolute], &[], None).await {
            Ok(results) => results,
            Err(e) => {
                error!(tvdb_id = mapping.tvdb_id, error = %e, "Episode search failed");
                return Vec::new();
            }
        };

        let relevant = filter_relevant_results(results, &titles);
        self.finalize(relevant)
    }

    /// Search for specials/OVAs: one combined query with the special
    /// keywords, plus one bare-title query to catch differently-labeled
    /// releases. Individual call failures never cancel the sibling.
    pub async fn special_search(
        &self,
        titles: &[String],
        episode: Option<i64>,
    ) -> Vec<SearchResult> {
        let episodes: Vec<i64> = episode.into_iter().collect();

        info!(titles = titles.len(), episode = ?episode, "Special search");

        let searches = vec![
            self.nyaa
                .search_multi(titles, &episodes, SPECIAL_KEYWORDS, None),
            self.nyaa.search_multi(titles, &[], &[], None),
        ];

        let mut all = Vec::new();
        for outcome in futures::future::join_all(searches).await {
            match outcome {
                Ok(results) => all.extend(results),
                Err(e) => error!(error = %e, "Special search query failed"),
            }
        }

        let relevant = filter_relevant_results(all, titles);
        self.finalize(relevant)
    }

    /// Search by absolute episode numbers (already season-agnostic titles).
    pub async fn search_absolute(
        &self,
        titles: &[String],
        episodes: &[i64],
    ) -> Vec<SearchResult> {
        info!(titles = titles.len(), episodes = ?episodes, "Absolute episode search");

        let results = match self.nyaa.search_multi(titles, episodes, &[], None).await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Absolute episode search failed");
                return Vec::new();
            }
        };

        let relevant = filter_relevant_results(results, titles);
        self.finalize(relevant)
    }

    /// Generic free-text search. Long concatenated queries (Sonarr joins the
    /// series title with an episode title) are reduced to a clean primary
    /// title first.
    pub async fn generic_search(&self, query: &str, is_special: bool) -> Vec<SearchResult> {
        let titles = self.resolve_query_titles(query);

        if is_special {
            return self.special_search(&titles, None).await;
        }

        let results = match self.nyaa.search_multi(&titles, &[], &[], None).await {
            Ok(results) => results,
            Err(e) => {
                error!(query = %query, error = %e, "Generic search failed");
                return Vec::new();
            }
        };

        let query_title = query.to_string();
        let relevant = filter_relevant_results(results, std::slice::from_ref(&query_title));
        self.finalize(relevant)
    }

    /// Reduce a possibly concatenated query to search titles.
    ///
    /// Short queries pass through. Long ones are matched against the offline
    /// catalog with progressively shorter word prefixes; failing that, a
    /// Japanese-particle heuristic or a plain word-prefix cut applies.
    fn resolve_query_titles(&self, query: &str) -> Vec<String> {
        if query.len() < 50 {
            return vec![query.to_string()];
        }

        let words: Vec<&str> = query.split_whitespace().collect();

        for num_words in [6, 5, 4, 3] {
            if words.len() >= num_words {
                let prefix = words[..num_words].join(" ");
                let titles = self.catalog.get_search_titles_for_query(&prefix);
                if let Some(primary) = titles.into_iter().next() {
                    info!(prefix = %prefix, title = %primary, "Identified anime from query prefix");
                    return vec![primary];
                }
            }
        }

        let particles = ["wa", "no", "ga", "ni"];
        for (i, word) in words.iter().take(8).enumerate() {
            if particles.contains(&word.to_lowercase().as_str()) {
                let end = (i + 4).min(words.len());
                return vec![words[..end].join(" ")];
            }
        }

        vec![words[..words.len().min(5)].join(" ")]
    }
}

//! Disambiguation of bare-numeric queries.
//!
//! Sonarr searches for specials and absolute-numbered episodes by sending a
//! plain query string (often just "01") with no season/episode parameters.
//! A bare number can mean three different things: an episode within some
//! season, an absolute episode number, or an OVA/Special. Sonarr's own
//! wanted-episode inventory is the most reliable way to tell them apart.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::clients::sonarr::SonarrClient;
use crate::models::{AnimeMapping, SearchResult};
use crate::services::query::QueryPlanner;

fn season_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(S\d+|Season\s*\d+|\d+(st|nd|rd|th)\s*Season)\b")
            .expect("Invalid regex")
    })
}

/// Detect a season-zero query: ends with " 00" and carries no season tag.
///
/// Returns the query with the numeric suffix stripped. Other `0x` suffixes
/// are too ambiguous (an absolute episode 01 looks identical) and the query
/// is left untouched.
#[must_use]
pub fn season_zero_query(query: &str) -> Option<String> {
    static SUFFIX_00: OnceLock<Regex> = OnceLock::new();
    static SUFFIX_0X: OnceLock<Regex> = OnceLock::new();

    let suffix_00 = SUFFIX_00.get_or_init(|| Regex::new(r"\s+00$").expect("Invalid regex"));
    let suffix_0x = SUFFIX_0X.get_or_init(|| Regex::new(r"\s+0\d$").expect("Invalid regex"));

    if !suffix_00.is_match(query) || season_tag_regex().is_match(query) {
        return None;
    }

    Some(suffix_0x.replace(query, "").into_owned())
}

/// Drop title variants that are scoped to a single season ("S2", "Season 2",
/// "2nd Season"); absolute-numbered releases never carry those. When every
/// variant is season-scoped, the first original title is kept.
#[must_use]
pub fn filter_season_specific_titles(titles: &[String]) -> Vec<String> {
    let filtered: Vec<String> = titles
        .iter()
        .filter(|title| !season_tag_regex().is_match(title))
        .cloned()
        .collect();

    if filtered.is_empty() {
        titles.iter().take(1).cloned().collect()
    } else {
        filtered
    }
}

/// Resolves the intent of a bare query string and dispatches the search.
pub struct SpecialResolver {
    sonarr: Arc<SonarrClient>,
    planner: Arc<QueryPlanner>,
}

impl SpecialResolver {
    #[must_use]
    pub fn new(sonarr: Arc<SonarrClient>, planner: Arc<QueryPlanner>) -> Self {
        Self { sonarr, planner }
    }

    /// Search for a mapped series given only a query string.
    ///
    /// Numeric queries are disambiguated through Sonarr's episode inventory
    /// when available; non-numeric (or absent) ones fall through to a
    /// special search.
    pub async fn search_bare_query(
        &self,
        mapping: &AnimeMapping,
        query: &str,
    ) -> Vec<SearchResult> {
        let titles = mapping.search_titles();

        let trimmed = query.trim();
        let numeric = trimmed
            .parse::<i64>()
            .ok()
            .filter(|n| *n > 0 && trimmed.chars().all(|c| c.is_ascii_digit()));

        let Some(query_num) = numeric else {
            debug!(query = %query, "Non-numeric bare query, dispatching special search");
            return self.planner.special_search(&titles, None).await;
        };

        if self.sonarr.is_configured() {
            let wanted = self
                .sonarr
                .get_wanted_episodes_by_episode_number(mapping.tvdb_id, query_num)
                .await;

            if !wanted.is_empty() {
                if let Some(special) = wanted.iter().find(|ep| ep.is_special) {
                    info!(
                        tvdb_id = mapping.tvdb_id,
                        query_num = query_num,
                        "Bare query resolves to a special"
                    );
                    let episode = special.absolute_episode_number.unwrap_or(query_num);
                    return self.planner.special_search(&titles, Some(episode)).await;
                }

                // Releases are sometimes labeled with more than one absolute
                // number across cours; search for all of them at once.
                let mut episodes: Vec<i64> = wanted
                    .iter()
                    .filter_map(|ep| ep.absolute_episode_number)
                    .collect();
                if episodes.is_empty() {
                    episodes.push(query_num);
                }

                info!(
                    tvdb_id = mapping.tvdb_id,
                    query_num = query_num,
                    episodes = ?episodes,
                    "Bare query resolves to wanted episodes"
                );
                let filtered = filter_season_specific_titles(&titles);
                return self.planner.search_absolute(&filtered, &episodes).await;
            }

            if let Some(episode) = self
                .sonarr
                .get_episode_by_absolute_number(mapping.tvdb_id, query_num)
                .await
            {
                if episode.is_special {
                    return self.planner.special_search(&titles, Some(query_num)).await;
                }
                let filtered = filter_season_specific_titles(&titles);
                return self.planner.search_absolute(&filtered, &[query_num]).await;
            }
        }

        debug!(
            tvdb_id = mapping.tvdb_id,
            query_num = query_num,
            "Treating bare number as absolute episode"
        );
        let filtered = filter_season_specific_titles(&titles);
        self.planner.search_absolute(&filtered, &[query_num]).await
    }
}

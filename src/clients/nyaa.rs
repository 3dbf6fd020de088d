//! Direct Nyaa.si RSS client.
//!
//! Searches the indexer's RSS interface with combined OR-queries so that one
//! HTTP call can cover several title variants and episode numbers, keeping
//! well under the indexer's rate limits. Responses are cached for a short
//! window because Sonarr tends to repeat identical queries in bursts.

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex as StdMutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::config::NyaaConfig;
use crate::constants::{indexer, nyaa_category, nyaa_filter};
use crate::models::SearchResult;
use crate::parser::date::parse_pub_date;
use crate::parser::size::parse_size;

/// Consolidates regexes for XML parsing to avoid per-call overhead and unsafe unwraps.
struct NyaaRegex {
    title: Regex,
    link: Regex,
    guid: Regex,
    pub_date: Regex,
    seeders: Regex,
    leechers: Regex,
    size: Regex,
    category_id: Regex,
    info_hash: Regex,
    trusted: Regex,
    item: Regex,
}

impl NyaaRegex {
    fn get() -> &'static Self {
        static INSTANCE: OnceLock<NyaaRegex> = OnceLock::new();
        INSTANCE.get_or_init(|| Self {
            title: Regex::new(r"<title>([^<]*)</title>").expect("Invalid Regex"),
            link: Regex::new(r"<link>([^<]*)</link>").expect("Invalid Regex"),
            guid: Regex::new(r"<guid[^>]*>([^<]*)</guid>").expect("Invalid Regex"),
            pub_date: Regex::new(r"<pubDate>([^<]*)</pubDate>").expect("Invalid Regex"),
            seeders: Regex::new(r"<nyaa:seeders>([^<]*)</nyaa:seeders>").expect("Invalid Regex"),
            leechers: Regex::new(r"<nyaa:leechers>([^<]*)</nyaa:leechers>")
                .expect("Invalid Regex"),
            size: Regex::new(r"<nyaa:size>([^<]*)</nyaa:size>").expect("Invalid Regex"),
            category_id: Regex::new(r"<nyaa:categoryId>([^<]*)</nyaa:categoryId>")
                .expect("Invalid Regex"),
            info_hash: Regex::new(r"<nyaa:infoHash>([^<]*)</nyaa:infoHash>")
                .expect("Invalid Regex"),
            trusted: Regex::new(r"<nyaa:trusted>([^<]*)</nyaa:trusted>").expect("Invalid Regex"),
            item: Regex::new(r"(?s)<item>(.*?)</item>").expect("Invalid Regex"),
        })
    }
}

fn extract_tag(xml: &str, re: &Regex) -> String {
    re.captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn parse_item(item_xml: &str) -> Option<SearchResult> {
    let re = NyaaRegex::get();

    let title = html_escape::decode_html_entities(&extract_tag(item_xml, &re.title)).to_string();
    let guid = extract_tag(item_xml, &re.guid);
    let link = extract_tag(item_xml, &re.link);

    if title.is_empty() || guid.is_empty() || link.is_empty() {
        return None;
    }

    let pub_date = {
        let raw = extract_tag(item_xml, &re.pub_date);
        parse_pub_date(&raw).unwrap_or_else(|| {
            warn!(date = %raw, "Could not parse pubDate, using current time");
            chrono::Utc::now()
        })
    };

    let trusted = extract_tag(item_xml, &re.trusted).eq_ignore_ascii_case("yes");
    if trusted {
        debug!(title = %title, "Trusted release");
    }

    // categoryId and infoHash are parsed for completeness but every result is
    // advertised to Sonarr as 5070 (TV > Anime) for Torznab compatibility.
    let _ = extract_tag(item_xml, &re.category_id);
    let _ = extract_tag(item_xml, &re.info_hash);

    Some(SearchResult {
        title,
        info_url: Some(guid.clone()),
        guid,
        link,
        pub_date,
        size: parse_size(&extract_tag(item_xml, &re.size)).unwrap_or(0),
        seeders: extract_tag(item_xml, &re.seeders).parse().unwrap_or(0),
        peers: extract_tag(item_xml, &re.leechers).parse().unwrap_or(0),
        indexer: "nyaa".to_string(),
        categories: SearchResult::default_categories(),
    })
}

fn parse_rss_items(xml: &str) -> Vec<SearchResult> {
    let re = NyaaRegex::get();
    re.item
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .filter_map(|m| parse_item(m.as_str()))
        .collect()
}

struct CachedSearch {
    results: Vec<SearchResult>,
    cached_at: Instant,
}

/// Rate-limited client for Nyaa.si's RSS search interface.
pub struct NyaaClient {
    base_url: String,
    english_only: bool,
    trusted_only: bool,
    client: Client,
    cache: StdMutex<HashMap<String, CachedSearch>>,
    semaphore: Semaphore,
    last_request: Mutex<Option<Instant>>,
}

impl NyaaClient {
    #[must_use]
    pub fn new(config: &NyaaConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            english_only: config.english_only,
            trusted_only: config.trusted_only,
            client: Client::builder()
                .timeout(Duration::from_secs(u64::from(config.request_timeout_seconds)))
                .user_agent(crate::USER_AGENT)
                .build()
                .unwrap_or_default(),
            cache: StdMutex::new(HashMap::new()),
            semaphore: Semaphore::new(indexer::MAX_CONCURRENT_REQUESTS),
            last_request: Mutex::new(None),
        }
    }

    fn category(&self) -> &'static str {
        if self.english_only {
            nyaa_category::ANIME_ENGLISH
        } else {
            nyaa_category::ALL_ANIME
        }
    }

    fn filter_code(&self) -> &'static str {
        if self.trusted_only {
            nyaa_filter::TRUSTED_ONLY
        } else {
            nyaa_filter::NONE
        }
    }

    fn build_rss_url(&self, query: &str) -> String {
        format!(
            "{}/?page=rss&q={}&c={}&f={}",
            self.base_url,
            urlencoding::encode(query),
            self.category(),
            self.filter_code()
        )
    }

    fn cache_key(&self, query: &str, limit: usize) -> String {
        format!(
            "nyaa|{query}|{}|{}|{limit}",
            self.category(),
            self.filter_code()
        )
    }

    fn cached_results(&self, key: &str) -> Option<Vec<SearchResult>> {
        let mut cache = self.cache.lock().expect("nyaa cache poisoned");
        if let Some(slot) = cache.get(key) {
            if slot.cached_at.elapsed() < indexer::CACHE_TTL {
                debug!(key = %key, "Nyaa cache hit");
                return Some(slot.results.clone());
            }
            cache.remove(key);
        }
        None
    }

    fn store_results(&self, key: String, results: &[SearchResult]) {
        let mut cache = self.cache.lock().expect("nyaa cache poisoned");
        cache.insert(
            key,
            CachedSearch {
                results: results.to_vec(),
                cached_at: Instant::now(),
            },
        );
        if cache.len() > indexer::CACHE_CAPACITY
            && let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, slot)| slot.cached_at)
                .map(|(k, _)| k.clone())
        {
            cache.remove(&oldest);
        }
    }

    /// Drop all cached search responses.
    pub fn clear_cache(&self) {
        self.cache.lock().expect("nyaa cache poisoned").clear();
        debug!("Nyaa search cache cleared");
    }

    /// Build a combined search query using Nyaa's `|` (OR) operator.
    ///
    /// Grammar: `foo|bar` matches either term, `"foo bar"` matches the exact
    /// phrase, `(foo|bar) baz` matches (foo OR bar) AND baz.
    ///
    /// ```
    /// # use tsunagarr::clients::nyaa::NyaaClient;
    /// let q = NyaaClient::build_combined_query(
    ///     &["Initial D Fifth Stage".into(), "Initial D".into()],
    ///     &[1, 27],
    ///     &[],
    /// );
    /// assert_eq!(q, r#"("Initial D Fifth Stage"|"Initial D") (1|27)"#);
    /// ```
    #[must_use]
    pub fn build_combined_query(titles: &[String], episodes: &[i64], keywords: &[&str]) -> String {
        fn quote_title(title: &str) -> String {
            let cleaned = title.replace('"', "");
            if cleaned.contains(' ') || cleaned.contains(['|', '(', ')']) {
                format!("\"{cleaned}\"")
            } else {
                cleaned
            }
        }

        let quoted: Vec<String> = titles
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| quote_title(t))
            .collect();

        if quoted.is_empty() {
            return String::new();
        }

        let mut parts = Vec::new();

        if quoted.len() == 1 {
            parts.push(quoted[0].clone());
        } else {
            parts.push(format!("({})", quoted.join("|")));
        }

        let mut unique_keywords: Vec<&str> = Vec::new();
        for keyword in keywords {
            if !unique_keywords.contains(keyword) {
                unique_keywords.push(keyword);
            }
        }
        match unique_keywords.len() {
            0 => {}
            1 => parts.push(unique_keywords[0].to_string()),
            _ => parts.push(format!("({})", unique_keywords.join("|"))),
        }

        let unique_episodes: BTreeSet<i64> = episodes.iter().copied().collect();
        match unique_episodes.len() {
            0 => {}
            1 => {
                if let Some(episode) = unique_episodes.first() {
                    parts.push(episode.to_string());
                }
            }
            _ => parts.push(format!(
                "({})",
                unique_episodes
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join("|")
            )),
        }

        let combined = parts.join(" ");
        debug!(query = %combined, "Built combined Nyaa query");
        combined
    }

    /// Fetch with the indexer's rate discipline: at most two in-flight
    /// requests, 500 ms between request starts, linear backoff on 429.
    async fn rate_limited_get(&self, url: &str) -> Result<reqwest::Response> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .context("Indexer semaphore closed")?;

        {
            let mut last = self.last_request.lock().await;
            if let Some(previous) = *last {
                let since = previous.elapsed();
                if since < indexer::REQUEST_DELAY {
                    tokio::time::sleep(indexer::REQUEST_DELAY - since).await;
                }
            }
            *last = Some(Instant::now());
        }

        let mut response = self.client.get(url).send().await?;
        let mut attempt = 0;

        while response.status() == StatusCode::TOO_MANY_REQUESTS && attempt < indexer::MAX_RETRIES
        {
            attempt += 1;
            let backoff = Duration::from_secs(u64::from(attempt));
            warn!(
                backoff_secs = backoff.as_secs(),
                attempt = attempt,
                max = indexer::MAX_RETRIES,
                "Nyaa rate limited (429), retrying"
            );
            tokio::time::sleep(backoff).await;
            response = self.client.get(url).send().await?;
        }

        Ok(response)
    }

    /// Search the RSS feed, ranked by seeders descending.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchResult>> {
        let limit = limit.unwrap_or(crate::constants::limits::MAX_RESULTS_PER_QUERY);

        let cache_key = self.cache_key(query, limit);
        if let Some(cached) = self.cached_results(&cache_key) {
            info!(query = %query, results = cached.len(), "Nyaa cache hit");
            return Ok(cached);
        }

        let url = self.build_rss_url(query);
        info!(url = %url, "Nyaa RSS request");

        let response = self.rate_limited_get(&url).await?;
        let status = response.status();
        debug!(status = %status, "Nyaa response");
        let xml = response.error_for_status()?.text().await?;

        let mut results = parse_rss_items(&xml);
        results.sort_by(|a, b| b.seeders.cmp(&a.seeders));
        results.truncate(limit);

        if results.is_empty() {
            info!(query = %query, "Nyaa search returned 0 results");
        } else {
            info!(
                query = %query,
                results = results.len(),
                sample = %results[0].title,
                "Nyaa search finished"
            );
        }

        self.store_results(cache_key, &results);
        Ok(results)
    }

    /// Search with a combined query built from multiple titles, episode
    /// numbers and keywords, all OR-composed into a single HTTP call.
    pub async fn search_multi(
        &self,
        titles: &[String],
        episodes: &[i64],
        keywords: &[&str],
        limit: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        if titles.is_empty() {
            warn!("search_multi called with empty titles list");
            return Ok(Vec::new());
        }

        let combined = Self::build_combined_query(titles, episodes, keywords);
        if combined.is_empty() {
            warn!("build_combined_query returned empty string");
            return Ok(Vec::new());
        }

        info!(query = %combined, "Nyaa combined search");
        self.search(&combined, limit).await
    }
}

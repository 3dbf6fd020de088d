//! TheXEM episode-map client.
//!
//! TheXEM is the authoritative cross-numbering source for anime: it maps
//! TVDB season/episode coordinates to AniDB absolute numbers. Full listings
//! are cached on disk for a week; single-episode lookups are not cached
//! because they sit on the hot path and are usually followed by a full
//! listing fetch anyway.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::constants::cache::EPISODE_MAP_TTL_DAYS;

const CACHE_FILENAME: &str = "thexem_cache.json";

/// Envelope shared by every TheXEM endpoint.
#[derive(Debug, Deserialize)]
struct XemEnvelope {
    result: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct XemCacheEntry {
    data: Value,
    cached_at: DateTime<Utc>,
}

impl XemCacheEntry {
    fn is_fresh(&self) -> bool {
        Utc::now() - self.cached_at < ChronoDuration::days(EPISODE_MAP_TTL_DAYS)
    }
}

/// Client for TheXEM's `/map/*` endpoints with a persisted response cache.
pub struct XemClient {
    base_url: String,
    cache_file: PathBuf,
    client: Client,
    cache: Mutex<HashMap<String, XemCacheEntry>>,
}

impl XemClient {
    #[must_use]
    pub fn new(base_url: &str, data_dir: &std::path::Path) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cache_file: data_dir.join(CACHE_FILENAME),
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(crate::USER_AGENT)
                .build()
                .unwrap_or_default(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load the persisted cache; a corrupt or missing file just means an
    /// empty cache.
    pub async fn initialize(&self) {
        match self.load_cache().await {
            Ok(count) => {
                if count > 0 {
                    info!(entries = count, "Loaded TheXEM cache");
                }
            }
            Err(e) => warn!(error = %e, "Failed to load TheXEM cache"),
        }
    }

    async fn load_cache(&self) -> Result<usize> {
        if !tokio::fs::try_exists(&self.cache_file).await.unwrap_or(false) {
            return Ok(0);
        }

        let contents = tokio::fs::read(&self.cache_file)
            .await
            .with_context(|| format!("Failed to read {}", self.cache_file.display()))?;
        let entries: HashMap<String, XemCacheEntry> =
            serde_json::from_slice(&contents).context("Failed to parse TheXEM cache")?;

        let count = entries.len();
        *self.cache.lock().await = entries;
        Ok(count)
    }

    async fn save_cache(&self, entries: &HashMap<String, XemCacheEntry>) {
        let result: Result<()> = async {
            if let Some(parent) = self.cache_file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let json = serde_json::to_vec_pretty(entries)?;
            let tmp = self.cache_file.with_extension("json.tmp");
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &self.cache_file).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(error = %e, "Failed to save TheXEM cache");
        } else {
            debug!("Saved TheXEM cache");
        }
    }

    fn cache_key(endpoint: &str, params: &[(&str, String)]) -> String {
        let mut sorted: Vec<&(&str, String)> = params.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);
        let param_str = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{endpoint}?{param_str}")
    }

    async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Option<Value> {
        let url = format!("{}/{endpoint}", self.base_url);

        let response = match self
            .client
            .get(&url)
            .query(params)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(endpoint = %endpoint, error = %e, "TheXEM request failed");
                return None;
            }
        };

        if response.status() == StatusCode::NOT_FOUND {
            info!(endpoint = %endpoint, "No TheXEM mapping found");
            return None;
        }
        if let Err(e) = response.error_for_status_ref() {
            error!(endpoint = %endpoint, error = %e, "TheXEM API error");
            return None;
        }

        let envelope: XemEnvelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(endpoint = %endpoint, error = %e, "Failed to parse TheXEM response");
                return None;
            }
        };

        if envelope.result == "success" {
            Some(envelope.data)
        } else {
            warn!(
                endpoint = %endpoint,
                message = envelope.message.as_deref().unwrap_or(""),
                "TheXEM returned non-success result"
            );
            None
        }
    }

    /// All episode mappings for a show, cached for seven days.
    ///
    /// Each element maps every destination system to its coordinates, e.g.
    /// `{"tvdb": {"season": 2, "episode": 1, "absolute": 14}, "anidb": ...}`.
    pub async fn get_all_mappings(&self, show_id: i64, origin: &str) -> Option<Vec<Value>> {
        let params = [
            ("id", show_id.to_string()),
            ("origin", origin.to_string()),
        ];
        let key = Self::cache_key("map/all", &params);

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key)
                && entry.is_fresh()
            {
                debug!(show_id = show_id, origin = %origin, "Using cached TheXEM mappings");
                return entry.data.as_array().cloned();
            }
        }

        let data = self.fetch("map/all", &params, Duration::from_secs(10)).await?;
        let mappings = data.as_array().cloned()?;

        info!(
            show_id = show_id,
            origin = %origin,
            mappings = mappings.len(),
            "Retrieved episode mappings from TheXEM"
        );

        let mut cache = self.cache.lock().await;
        cache.insert(
            key,
            XemCacheEntry {
                data,
                cached_at: Utc::now(),
            },
        );
        self.save_cache(&cache).await;

        Some(mappings)
    }

    /// Mapping for a single episode, uncached.
    pub async fn get_single_mapping(
        &self,
        show_id: i64,
        origin: &str,
        season: i64,
        episode: i64,
        destination: Option<&str>,
    ) -> Option<Value> {
        let mut params = vec![
            ("id", show_id.to_string()),
            ("origin", origin.to_string()),
            ("season", season.to_string()),
            ("episode", episode.to_string()),
        ];
        if let Some(destination) = destination {
            params.push(("destination", destination.to_string()));
        }

        self.fetch("map/single", &params, Duration::from_secs(10))
            .await
    }

    /// All show names known to TheXEM for an origin system, cached.
    pub async fn get_all_names(
        &self,
        origin: &str,
        default_names: bool,
    ) -> Option<HashMap<i64, Vec<String>>> {
        let mut params = vec![("origin", origin.to_string())];
        if default_names {
            params.push(("defaultNames", "1".to_string()));
        }
        let key = Self::cache_key("map/allNames", &params);

        let data = {
            let cache = self.cache.lock().await;
            cache.get(&key).filter(|e| e.is_fresh()).map(|e| e.data.clone())
        };

        let data = match data {
            Some(data) => data,
            None => {
                let fetched = self
                    .fetch("map/allNames", &params, Duration::from_secs(15))
                    .await?;
                let mut cache = self.cache.lock().await;
                cache.insert(
                    key,
                    XemCacheEntry {
                        data: fetched.clone(),
                        cached_at: Utc::now(),
                    },
                );
                self.save_cache(&cache).await;
                fetched
            }
        };

        let names = parse_all_names(&data);
        info!(origin = %origin, shows = names.len(), "Retrieved show names from TheXEM");
        Some(names)
    }

    /// Alternative names for one show by TVDB ID.
    pub async fn get_names_by_tvdb_id(&self, tvdb_id: i64) -> Option<Vec<String>> {
        let all_names = self.get_all_names("tvdb", true).await?;
        let names = all_names.get(&tvdb_id)?;
        info!(tvdb_id = tvdb_id, names = names.len(), "Found names in TheXEM");
        Some(names.clone())
    }

    /// Convert TVDB season/episode to the AniDB absolute episode number.
    pub async fn tvdb_to_anidb_episode(
        &self,
        tvdb_id: i64,
        season: i64,
        episode: i64,
    ) -> Option<i64> {
        let mapping = self
            .get_single_mapping(tvdb_id, "tvdb", season, episode, Some("anidb"))
            .await?;

        let absolute = extract_absolute(&mapping, "anidb")?;
        info!(
            tvdb_id = tvdb_id,
            season = season,
            episode = episode,
            absolute = absolute,
            "TheXEM mapped episode to AniDB absolute number"
        );
        Some(absolute)
    }
}

fn extract_absolute(mapping: &Value, destination: &str) -> Option<i64> {
    mapping.get(destination)?.get("absolute")?.as_i64()
}

fn parse_all_names(data: &Value) -> HashMap<i64, Vec<String>> {
    let mut names = HashMap::new();
    if let Some(object) = data.as_object() {
        for (id_str, value) in object {
            let Ok(id) = id_str.parse::<i64>() else {
                continue;
            };
            let show_names: Vec<String> = match value {
                Value::Array(items) => items
                    .iter()
                    .filter_map(collect_name)
                    .collect(),
                _ => Vec::new(),
            };
            names.insert(id, show_names);
        }
    }
    names
}

// Name lists mix bare strings with {"name": season} objects.
fn collect_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.keys().next().cloned(),
        _ => None,
    }
}

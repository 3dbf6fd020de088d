//! Sonarr API v3 client for episode metadata lookup.
//!
//! When Sonarr sends a bare numeric query (no season/episode parameters),
//! its own episode inventory is the only reliable way to tell which episode
//! is actually being searched. The client is optional: without a configured
//! URL and API key every lookup simply returns nothing.
//!
//! Sonarr payloads have an open schema, so responses are held as dynamic
//! JSON and projected to [`EpisodeInfo`] at the API boundary.

use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::SonarrConfig;
use crate::models::EpisodeInfo;

/// Client for the PVR's REST API with per-series caching.
pub struct SonarrClient {
    base_url: Option<String>,
    api_key: Option<String>,
    client: Client,
    series_cache: Mutex<HashMap<i64, Value>>,
    episodes_cache: Mutex<HashMap<i64, Vec<Value>>>,
}

impl SonarrClient {
    #[must_use]
    pub fn new(config: &SonarrConfig) -> Self {
        let configured = config.url.is_some() && config.api_key.is_some();
        if configured {
            info!(url = config.url.as_deref().unwrap_or(""), "Sonarr client configured");
        } else {
            info!("Sonarr client not configured (missing URL or API key)");
        }

        Self {
            base_url: config
                .url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|_| configured),
            api_key: config.api_key.clone().filter(|_| configured),
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(crate::USER_AGENT)
                .build()
                .unwrap_or_default(),
            series_cache: Mutex::new(HashMap::new()),
            episodes_cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    /// Series record for a TVDB ID, cached after the first fetch.
    pub async fn get_series_by_tvdb_id(&self, tvdb_id: i64) -> Option<Value> {
        let (base_url, api_key) = (self.base_url.as_ref()?, self.api_key.as_ref()?);

        {
            let cache = self.series_cache.lock().await;
            if let Some(series) = cache.get(&tvdb_id) {
                debug!(tvdb_id = tvdb_id, "Using cached Sonarr series");
                return Some(series.clone());
            }
        }

        let response = self
            .client
            .get(format!("{base_url}/api/v3/series"))
            .query(&[("tvdbId", tvdb_id)])
            .header("X-Api-Key", api_key)
            .send()
            .await;

        let series_list: Vec<Value> = match response {
            Ok(response) => match response.error_for_status() {
                Ok(ok) => match ok.json().await {
                    Ok(list) => list,
                    Err(e) => {
                        error!(tvdb_id = tvdb_id, error = %e, "Failed to parse Sonarr series");
                        return None;
                    }
                },
                Err(e) => {
                    error!(tvdb_id = tvdb_id, error = %e, "Sonarr API error");
                    return None;
                }
            },
            Err(e) => {
                error!(tvdb_id = tvdb_id, error = %e, "Failed to query Sonarr");
                return None;
            }
        };

        let series = series_list.into_iter().next()?;
        info!(
            tvdb_id = tvdb_id,
            title = series.get("title").and_then(serde_json::Value::as_str).unwrap_or(""),
            "Found series in Sonarr"
        );
        self.series_cache.lock().await.insert(tvdb_id, series.clone());
        Some(series)
    }

    /// All episodes of a Sonarr series, cached after the first fetch.
    pub async fn get_episodes_by_series_id(&self, series_id: i64) -> Vec<Value> {
        let (Some(base_url), Some(api_key)) = (self.base_url.as_ref(), self.api_key.as_ref())
        else {
            return Vec::new();
        };

        {
            let cache = self.episodes_cache.lock().await;
            if let Some(episodes) = cache.get(&series_id) {
                debug!(series_id = series_id, "Using cached Sonarr episodes");
                return episodes.clone();
            }
        }

        // Episode listings for long-running shows are big; allow more time.
        let response = self
            .client
            .get(format!("{base_url}/api/v3/episode"))
            .query(&[("seriesId", series_id)])
            .header("X-Api-Key", api_key)
            .timeout(Duration::from_secs(15))
            .send()
            .await;

        let episodes: Vec<Value> = match response {
            Ok(response) => match response.error_for_status() {
                Ok(ok) => ok.json().await.unwrap_or_default(),
                Err(e) => {
                    error!(series_id = series_id, error = %e, "Sonarr API error");
                    return Vec::new();
                }
            },
            Err(e) => {
                error!(series_id = series_id, error = %e, "Failed to get episodes from Sonarr");
                return Vec::new();
            }
        };

        info!(series_id = series_id, episodes = episodes.len(), "Retrieved Sonarr episodes");
        self.episodes_cache
            .lock()
            .await
            .insert(series_id, episodes.clone());
        episodes
    }

    /// Episodes whose number-within-season matches `episode_num`, preferring
    /// wanted ones (monitored and missing a file), most recent season first.
    ///
    /// Returns the full wanted set when any episode is wanted, otherwise all
    /// candidates; the caller inspects `is_special` and the absolute numbers.
    pub async fn get_wanted_episodes_by_episode_number(
        &self,
        tvdb_id: i64,
        episode_num: i64,
    ) -> Vec<EpisodeInfo> {
        let Some(series) = self.get_series_by_tvdb_id(tvdb_id).await else {
            return Vec::new();
        };
        let Some(series_id) = series.get("id").and_then(Value::as_i64) else {
            return Vec::new();
        };

        let episodes = self.get_episodes_by_series_id(series_id).await;
        let picked = pick_episodes_by_number(&episodes, episode_num);

        if picked.is_empty() {
            debug!(
                tvdb_id = tvdb_id,
                episode_num = episode_num,
                "No episodes with matching episode number in Sonarr"
            );
            return Vec::new();
        }

        let infos: Vec<EpisodeInfo> = picked
            .iter()
            .map(|ep| EpisodeInfo::from_sonarr(ep, &series))
            .collect();

        info!(
            tvdb_id = tvdb_id,
            episode_num = episode_num,
            matches = infos.len(),
            first_season = infos[0].season_number,
            "Resolved bare episode number via Sonarr"
        );
        infos
    }

    /// Find an episode by its absolute number.
    pub async fn get_episode_by_absolute_number(
        &self,
        tvdb_id: i64,
        absolute_ep: i64,
    ) -> Option<EpisodeInfo> {
        let series = self.get_series_by_tvdb_id(tvdb_id).await?;
        let series_id = series.get("id").and_then(Value::as_i64)?;

        let episodes = self.get_episodes_by_series_id(series_id).await;
        let episode = episodes.iter().find(|ep| {
            ep.get("absoluteEpisodeNumber").and_then(Value::as_i64) == Some(absolute_ep)
        })?;

        let info = EpisodeInfo::from_sonarr(episode, &series);
        info!(
            tvdb_id = tvdb_id,
            absolute = absolute_ep,
            season = info.season_number,
            episode = info.episode_number,
            special = info.is_special,
            "Found episode by absolute number in Sonarr"
        );
        Some(info)
    }

    /// Drop all cached series and episode data.
    pub async fn clear_cache(&self) {
        self.series_cache.lock().await.clear();
        self.episodes_cache.lock().await.clear();
        debug!("Sonarr cache cleared");
    }
}

/// Select episodes matching an episode-within-season number.
///
/// Candidates are regular-season episodes only (season > 0 — specials never
/// answer a bare number directly). Wanted episodes win when present; the
/// result is sorted by season descending so the most recent season, the one
/// the user is most likely searching, comes first.
fn pick_episodes_by_number(episodes: &[Value], episode_num: i64) -> Vec<Value> {
    let candidates: Vec<&Value> = episodes
        .iter()
        .filter(|ep| {
            ep.get("episodeNumber").and_then(Value::as_i64) == Some(episode_num)
                && ep.get("seasonNumber").and_then(Value::as_i64).unwrap_or(0) > 0
        })
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    let wanted: Vec<&Value> = candidates
        .iter()
        .copied()
        .filter(|ep| {
            ep.get("monitored").and_then(Value::as_bool).unwrap_or(false)
                && !ep.get("hasFile").and_then(Value::as_bool).unwrap_or(true)
        })
        .collect();

    let mut picked = if wanted.is_empty() { candidates } else { wanted };
    picked.sort_by_key(|ep| {
        std::cmp::Reverse(ep.get("seasonNumber").and_then(Value::as_i64).unwrap_or(0))
    });
    picked.into_iter().cloned().collect()
}

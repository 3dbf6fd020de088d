//! Mapping resolver: TVDB series ID -> canonical anime record.
//!
//! Sources are layered by priority: user override, warm cache, offline
//! catalog (enriched with AniList metadata), nothing. Resolved mappings are
//! cached in memory and persisted to disk on every mutation; override-based
//! mappings are synthesized per request and never stored in resolved form.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::clients::anilist::AnilistClient;
use crate::clients::offline_db::OfflineCatalog;
use crate::models::{AnimeMapping, AnimeTitle, MappingOverride};

const MAPPINGS_FILENAME: &str = "mappings.json";
const OVERRIDES_FILENAME: &str = "overrides.json";

/// Resolver composing overrides, cache, catalog and online metadata into
/// [`AnimeMapping`] records.
pub struct MappingResolver {
    mappings_file: PathBuf,
    overrides_file: PathBuf,
    cache_ttl_seconds: i64,
    catalog: Arc<OfflineCatalog>,
    anilist: Arc<AnilistClient>,
    cache: RwLock<HashMap<i64, AnimeMapping>>,
    overrides: RwLock<HashMap<i64, MappingOverride>>,
    // Per-id guards so a burst of requests for the same series composes the
    // mapping upstream only once.
    inflight: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl MappingResolver {
    #[must_use]
    pub fn new(
        data_dir: &std::path::Path,
        cache_ttl_seconds: i64,
        catalog: Arc<OfflineCatalog>,
        anilist: Arc<AnilistClient>,
    ) -> Self {
        Self {
            mappings_file: data_dir.join(MAPPINGS_FILENAME),
            overrides_file: data_dir.join(OVERRIDES_FILENAME),
            cache_ttl_seconds,
            catalog,
            anilist,
            cache: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Load persisted mappings and overrides. Corrupt files are logged and
    /// treated as empty.
    pub async fn initialize(&self) {
        match load_json_map::<AnimeMapping>(&self.mappings_file).await {
            Ok(mappings) => {
                if !mappings.is_empty() {
                    info!(mappings = mappings.len(), "Loaded cached mappings");
                }
                *self.cache.write().await = mappings;
            }
            Err(e) => error!(error = %e, "Failed to load mappings cache"),
        }

        match load_json_map::<MappingOverride>(&self.overrides_file).await {
            Ok(overrides) => {
                if !overrides.is_empty() {
                    info!(overrides = overrides.len(), "Loaded user overrides");
                }
                *self.overrides.write().await = overrides;
            }
            Err(e) => error!(error = %e, "Failed to load overrides"),
        }
    }

    /// The raw override for a series, if one exists.
    pub async fn override_for(&self, tvdb_id: i64) -> Option<MappingOverride> {
        self.overrides.read().await.get(&tvdb_id).cloned()
    }

    /// Store an override and invalidate any resolved mapping for that id.
    pub async fn save_override(&self, override_entry: MappingOverride) -> Result<()> {
        let tvdb_id = override_entry.tvdb_id;

        {
            let mut overrides = self.overrides.write().await;
            overrides.insert(tvdb_id, override_entry);
            save_json_map(&self.overrides_file, &overrides)
                .await
                .context("Failed to save overrides")?;
        }

        let mut cache = self.cache.write().await;
        if cache.remove(&tvdb_id).is_some() {
            if let Err(e) = save_json_map(&self.mappings_file, &cache).await {
                error!(error = %e, "Failed to save mappings cache");
            }
        }

        info!(tvdb_id = tvdb_id, "Saved override");
        Ok(())
    }

    /// Resolve the mapping for a TVDB series ID.
    ///
    /// Priority: user override, non-stale cache, offline catalog composed
    /// with AniList enrichment. Returns `None` when every source misses.
    pub async fn get_mapping(&self, tvdb_id: i64) -> Option<AnimeMapping> {
        if let Some(override_entry) = self.override_for(tvdb_id).await {
            debug!(tvdb_id = tvdb_id, "Using user override");
            return Some(self.mapping_from_override(&override_entry).await);
        }

        if let Some(cached) = self.fresh_cached(tvdb_id).await {
            debug!(tvdb_id = tvdb_id, "Using cached mapping");
            return Some(cached);
        }

        // Single-flight per id: the first caller composes, the rest wait and
        // then hit the cache.
        let guard = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(tvdb_id).or_default().clone()
        };
        let _composing = guard.lock().await;

        if let Some(cached) = self.fresh_cached(tvdb_id).await {
            return Some(cached);
        }

        let entry = self.catalog.lookup_by_series_id(tvdb_id);
        if let Some(entry) = entry {
            info!(tvdb_id = tvdb_id, title = %entry.title, "Found mapping in offline catalog");
            let mapping = self.mapping_from_catalog(tvdb_id, &entry).await;
            self.cache_mapping(mapping.clone()).await;
            return Some(mapping);
        }

        warn!(tvdb_id = tvdb_id, "No mapping found");
        None
    }

    async fn fresh_cached(&self, tvdb_id: i64) -> Option<AnimeMapping> {
        let cache = self.cache.read().await;
        let cached = cache.get(&tvdb_id)?;
        let age = (Utc::now() - cached.last_updated).num_seconds();
        if cached.user_override || age < self.cache_ttl_seconds {
            Some(cached.clone())
        } else {
            None
        }
    }

    async fn mapping_from_catalog(
        &self,
        tvdb_id: i64,
        entry: &crate::clients::offline_db::CatalogEntry,
    ) -> AnimeMapping {
        let ids = OfflineCatalog::extract_ids(entry);
        let mut titles = OfflineCatalog::extract_titles(entry);
        let mut total_episodes = 0;

        if let Some(anilist_id) = ids.anilist_id
            && let Some(media) = self.anilist.get_by_id(anilist_id).await
        {
            titles = titles.merged_with(&media.extract_titles());
            total_episodes = media.episode_count();
        }

        AnimeMapping {
            tvdb_id,
            anidb_id: ids.anidb_id,
            anilist_id: ids.anilist_id,
            mal_id: ids.mal_id,
            titles,
            total_episodes,
            season_info: Vec::new(),
            last_updated: Utc::now(),
            user_override: false,
        }
    }

    async fn mapping_from_override(&self, override_entry: &MappingOverride) -> AnimeMapping {
        let mut titles = AnimeTitle {
            synonyms: override_entry.custom_titles.clone(),
            ..AnimeTitle::default()
        };
        let mut total_episodes = 0;

        if let Some(anilist_id) = override_entry.anilist_id
            && let Some(media) = self.anilist.get_by_id(anilist_id).await
        {
            titles = titles.merged_with(&media.extract_titles());
            total_episodes = media.episode_count();
        }

        AnimeMapping {
            tvdb_id: override_entry.tvdb_id,
            anidb_id: override_entry.anidb_id,
            anilist_id: override_entry.anilist_id,
            mal_id: override_entry.mal_id,
            titles,
            total_episodes,
            season_info: override_entry.season_info.clone(),
            last_updated: Utc::now(),
            user_override: true,
        }
    }

    async fn cache_mapping(&self, mapping: AnimeMapping) {
        let mut cache = self.cache.write().await;
        cache.insert(mapping.tvdb_id, mapping);
        if let Err(e) = save_json_map(&self.mappings_file, &cache).await {
            error!(error = %e, "Failed to save mappings cache");
        }
    }

    /// Seed the in-memory cache directly, persisting like any mutation.
    pub async fn insert_mapping(&self, mapping: AnimeMapping) {
        self.cache_mapping(mapping).await;
    }
}

/// Load a JSON object keyed by textual series id. A missing file is an empty
/// map.
async fn load_json_map<T>(path: &std::path::Path) -> Result<HashMap<i64, T>>
where
    T: serde::de::DeserializeOwned,
{
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(HashMap::new());
    }

    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: HashMap<String, T> = serde_json::from_slice(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| k.parse::<i64>().ok().map(|id| (id, v)))
        .collect())
}

/// Persist a map keyed by textual id, atomically (write + rename) so readers
/// never observe a half-written file.
async fn save_json_map<T>(path: &std::path::Path, map: &HashMap<i64, T>) -> Result<()>
where
    T: serde::Serialize,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let keyed: HashMap<String, &T> = map.iter().map(|(k, v)| (k.to_string(), v)).collect();
    let json = serde_json::to_vec_pretty(&keyed)?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), entries = map.len(), "Saved cache file");
    Ok(())
}

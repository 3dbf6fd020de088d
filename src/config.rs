use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub nyaa: NyaaConfig,

    pub sonarr: SonarrConfig,

    pub anilist: AnilistConfig,

    pub catalog: CatalogConfig,

    pub thexem: ThexemConfig,

    pub mapping: MappingConfig,

    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            nyaa: NyaaConfig::default(),
            sonarr: SonarrConfig::default(),
            anilist: AnilistConfig::default(),
            catalog: CatalogConfig::default(),
            thexem: ThexemConfig::default(),
            mapping: MappingConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub data_dir: String,

    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,

    pub port: u16,

    /// API key Sonarr must present on every non-caps request.
    pub api_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_key: "tsunagarr_api_key".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NyaaConfig {
    pub base_url: String,

    /// Restrict to English-translated releases (category 1_2).
    pub english_only: bool,

    /// Only trusted uploads (filter f=2).
    pub trusted_only: bool,

    pub request_timeout_seconds: u32,
}

impl Default for NyaaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nyaa.si".to_string(),
            english_only: true,
            trusted_only: false,
            request_timeout_seconds: 30,
        }
    }
}

/// Optional Sonarr connection, used to disambiguate bare-numeric queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SonarrConfig {
    pub url: Option<String>,

    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnilistConfig {
    pub api_url: String,

    /// Requests allowed per 60-second window.
    pub rate_limit: u32,
}

impl Default for AnilistConfig {
    fn default() -> Self {
        Self {
            api_url: "https://graphql.anilist.co".to_string(),
            rate_limit: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub url: String,

    pub update_interval_hours: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: "https://github.com/manami-project/anime-offline-database/releases/latest/download/anime-offline-database-minified.json".to_string(),
            update_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThexemConfig {
    pub base_url: String,
}

impl Default for ThexemConfig {
    fn default() -> Self {
        Self {
            base_url: "https://thexem.info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Resolved mappings become stale after this many seconds (one week).
    pub cache_ttl_seconds: i64,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 604_800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enable_deduplication: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enable_deduplication: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("TSUNAGARR_CONFIG") {
            return Self::load_from_path(Path::new(&path));
        }

        for path in Self::config_paths() {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("tsunagarr").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".tsunagarr").join("config.toml"));
        }

        paths
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = PathBuf::from("config.toml");
        if path.exists() {
            Ok(false)
        } else {
            Self::default().save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    /// A few environment overrides for container deployments.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("TSUNAGARR_API_KEY") {
            self.server.api_key = key;
        }
        if let Ok(dir) = std::env::var("TSUNAGARR_DATA_DIR") {
            self.general.data_dir = dir;
        }
        if let Ok(url) = std::env::var("NYAA_URL") {
            self.nyaa.base_url = url;
        }
        if let Ok(url) = std::env::var("SONARR_URL") {
            self.sonarr.url = Some(url);
        }
        if let Ok(key) = std::env::var("SONARR_API_KEY") {
            self.sonarr.api_key = Some(key);
        }
    }

    /// Missing required settings are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.server.api_key.is_empty() {
            anyhow::bail!("server.api_key cannot be empty");
        }

        if self.nyaa.base_url.is_empty() {
            anyhow::bail!("nyaa.base_url cannot be empty");
        }

        if self.sonarr.url.is_some() != self.sonarr.api_key.is_some() {
            anyhow::bail!("sonarr.url and sonarr.api_key must be set together");
        }

        Ok(())
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.general.data_dir)
    }
}

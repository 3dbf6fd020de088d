//! Application-wide constants
//!
//! Centralizes magic values that are used across multiple modules.

/// Torznab category advertised to Sonarr for every anime result (TV > Anime).
pub const TORZNAB_ANIME_CATEGORY: i32 = 5070;

/// Nyaa category codes (the `c=` query parameter).
pub mod nyaa_category {
    pub const ANIME_ENGLISH: &str = "1_2";
    pub const ALL_ANIME: &str = "1_0";
}

/// Nyaa filter codes (the `f=` query parameter).
pub mod nyaa_filter {
    pub const NONE: &str = "0";
    pub const TRUSTED_ONLY: &str = "2";
}

/// Rate limiting and caching knobs for the indexer client.
pub mod indexer {
    use std::time::Duration;

    /// Search result cache lifetime.
    pub const CACHE_TTL: Duration = Duration::from_secs(60);

    /// Maximum cached search responses before the oldest is evicted.
    pub const CACHE_CAPACITY: usize = 100;

    /// Maximum in-flight requests to the indexer.
    pub const MAX_CONCURRENT_REQUESTS: usize = 2;

    /// Minimum spacing between request starts.
    pub const REQUEST_DELAY: Duration = Duration::from_millis(500);

    /// Retry attempts after an HTTP 429.
    pub const MAX_RETRIES: u32 = 3;
}

/// Persisted cache lifetimes.
pub mod cache {
    /// Episode-map (TheXEM) cache freshness duration.
    pub const EPISODE_MAP_TTL_DAYS: i64 = 7;
}

/// Keywords appended when searching for specials (season 0 content).
pub const SPECIAL_KEYWORDS: &[&str] = &["OVA", "Special", "OAD", "Movie"];

/// Episodes per season assumed when no better metadata exists.
pub const ESTIMATED_EPISODES_PER_SEASON: i64 = 12;

/// API limits.
pub mod limits {
    /// Maximum (and default) results per Torznab query.
    pub const MAX_RESULTS_PER_QUERY: usize = 100;
}

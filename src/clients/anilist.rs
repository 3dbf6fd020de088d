//! AniList GraphQL client used to enrich mappings.
//!
//! Strictly an enrichment source: every failure degrades to "no data" so the
//! resolver can proceed with whatever the offline catalog provided. AniList
//! enforces a per-minute request quota, honored here with a token bucket
//! that sleeps until the window resets when exhausted.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::config::AnilistConfig;
use crate::models::AnimeTitle;

const RATE_LIMIT_WINDOW_SECS: i64 = 60;

const QUERY_BY_ID: &str = r"
query ($id: Int) {
  Media(id: $id, type: ANIME) {
    id
    idMal
    title {
      romaji
      english
      native
    }
    synonyms
    episodes
    format
    season
    seasonYear
  }
}
";

#[derive(Serialize)]
struct GraphQLRequest<'a> {
    query: &'a str,
    variables: IdVariables,
}

#[derive(Serialize)]
struct IdVariables {
    id: i64,
}

#[derive(Deserialize)]
struct GraphQLResponse {
    #[serde(default)]
    data: Option<MediaWrapper>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct MediaWrapper {
    #[serde(rename = "Media")]
    media: Option<Media>,
}

#[derive(Deserialize)]
struct Title {
    romaji: Option<String>,
    english: Option<String>,
    native: Option<String>,
}

/// One anime record as AniList returns it.
#[derive(Deserialize)]
pub struct Media {
    pub id: i64,
    #[serde(rename = "idMal")]
    pub id_mal: Option<i64>,
    title: Option<Title>,
    #[serde(default)]
    synonyms: Vec<String>,
    episodes: Option<i64>,
    pub format: Option<String>,
}

impl Media {
    /// Project title variants out of the record.
    #[must_use]
    pub fn extract_titles(&self) -> AnimeTitle {
        AnimeTitle {
            romaji: self.title.as_ref().and_then(|t| t.romaji.clone()),
            english: self.title.as_ref().and_then(|t| t.english.clone()),
            native: self.title.as_ref().and_then(|t| t.native.clone()),
            synonyms: self.synonyms.clone(),
        }
    }

    #[must_use]
    pub fn episode_count(&self) -> i64 {
        self.episodes.unwrap_or(0)
    }
}

struct RateState {
    tokens: u32,
    last_reset: DateTime<Utc>,
}

/// Rate-limited AniList GraphQL client.
pub struct AnilistClient {
    api_url: String,
    rate_limit: u32,
    client: Client,
    state: Mutex<RateState>,
}

impl AnilistClient {
    #[must_use]
    pub fn new(config: &AnilistConfig) -> Self {
        Self {
            api_url: config.api_url.clone(),
            rate_limit: config.rate_limit,
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(crate::USER_AGENT)
                .build()
                .unwrap_or_default(),
            state: Mutex::new(RateState {
                tokens: config.rate_limit,
                last_reset: Utc::now(),
            }),
        }
    }

    /// Take a token, sleeping until the window resets when the quota is
    /// spent.
    async fn wait_for_rate_limit(&self) {
        let mut state = self.state.lock().await;

        let now = Utc::now();
        if (now - state.last_reset).num_seconds() >= RATE_LIMIT_WINDOW_SECS {
            state.tokens = self.rate_limit;
            state.last_reset = now;
        }

        if state.tokens == 0 {
            let elapsed = (now - state.last_reset).num_seconds();
            let wait = RATE_LIMIT_WINDOW_SECS - elapsed;
            if wait > 0 {
                warn!(wait_secs = wait, "AniList rate limit reached, waiting");
                #[allow(clippy::cast_sign_loss)]
                tokio::time::sleep(Duration::from_secs(wait as u64)).await;
            }
            state.tokens = self.rate_limit;
            state.last_reset = Utc::now();
        }

        state.tokens -= 1;
    }

    /// Fetch an anime record by AniList ID. Any failure returns `None`.
    pub async fn get_by_id(&self, anilist_id: i64) -> Option<Media> {
        self.wait_for_rate_limit().await;

        let request = GraphQLRequest {
            query: QUERY_BY_ID,
            variables: IdVariables { id: anilist_id },
        };

        let response = match self.client.post(&self.api_url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(anilist_id = anilist_id, error = %e, "AniList request failed");
                return None;
            }
        };

        let parsed: GraphQLResponse = match response.error_for_status() {
            Ok(ok) => match ok.json().await {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!(anilist_id = anilist_id, error = %e, "AniList response parse failed");
                    return None;
                }
            },
            Err(e) => {
                error!(anilist_id = anilist_id, error = %e, "AniList API error");
                return None;
            }
        };

        if let Some(errors) = parsed.errors {
            error!(anilist_id = anilist_id, errors = %errors, "AniList returned errors");
            return None;
        }

        parsed.data.and_then(|d| d.media)
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Episode metadata projected out of a Sonarr episode record.
///
/// Sonarr's episode payload has an open schema; only the fields needed to
/// disambiguate bare-numeric queries are projected here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub series_id: i64,
    pub series_title: String,
    pub season_number: i64,
    pub episode_number: i64,
    pub absolute_episode_number: Option<i64>,
    pub is_special: bool,
}

impl EpisodeInfo {
    /// Project a Sonarr episode + series pair into a strict record.
    #[must_use]
    pub fn from_sonarr(episode: &Value, series: &Value) -> Self {
        let season_number = episode
            .get("seasonNumber")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        Self {
            series_id: series.get("id").and_then(Value::as_i64).unwrap_or(0),
            series_title: series
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            season_number,
            episode_number: episode
                .get("episodeNumber")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            absolute_episode_number: episode
                .get("absoluteEpisodeNumber")
                .and_then(Value::as_i64),
            is_special: season_number == 0,
        }
    }
}

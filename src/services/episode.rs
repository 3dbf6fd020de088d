//! Episode number translation between seasonal and absolute numbering.

use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::thexem::XemClient;
use crate::constants::ESTIMATED_EPISODES_PER_SEASON;
use crate::models::{AnimeMapping, MappingOverride, SeasonEpisodes};
use crate::services::mapping::MappingResolver;

/// Translates `SxxEyy` coordinates to the absolute numbering used by anime
/// indexers and fansub groups.
pub struct EpisodeTranslator {
    resolver: Arc<MappingResolver>,
    xem: Arc<XemClient>,
}

impl EpisodeTranslator {
    #[must_use]
    pub fn new(resolver: Arc<MappingResolver>, xem: Arc<XemClient>) -> Self {
        Self { resolver, xem }
    }

    /// Convert season/episode to an absolute episode number.
    ///
    /// Priority: user override, TheXEM, the mapping's season shape, then a
    /// last-resort estimate. Always yields a number; the estimate for
    /// seasons beyond the known shape assumes twelve episodes per season.
    pub async fn to_absolute(&self, mapping: &AnimeMapping, season: i64, episode: i64) -> i64 {
        if mapping.user_override
            && let Some(override_entry) = self.resolver.override_for(mapping.tvdb_id).await
            && let Some(&absolute) = override_entry
                .episode_overrides
                .get(&MappingOverride::episode_key(season, episode))
        {
            info!(
                tvdb_id = mapping.tvdb_id,
                season = season,
                episode = episode,
                absolute = absolute,
                "Using override episode mapping"
            );
            return absolute;
        }

        if let Some(absolute) = self
            .xem
            .tvdb_to_anidb_episode(mapping.tvdb_id, season, episode)
            .await
        {
            return absolute;
        }

        if let Some(absolute) = absolute_from_season_info(&mapping.season_info, season, episode) {
            return absolute;
        }

        if season <= 1 {
            return episode;
        }

        let estimate = (season - 1) * ESTIMATED_EPISODES_PER_SEASON + episode;
        warn!(
            tvdb_id = mapping.tvdb_id,
            season = season,
            episode = episode,
            estimate = estimate,
            "No episode mapping available, estimating absolute number"
        );
        estimate
    }
}

/// Sum the episode counts of earlier seasons and add the target episode.
///
/// Fails when the target season is not in the shape or the episode number
/// exceeds the season's episode count.
#[must_use]
pub fn absolute_from_season_info(
    season_info: &[SeasonEpisodes],
    target_season: i64,
    target_episode: i64,
) -> Option<i64> {
    let mut absolute = 0;
    let mut sorted: Vec<&SeasonEpisodes> = season_info.iter().collect();
    sorted.sort_by_key(|s| s.season);

    for season in sorted {
        if season.season < target_season {
            absolute += season.episodes;
        } else if season.season == target_season {
            if target_episode <= season.episodes {
                return Some(absolute + target_episode);
            }
            warn!(
                season = target_season,
                episode = target_episode,
                episodes_in_season = season.episodes,
                "Episode exceeds season episode count"
            );
            return None;
        } else {
            break;
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> Vec<SeasonEpisodes> {
        vec![
            SeasonEpisodes {
                season: 1,
                episodes: 13,
            },
            SeasonEpisodes {
                season: 2,
                episodes: 12,
            },
            SeasonEpisodes {
                season: 3,
                episodes: 24,
            },
        ]
    }

    #[test]
    fn test_first_season_is_identity() {
        assert_eq!(absolute_from_season_info(&shape(), 1, 5), Some(5));
    }

    #[test]
    fn test_later_season_sums_previous() {
        assert_eq!(absolute_from_season_info(&shape(), 2, 1), Some(14));
        assert_eq!(absolute_from_season_info(&shape(), 3, 10), Some(35));
    }

    #[test]
    fn test_episode_beyond_season_count_fails() {
        assert_eq!(absolute_from_season_info(&shape(), 2, 13), None);
    }

    #[test]
    fn test_unknown_season_fails() {
        assert_eq!(absolute_from_season_info(&shape(), 4, 1), None);
        assert_eq!(absolute_from_season_info(&[], 1, 1), None);
    }

    #[test]
    fn test_unordered_shape_is_sorted_first() {
        let mut unordered = shape();
        unordered.reverse();
        assert_eq!(absolute_from_season_info(&unordered, 2, 1), Some(14));
    }
}

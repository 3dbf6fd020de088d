pub mod episode;
pub mod mapping;
pub mod result;

pub use episode::EpisodeInfo;
pub use mapping::{AnimeMapping, AnimeTitle, MappingOverride, SeasonEpisodes};
pub use result::SearchResult;

pub mod anilist;
pub mod nyaa;
pub mod offline_db;
pub mod sonarr;
pub mod thexem;

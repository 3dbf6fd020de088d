//! Shared application state: every process-lifetime service, wired once at
//! startup with explicit constructor injection.

use anyhow::Result;
use std::sync::Arc;

use crate::clients::anilist::AnilistClient;
use crate::clients::nyaa::NyaaClient;
use crate::clients::offline_db::OfflineCatalog;
use crate::clients::sonarr::SonarrClient;
use crate::clients::thexem::XemClient;
use crate::config::Config;
use crate::services::{EpisodeTranslator, MappingResolver, QueryPlanner, SpecialResolver};

/// Process-wide services shared by the API handlers and the CLI.
pub struct SharedState {
    pub config: Config,

    pub nyaa: Arc<NyaaClient>,

    pub catalog: Arc<OfflineCatalog>,

    pub anilist: Arc<AnilistClient>,

    pub xem: Arc<XemClient>,

    pub sonarr: Arc<SonarrClient>,

    pub resolver: Arc<MappingResolver>,

    pub translator: Arc<EpisodeTranslator>,

    pub planner: Arc<QueryPlanner>,

    pub special: Arc<SpecialResolver>,
}

impl SharedState {
    /// Construct and initialize all services.
    ///
    /// The episode translator holds a reference to the resolver (for
    /// per-episode overrides) and the resolver holds the metadata client
    /// (for enrichment); wiring them here keeps the dependency direction
    /// explicit.
    pub async fn new(config: Config) -> Result<Self> {
        let data_dir = config.data_dir();

        let nyaa = Arc::new(NyaaClient::new(&config.nyaa));
        let catalog = Arc::new(OfflineCatalog::new(&config.catalog, &data_dir));
        let anilist = Arc::new(AnilistClient::new(&config.anilist));
        let xem = Arc::new(XemClient::new(&config.thexem.base_url, &data_dir));
        let sonarr = Arc::new(SonarrClient::new(&config.sonarr));

        let resolver = Arc::new(MappingResolver::new(
            &data_dir,
            config.mapping.cache_ttl_seconds,
            catalog.clone(),
            anilist.clone(),
        ));
        let translator = Arc::new(EpisodeTranslator::new(resolver.clone(), xem.clone()));
        let planner = Arc::new(QueryPlanner::new(
            nyaa.clone(),
            catalog.clone(),
            translator.clone(),
            config.search.enable_deduplication,
        ));
        let special = Arc::new(SpecialResolver::new(sonarr.clone(), planner.clone()));

        catalog.initialize().await?;
        xem.initialize().await;
        resolver.initialize().await;

        Ok(Self {
            config,
            nyaa,
            catalog,
            anilist,
            xem,
            sonarr,
            resolver,
            translator,
            planner,
            special,
        })
    }
}

pub mod api;
pub mod cli;
pub mod clients;
pub mod config;
pub mod constants;
pub mod models;
pub mod parser;
pub mod services;
pub mod state;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use state::SharedState;

pub use config::Config;

/// User-agent sent on every outbound HTTP request.
pub const USER_AGENT: &str = concat!("Tsunagarr/", env!("CARGO_PKG_VERSION"));

pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut config = Config::load()?;
    config.apply_env_overrides();
    run_with_config(config).await
}

pub async fn run_with_config(config: Config) -> Result<()> {
    config.validate()?;
    init_logging(&config);

    let cli = Cli::parse();
    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,

        Some(Commands::Init) => {
            if Config::create_default_if_missing()? {
                println!("✓ Config file created. Edit config.toml and run again.");
            } else {
                println!("config.toml already exists");
            }
            Ok(())
        }

        Some(Commands::Lookup { tvdbid }) => lookup(config, tvdbid).await,
    }
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config: Config) -> Result<()> {
    info!("Tsunagarr v{} starting...", env!("CARGO_PKG_VERSION"));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(SharedState::new(config).await?);

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Torznab API: http://{addr}/api");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn lookup(config: Config, tvdb_id: i64) -> Result<()> {
    let state = SharedState::new(config).await?;

    match state.resolver.get_mapping(tvdb_id).await {
        Some(mapping) => println!("{}", serde_json::to_string_pretty(&mapping)?),
        None => println!("No mapping found for TVDB {tvdb_id}"),
    }
    Ok(())
}

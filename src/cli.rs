use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tsunagarr",
    version,
    about = "Torznab anime proxy between Sonarr and Nyaa.si"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the Torznab proxy server (default)
    Serve,

    /// Write a default config.toml if none exists
    Init,

    /// Resolve and print the anime mapping for a TVDB series id
    Lookup { tvdbid: i64 },
}

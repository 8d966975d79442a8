mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use catalog_sync::{DataSource, ProviderRegistry};
use catalog_sync_feeds::register_feeds;
use catalog_sync_store::CatalogStore;
use clap::{Parser, Subcommand};

use crate::commands::sync::SyncRequest;
use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "catalog-sync")]
#[command(about = "Synchronize the catalog from external providers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync for a provider
    Sync {
        /// Provider local class (StockFeed, CatalogDump, BankInformation)
        #[arg(long)]
        provider: String,
        /// Venue provider id, for venue-bound providers
        #[arg(long)]
        venue_provider: Option<i64>,
        /// Stop after this many upstream records
        #[arg(long)]
        limit: Option<u64>,
        /// Read local fixtures instead of the live upstream
        #[arg(long)]
        mock: bool,
    },
    /// List providers and their venue bindings
    Providers,
    /// Create or re-enable a provider
    Activate {
        /// Provider local class
        local_class: String,
    },
    /// Disable a provider without deleting it
    Deactivate {
        /// Provider local class
        local_class: String,
    },
    /// Manage venue bindings
    VenueProvider {
        #[command(subcommand)]
        command: VenueProviderCommand,
    },
    /// Show a provider's recent sync events
    Events {
        /// Provider local class
        #[arg(long)]
        provider: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print one synced entity
    Show {
        /// Entity kind (product, venue, offer, stock, bank-information)
        kind: String,
        /// External id at the provider
        external_id: String,
    },
}

#[derive(Subcommand)]
enum VenueProviderCommand {
    /// Bind a provider to a venue
    Add {
        /// Provider local class
        #[arg(long)]
        provider: String,
        /// Venue id
        #[arg(long)]
        venue: i64,
        /// How the provider identifies the venue, usually its SIRET
        #[arg(long)]
        id_at_provider: String,
    },
}

fn cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("could not determine cache directory")?;
    Ok(base.join("catalog-sync"))
}

fn db_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.database_path {
        Some(path) => Ok(path.clone()),
        None => Ok(cache_dir()?.join("catalog.db")),
    }
}

fn build_store(config: &AppConfig) -> Result<CatalogStore> {
    let path = db_path(config)?;
    CatalogStore::open(&path)
        .with_context(|| format!("failed to open catalog database: {}", path.display()))
}

fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    register_feeds(&mut registry, config.feeds());
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing("info");
    let cli = Cli::parse();
    let config = config::load_config();
    let store = build_store(&config)?;

    match cli.command {
        Command::Sync {
            provider,
            venue_provider,
            limit,
            mock,
        } => {
            let registry = build_registry(&config);
            let request = SyncRequest {
                local_class: &provider,
                venue_provider_id: venue_provider,
                limit,
                data_source: if mock {
                    DataSource::Mock
                } else {
                    DataSource::Live
                },
            };
            commands::sync::run(&store, &registry, &config, request).await
        }
        Command::Providers => commands::providers::list(&store),
        Command::Activate { local_class } => {
            commands::providers::set_active(&store, &local_class, true)
        }
        Command::Deactivate { local_class } => {
            commands::providers::set_active(&store, &local_class, false)
        }
        Command::VenueProvider {
            command:
                VenueProviderCommand::Add {
                    provider,
                    venue,
                    id_at_provider,
                },
        } => {
            commands::providers::add_venue_provider(&store, &provider, venue, &id_at_provider)
                .await
        }
        Command::Events { provider, limit } => {
            commands::events::run(&store, &provider, limit).await
        }
        Command::Show { kind, external_id } => {
            commands::show::run(&store, &kind, &external_id).await
        }
    }
}

//! Exchange market-data CLI
//!
//! Commands:
//! - `book`: live prices for one or more markets (`/Data` envelope)
//! - `catalog`: catalogue entry for one market, prices snapshotted
//! - `catalogs`: catalogue entries for several markets
//! - `sports`, `competitions`, `events`, `markets`: navigation listings
//! - `stats`: active-events dashboard aggregate
//! - `ping`: betting endpoint connectivity
//!
//! # Usage
//! ```bash
//! BETFAIR_APP_KEY=... BETFAIR_SESSION_TOKEN=...
//! bf_market book --ids 1.179082386
//! bf_market book --ids 1.179082386 --debug
//! bf_market catalogs --ids 1.1,1.2,1.3 --out data/catalogs.json
//! bf_market sports --major
//! bf_market events --sport-id 4
//! bf_market markets --event-id 30001 --market-types MATCH_ODDS
//! bf_market stats --cache-dir data/cache
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info, warn};

use betfair_adapter::cache::JsonDirStore;
use betfair_adapter::{
    ApiCredentials, BettingRestClient, MarketDataService, PipelineConfig, PipelineError, BETTING_REST_BASE,
};

#[derive(Parser)]
#[command(name = "bf_market")]
#[command(about = "Exchange market-data CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Betting API base URL
    #[arg(long, default_value = BETTING_REST_BASE, global = true)]
    base_url: String,

    /// Persist payloads as JSON files under this directory (overrides BF_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Ignore cached payloads and refetch
    #[arg(long, default_value = "false", global = true)]
    bypass_cache: bool,

    /// Output file for the JSON response (optional, defaults to stdout)
    #[arg(long, global = true)]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Live prices in the legacy /Data envelope
    Book {
        /// Comma-separated market ids, e.g. 1.179082386,1.179082387
        #[arg(long)]
        ids: String,

        /// Echo raw upstream records (implies --bypass-cache)
        #[arg(long, default_value = "false")]
        debug: bool,

        /// Market ids per upstream call
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Catalogue entry for one market
    Catalog {
        #[arg(long)]
        id: String,

        #[arg(long, default_value = "false")]
        debug: bool,
    },

    /// Catalogue entries for several markets, in request order
    Catalogs {
        /// Comma-separated market ids
        #[arg(long)]
        ids: String,

        #[arg(long, default_value = "false")]
        debug: bool,

        /// Market ids per upstream call
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Sports
    Sports {
        /// Only soccer, tennis, cricket, horse and greyhound racing
        #[arg(long, default_value = "false")]
        major: bool,
    },

    /// Competitions for a sport
    Competitions {
        #[arg(long)]
        sport_id: String,
    },

    /// Events starting in the next 7 days
    Events {
        #[arg(long)]
        sport_id: Option<String>,

        #[arg(long)]
        competition_id: Option<String>,
    },

    /// Markets for an event
    Markets {
        #[arg(long)]
        event_id: String,

        /// Comma-separated market type codes (default: MATCH_ODDS,OVER_UNDER_25,CORRECT_SCORE)
        #[arg(long)]
        market_types: Option<String>,
    },

    /// Active-events dashboard aggregate
    Stats,

    /// Test betting endpoint connectivity
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let credentials = ApiCredentials::from_env()
        .context("BETFAIR_APP_KEY and BETFAIR_SESSION_TOKEN must be set")?;
    if !credentials.is_valid() {
        error!("Invalid credentials - app key or session token is empty");
        anyhow::bail!("Invalid credentials");
    }
    info!("Credentials loaded: {:?}", credentials);

    let client = BettingRestClient::with_base_url(&cli.base_url, credentials)?;

    let mut config = PipelineConfig::from_env();
    if let Some(dir) = cli.cache_dir.clone() {
        config.cache_dir = Some(dir);
    }
    match &cli.command {
        Commands::Book { batch_size: Some(size), .. } => config.book_batch_size = *size,
        Commands::Catalogs { batch_size: Some(size), .. } => config.catalog_batch_size = *size,
        _ => {}
    }

    let mut service = MarketDataService::new(client, config.clone());
    if let Some(dir) = &config.cache_dir {
        info!("Persisting payloads under {}", dir.display());
        service = service.with_store(Arc::new(JsonDirStore::new(dir)));
    }

    let bypass = cli.bypass_cache;
    let output = match cli.command {
        Commands::Book { ids, debug, .. } => {
            let response = service.market_books(&ids, bypass, debug).await?;
            log_warnings(&response.warnings);
            response.to_json()?
        }
        Commands::Catalog { id, debug } => {
            let response = service.catalog(&id, bypass, debug).await?;
            log_warnings(&response.warnings);
            response.to_json()?
        }
        Commands::Catalogs { ids, debug, .. } => {
            let response = service.catalogs(&ids, bypass, debug).await?;
            log_warnings(&response.warnings);
            response.to_json()?
        }
        Commands::Sports { major: true } => service.major_sports(bypass).await?.to_json()?,
        Commands::Sports { major: false } => service.event_types(bypass).await?.to_json()?,
        Commands::Competitions { sport_id } => service.competitions(&sport_id, bypass).await?.to_json()?,
        Commands::Events { sport_id, competition_id } => service
            .events(sport_id.as_deref(), competition_id.as_deref(), bypass)
            .await?
            .to_json()?,
        Commands::Markets { event_id, market_types } => {
            let market_types: Vec<String> = market_types
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            service.markets_for_event(&event_id, &market_types, bypass).await?.to_json()?
        }
        Commands::Stats => {
            let response = service.active_events_summary(bypass).await;
            if response.stale {
                warn!("Upstream unavailable - serving stale summary");
            }
            response.to_json()?
        }
        Commands::Ping => return run_ping(service.client()).await,
    };

    write_output(cli.out, &output).await
}

async fn run_ping(client: &BettingRestClient) -> Result<()> {
    info!("=== Betting API Connectivity ===");
    info!("Base URL: {}", client.base_url());

    match client.test_connectivity().await {
        Ok(_) => info!("Connectivity: OK"),
        Err(e) => {
            error!("Connectivity failed: {:#}", e);
            return Err(e);
        }
    }
    Ok(())
}

fn log_warnings(warnings: &[PipelineError]) {
    for warning in warnings {
        warn!("{}", warning);
    }
}

async fn write_output(out: Option<PathBuf>, output: &Value) -> Result<()> {
    let json_output = serde_json::to_string_pretty(output)?;

    if let Some(out_path) = out {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&out_path, &json_output)
            .await
            .with_context(|| format!("Failed to write {}", out_path.display()))?;
        info!("Output written to: {}", out_path.display());
    } else {
        println!("{}", json_output);
    }

    Ok(())
}
